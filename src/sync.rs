//! Sync protocol
//!
//! Create/read/update semantics for bookmark sync records. Updates use
//! optimistic concurrency: the client presents the `lastUpdated` token it last
//! read, and the write is accepted only if that token is still the stored one.
//! A stale token is reported as a conflict; nothing is merged and nothing is
//! retried here.

use std::sync::Arc;

use chrono::Utc;

use crate::api::{
    BookmarksResponse, CreateBookmarksRequest, CreatedBookmarks, LastUpdatedResponse, UpdateBookmarksRequest,
    VersionResponse,
};
use crate::db::Database;
use crate::error::{MALFORMED_SYNC_ID, SyncError, UNKNOWN_SYNC_ID};
use crate::model::{TokenCheck, format_timestamp};

/// Checks a caller-supplied sync id before it reaches the store.
///
/// An empty id means the route had no resource segment at all. Anything else
/// must parse as a 128-bit hexadecimal number.
pub fn validate_sync_id(id: &str) -> Result<(), SyncError> {
    if id.is_empty() {
        return Err(SyncError::NotImplemented);
    }
    if id.len() > 32 || !id.bytes().all(|b| b.is_ascii_hexdigit()) || u128::from_str_radix(id, 16).is_err() {
        return Err(SyncError::InvalidSyncId(MALFORMED_SYNC_ID));
    }
    Ok(())
}

fn required(value: Option<String>) -> Result<String, SyncError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(SyncError::RequiredDataNotFound),
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    db: Arc<Database>,
}

impl SyncEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn create_bookmarks(&self, req: CreateBookmarksRequest) -> Result<CreatedBookmarks, SyncError> {
        let version = required(req.version)?;
        let last_updated = format_timestamp(Utc::now());
        let id = self.db.create_record(&version, &last_updated).await?;

        tracing::info!(sync_id = %id, version = %version, "created bookmarks");
        Ok(CreatedBookmarks {
            id,
            last_updated,
            version,
        })
    }

    pub async fn get_bookmarks(&self, id: &str) -> Result<BookmarksResponse, SyncError> {
        validate_sync_id(id)?;

        let record = self
            .db
            .get_record(id)
            .await?
            .ok_or(SyncError::InvalidSyncId(UNKNOWN_SYNC_ID))?;

        Ok(BookmarksResponse {
            bookmarks: record.payload,
            version: record.version,
            last_updated: record.last_updated,
        })
    }

    pub async fn update_bookmarks(
        &self,
        id: &str,
        req: UpdateBookmarksRequest,
    ) -> Result<LastUpdatedResponse, SyncError> {
        validate_sync_id(id)?;
        let bookmarks = required(req.bookmarks)?;
        let token = req.last_updated.ok_or(SyncError::RequiredDataNotFound)?;

        match self
            .db
            .update_if_token_matches(id, &token, &bookmarks, Utc::now())
            .await?
        {
            TokenCheck::Applied { last_updated } => {
                tracing::info!(sync_id = %id, last_updated = %last_updated, "updated bookmarks");
                Ok(LastUpdatedResponse { last_updated })
            }
            TokenCheck::Mismatch { current } => {
                tracing::warn!(sync_id = %id, presented = %token, current = %current, "sync conflict");
                Err(SyncError::SyncConflict)
            }
            TokenCheck::NotFound => Err(SyncError::NotFound(id.to_owned())),
        }
    }

    pub async fn get_last_updated(&self, id: &str) -> Result<LastUpdatedResponse, SyncError> {
        validate_sync_id(id)?;
        let last_updated = self
            .db
            .get_last_updated(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(id.to_owned()))?;
        Ok(LastUpdatedResponse { last_updated })
    }

    pub async fn get_version(&self, id: &str) -> Result<VersionResponse, SyncError> {
        validate_sync_id(id)?;
        let version = self
            .db
            .get_version(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(id.to_owned()))?;
        Ok(VersionResponse { version })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const UNKNOWN: &str = "0123456789abcdef0123456789abcdef";

    async fn engine() -> (tempfile::TempDir, SyncEngine) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("sync.db"), Duration::from_secs(10))
            .await
            .unwrap();
        (dir, SyncEngine::new(Arc::new(db)))
    }

    fn create(version: &str) -> CreateBookmarksRequest {
        CreateBookmarksRequest {
            version: Some(version.to_owned()),
        }
    }

    fn update(bookmarks: &str, token: &str) -> UpdateBookmarksRequest {
        UpdateBookmarksRequest {
            bookmarks: Some(bookmarks.to_owned()),
            last_updated: Some(token.to_owned()),
        }
    }

    #[test]
    fn test_validate_sync_id() {
        assert!(validate_sync_id(UNKNOWN).is_ok());
        assert!(validate_sync_id("ABCDEF").is_ok());
        assert!(matches!(validate_sync_id(""), Err(SyncError::NotImplemented)));
        assert!(matches!(validate_sync_id("not-hex"), Err(SyncError::InvalidSyncId(_))));
        assert!(matches!(validate_sync_id("+abc"), Err(SyncError::InvalidSyncId(_))));
        assert!(matches!(
            validate_sync_id("0123456789abcdef0123456789abcdef0"),
            Err(SyncError::InvalidSyncId(_))
        ));
        assert!(matches!(
            validate_sync_id("0000000000000000000000000000000000000001"),
            Err(SyncError::InvalidSyncId(_))
        ));
    }

    #[tokio::test]
    async fn test_create_assigns_hex_id_and_keeps_version() {
        let (_dir, engine) = engine().await;
        let created = engine.create_bookmarks(create("1.1.12")).await.unwrap();

        assert_eq!(created.id.len(), 32);
        assert!(created.id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
        assert_eq!(created.version, "1.1.12");
        assert_eq!(created.last_updated.len(), "2021-01-01T00:00:00.000Z".len());
        assert!(created.last_updated.ends_with('Z'));

        let version = engine.get_version(&created.id).await.unwrap();
        assert_eq!(version.version, "1.1.12");
        let last_updated = engine.get_last_updated(&created.id).await.unwrap();
        assert_eq!(last_updated.last_updated, created.last_updated);
    }

    #[tokio::test]
    async fn test_create_store_failure_is_internal() {
        let (dir, engine) = engine().await;
        let side_db = libsql::Builder::new_local(dir.path().join("sync.db"))
            .build()
            .await
            .unwrap();
        let side = side_db.connect().unwrap();
        side.execute_batch(
            "CREATE TRIGGER reject_inserts BEFORE INSERT ON bookmarks \
             BEGIN SELECT RAISE(ABORT, 'inserts disabled'); END;",
        )
        .await
        .unwrap();

        let result = engine.create_bookmarks(create("1")).await;
        assert!(matches!(result, Err(SyncError::Internal(_))));
    }

    #[tokio::test]
    async fn test_create_requires_version() {
        let (_dir, engine) = engine().await;
        let missing = engine.create_bookmarks(CreateBookmarksRequest::default()).await;
        assert!(matches!(missing, Err(SyncError::RequiredDataNotFound)));
        let empty = engine.create_bookmarks(create("")).await;
        assert!(matches!(empty, Err(SyncError::RequiredDataNotFound)));
    }

    #[tokio::test]
    async fn test_get_rejects_bad_and_unknown_ids() {
        let (_dir, engine) = engine().await;
        assert!(matches!(engine.get_bookmarks("").await, Err(SyncError::NotImplemented)));
        assert!(matches!(
            engine.get_bookmarks("not-hex").await,
            Err(SyncError::InvalidSyncId(MALFORMED_SYNC_ID))
        ));
        assert!(matches!(
            engine.get_bookmarks(UNKNOWN).await,
            Err(SyncError::InvalidSyncId(UNKNOWN_SYNC_ID))
        ));
        assert!(matches!(engine.get_version(UNKNOWN).await, Err(SyncError::NotFound(_))));
        assert!(matches!(engine.get_last_updated(UNKNOWN).await, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_new_record_has_empty_payload() {
        let (_dir, engine) = engine().await;
        let created = engine.create_bookmarks(create("2")).await.unwrap();
        let got = engine.get_bookmarks(&created.id).await.unwrap();
        assert_eq!(got.bookmarks, "");
        assert_eq!(got.version, "2");
        assert_eq!(got.last_updated, created.last_updated);
    }

    #[tokio::test]
    async fn test_update_round_trip() {
        let (_dir, engine) = engine().await;
        let created = engine.create_bookmarks(create("1")).await.unwrap();

        let updated = engine
            .update_bookmarks(&created.id, update("P1", &created.last_updated))
            .await
            .unwrap();
        assert!(updated.last_updated > created.last_updated);

        let got = engine.get_bookmarks(&created.id).await.unwrap();
        assert_eq!(got.bookmarks, "P1");
        assert_eq!(got.last_updated, updated.last_updated);
        assert_eq!(got.version, "1");

        let again = engine.get_bookmarks(&created.id).await.unwrap();
        assert_eq!(got, again);
    }

    #[tokio::test]
    async fn test_stale_token_conflicts() {
        let (_dir, engine) = engine().await;
        let created = engine.create_bookmarks(create("1")).await.unwrap();
        let t0 = created.last_updated;

        let t1 = engine
            .update_bookmarks(&created.id, update("P1", &t0))
            .await
            .unwrap()
            .last_updated;

        let stale = engine.update_bookmarks(&created.id, update("P2", &t0)).await;
        assert!(matches!(stale, Err(SyncError::SyncConflict)));

        let got = engine.get_bookmarks(&created.id).await.unwrap();
        assert_eq!(got.bookmarks, "P1");
        assert_eq!(got.last_updated, t1);
    }

    #[tokio::test]
    async fn test_update_validation() {
        let (_dir, engine) = engine().await;
        let created = engine.create_bookmarks(create("1")).await.unwrap();

        let empty = engine
            .update_bookmarks(&created.id, update("", &created.last_updated))
            .await;
        assert!(matches!(empty, Err(SyncError::RequiredDataNotFound)));

        let no_token = engine
            .update_bookmarks(
                &created.id,
                UpdateBookmarksRequest {
                    bookmarks: Some("P1".to_owned()),
                    last_updated: None,
                },
            )
            .await;
        assert!(matches!(no_token, Err(SyncError::RequiredDataNotFound)));

        let bad_id = engine.update_bookmarks("xyz", update("P1", "t")).await;
        assert!(matches!(bad_id, Err(SyncError::InvalidSyncId(_))));

        let unknown = engine
            .update_bookmarks(UNKNOWN, update("P1", &created.last_updated))
            .await;
        assert!(matches!(unknown, Err(SyncError::NotFound(id)) if id == UNKNOWN));

        let got = engine.get_bookmarks(&created.id).await.unwrap();
        assert_eq!(got.bookmarks, "");
    }

    #[tokio::test]
    async fn test_version_is_write_once() {
        let (_dir, engine) = engine().await;
        let created = engine.create_bookmarks(create("1.0")).await.unwrap();
        engine
            .update_bookmarks(&created.id, update("P1", &created.last_updated))
            .await
            .unwrap();
        assert_eq!(engine.get_version(&created.id).await.unwrap().version, "1.0");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_with_same_token() {
        let (_dir, engine) = engine().await;
        let created = engine.create_bookmarks(create("1")).await.unwrap();

        let writers = (0..8).map(|i| {
            let engine = engine.clone();
            let id = created.id.clone();
            let token = created.last_updated.clone();
            tokio::spawn(async move {
                engine
                    .update_bookmarks(&id, update(&format!("P{i}"), &token))
                    .await
            })
        });
        let results = futures_util::future::join_all(writers).await;

        let mut applied = Vec::new();
        let mut conflicts = 0;
        for (i, result) in results.into_iter().enumerate() {
            match result.unwrap() {
                Ok(resp) => applied.push((i, resp.last_updated)),
                Err(SyncError::SyncConflict) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }
        assert_eq!(applied.len(), 1);
        assert_eq!(conflicts, 7);

        let (winner, token) = &applied[0];
        let got = engine.get_bookmarks(&created.id).await.unwrap();
        assert_eq!(got.bookmarks, format!("P{winner}"));
        assert_eq!(&got.last_updated, token);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_records_update_independently() {
        let (_dir, engine) = engine().await;
        let a = engine.create_bookmarks(create("1")).await.unwrap();
        let b = engine.create_bookmarks(create("1")).await.unwrap();

        let (ra, rb) = tokio::join!(
            engine.update_bookmarks(&a.id, update("A", &a.last_updated)),
            engine.update_bookmarks(&b.id, update("B", &b.last_updated)),
        );
        assert!(ra.is_ok());
        assert!(rb.is_ok());
        assert_eq!(engine.get_bookmarks(&a.id).await.unwrap().bookmarks, "A");
        assert_eq!(engine.get_bookmarks(&b.id).await.unwrap().bookmarks, "B");
    }
}
