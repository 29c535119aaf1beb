use crate::config::App;
use crate::model::{SyncRecord, TokenCheck, next_token};
use anyhow::Result;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database as LibsqlDatabase, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[("001_bookmarks.sql", include_str!("migrations/001_bookmarks.sql"))];

/// Record store for sync records.
///
/// Reads go through one shared connection. Writes open their own connection
/// so each unit of work gets an independent SQLite transaction; concurrent
/// writers are serialized by the database's write lock, never by a lock in
/// this process.
pub struct Database {
    db: LibsqlDatabase,
    conn: Connection,
    busy_timeout: Duration,
    replicated: bool,
}

impl Database {
    pub fn is_replica(&self) -> bool {
        self.replicated
    }

    pub async fn sync(&self) -> Result<()> {
        if self.replicated {
            self.db
                .sync()
                .await
                .map_err(|e| anyhow::anyhow!("sync failed: {}", e))?;
        }
        Ok(())
    }

    /// Flushes the replica one last time before the handle is dropped.
    pub async fn close(&self) -> Result<()> {
        self.sync().await?;
        tracing::info!("[db] closed");
        Ok(())
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    pub async fn new(cfg: &App, data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(cfg.get_db());

        match cfg.replica() {
            Some((url, token)) => {
                tracing::info!("[db] running in synced database mode (offline writes)");
                let db = Builder::new_synced_database(&path, url.to_owned(), token.to_owned())
                    .build()
                    .await?;
                Self::init(db, cfg.busy_timeout(), true).await
            }
            None => Self::open(&path, cfg.busy_timeout()).await,
        }
    }

    /// Opens a plain local database file.
    pub async fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        tracing::info!(path = ?path, "[db] opening local database");
        let db = Builder::new_local(path).build().await?;
        Self::init(db, busy_timeout, false).await
    }

    async fn init(db: LibsqlDatabase, busy_timeout: Duration, replicated: bool) -> Result<Self> {
        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;
        if !replicated {
            conn.query("PRAGMA journal_mode = WAL", ()).await?;
        }
        Self::set_busy_timeout(&conn, busy_timeout).await?;

        for (filename, sql) in SYSTEM_MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        for (filename, sql) in MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        Ok(Database {
            db,
            conn,
            busy_timeout,
            replicated,
        })
    }

    async fn set_busy_timeout(conn: &Connection, timeout: Duration) -> Result<()> {
        conn.query(&format!("PRAGMA busy_timeout = {}", timeout.as_millis()), ())
            .await?;
        Ok(())
    }

    /// Fresh connection scoped to a single unit of work.
    async fn connect(&self) -> Result<Connection> {
        let conn = self.db.connect()?;
        Self::set_busy_timeout(&conn, self.busy_timeout).await?;
        Ok(conn)
    }

    pub async fn create_record(&self, version: &str, timestamp: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.insert_record(&id, version, timestamp).await?;
        Ok(id)
    }

    // Plain INSERT: an existing id fails on the primary key instead of being replaced.
    async fn insert_record(&self, id: &str, version: &str, timestamp: &str) -> Result<()> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO bookmarks (sync_id, bookmarks, version, last_updated) VALUES (?, '', ?, ?)",
            libsql::params![id, version, timestamp],
        )
        .await
        .map_err(|e| anyhow::anyhow!("failed to insert record {id}: {e}"))?;
        Ok(())
    }

    pub async fn get_record(&self, id: &str) -> Result<Option<SyncRecord>> {
        let query = r#"
            SELECT sync_id, bookmarks, version, last_updated
            FROM bookmarks WHERE sync_id = ?
        "#;

        let mut rows = self.conn.query(query, libsql::params![id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(SyncRecord {
                id: row.get(0)?,
                payload: row.get::<Option<String>>(1)?.unwrap_or_default(),
                version: row.get(2)?,
                last_updated: row.get(3)?,
            }))
        } else {
            Ok(None)
        }
    }

    pub async fn get_last_updated(&self, id: &str) -> Result<Option<String>> {
        self.get_column("SELECT last_updated FROM bookmarks WHERE sync_id = ?", id)
            .await
    }

    pub async fn get_version(&self, id: &str) -> Result<Option<String>> {
        self.get_column("SELECT version FROM bookmarks WHERE sync_id = ?", id)
            .await
    }

    async fn get_column(&self, query: &str, id: &str) -> Result<Option<String>> {
        let mut rows = self.conn.query(query, libsql::params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Replaces the payload of `id` if its stored token equals `expected`.
    ///
    /// The read, comparison and write run inside one `BEGIN IMMEDIATE`
    /// transaction, so two writers presenting the same token cannot both
    /// apply. Anything other than an applied write is rolled back.
    pub async fn update_if_token_matches(
        &self,
        id: &str,
        expected: &str,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenCheck> {
        let conn = self.connect().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await?;

        match Self::compare_and_write(&tx, id, expected, payload, now).await {
            Ok(check @ TokenCheck::Applied { .. }) => {
                tx.commit().await?;
                Ok(check)
            }
            Ok(check) => {
                tx.rollback().await?;
                Ok(check)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn compare_and_write(
        conn: &Connection,
        id: &str,
        expected: &str,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenCheck> {
        let mut rows = conn
            .query("SELECT last_updated FROM bookmarks WHERE sync_id = ?", libsql::params![id])
            .await?;
        let current: String = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => return Ok(TokenCheck::NotFound),
        };
        drop(rows);

        if current != expected {
            return Ok(TokenCheck::Mismatch { current });
        }

        let last_updated = next_token(&current, now);
        let changed = conn
            .execute(
                "UPDATE bookmarks SET bookmarks = ?, last_updated = ? WHERE sync_id = ? AND last_updated = ?",
                libsql::params![payload, last_updated.as_str(), id, expected],
            )
            .await?;
        if changed != 1 {
            anyhow::bail!("conditional update of {id} changed {changed} rows");
        }

        Ok(TokenCheck::Applied { last_updated })
    }
}
