use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};

use crate::api::{
    BookmarksResponse, CreateBookmarksRequest, CreatedBookmarks, HealthResponse, LastUpdatedResponse,
    UpdateBookmarksRequest, VersionResponse,
};
use crate::config::Info;
use crate::error::SyncError;
use crate::sync::SyncEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: SyncEngine,
    pub info: Arc<Info>,
}

// A body that is missing or not JSON carries none of the required fields.
fn body<T: Default>(payload: Result<Json<T>, JsonRejection>) -> T {
    match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "rejected request body");
            T::default()
        }
    }
}

pub async fn healthcheck() -> Json<HealthResponse> {
    tracing::info!("got healthcheck request");
    Json(HealthResponse { status: "ok" })
}

pub async fn info(State(state): State<AppState>) -> Json<Info> {
    Json(state.info.as_ref().clone())
}

pub async fn create_bookmarks(
    State(state): State<AppState>,
    payload: Result<Json<CreateBookmarksRequest>, JsonRejection>,
) -> Result<Json<CreatedBookmarks>, SyncError> {
    let req = body(payload);
    Ok(Json(state.engine.create_bookmarks(req).await?))
}

pub async fn get_bookmarks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BookmarksResponse>, SyncError> {
    Ok(Json(state.engine.get_bookmarks(&id).await?))
}

pub async fn update_bookmarks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateBookmarksRequest>, JsonRejection>,
) -> Result<Json<LastUpdatedResponse>, SyncError> {
    let req = body(payload);
    Ok(Json(state.engine.update_bookmarks(&id, req).await?))
}

pub async fn get_last_updated(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LastUpdatedResponse>, SyncError> {
    Ok(Json(state.engine.get_last_updated(&id).await?))
}

pub async fn get_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VersionResponse>, SyncError> {
    Ok(Json(state.engine.get_version(&id).await?))
}

pub async fn not_implemented() -> SyncError {
    SyncError::NotImplemented
}
