use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub const MALFORMED_SYNC_ID: &str = "Argument is not a valid UUID string";
pub const UNKNOWN_SYNC_ID: &str = "Invalid sync ID";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Unable to find required data")]
    RequiredDataNotFound,
    #[error("{0}")]
    InvalidSyncId(&'static str),
    #[error("Bookmarks id {0} not found")]
    NotFound(String),
    #[error("A sync conflict was detected")]
    SyncConflict,
    #[error("The requested route has not been implemented")]
    NotImplemented,
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        use SyncError::*;
        match self {
            RequiredDataNotFound => "RequiredDataNotFoundException",
            InvalidSyncId(_) => "InvalidSyncIdException",
            NotFound(_) => "NotFoundException",
            SyncConflict => "SyncConflictException",
            NotImplemented => "NotImplementedException",
            Internal(_) => "InternalException",
        }
    }

    pub fn status(&self) -> StatusCode {
        use SyncError::*;
        match self {
            RequiredDataNotFound => StatusCode::BAD_REQUEST,
            InvalidSyncId(_) => StatusCode::UNAUTHORIZED,
            NotFound(_) | NotImplemented => StatusCode::NOT_FOUND,
            SyncConflict => StatusCode::CONFLICT,
            Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        if let SyncError::Internal(e) = &self {
            tracing::error!(error = %crate::unpack_error(&**e), "request failed");
        }
        (self.status(), Json(self.body())).into_response()
    }
}
