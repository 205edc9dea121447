use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::CancelError;
use crate::storage::StoreError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Cancel(CancelError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Cancel(err) => match err {
                CancelError::ElementNotFound(_) => StatusCode::NOT_FOUND,
                CancelError::OwnershipMismatch { .. } => StatusCode::FORBIDDEN,
                CancelError::VersionConflict { .. }
                | CancelError::InvalidTransition { .. }
                | CancelError::ElementExists(_) => StatusCode::CONFLICT,
                CancelError::RetriesExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
                CancelError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Cancel(err) => match err {
                CancelError::VersionConflict { .. } => "version_conflict",
                CancelError::OwnershipMismatch { .. } => "ownership_mismatch",
                CancelError::ElementNotFound(_) => "not_found",
                CancelError::ElementExists(_) => "already_exists",
                CancelError::InvalidTransition { .. } => "invalid_transition",
                CancelError::RetriesExhausted { .. } => "retries_exhausted",
                CancelError::Store(_) => "store",
            },
        }
    }
}

impl From<CancelError> for ApiError {
    fn from(err: CancelError) -> Self {
        ApiError::Cancel(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Cancel(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::BadRequest(reason) => reason.clone(),
            ApiError::NotFound(what) => format!("{} not found", what),
            ApiError::Cancel(err) => err.to_string(),
        };
        if status.is_server_error() {
            log::error!("Request failed: {}", message);
        }

        (
            status,
            Json(json!({
                "error": message,
                "kind": self.kind(),
            })),
        )
            .into_response()
    }
}
