//! Error responses: `{"error": "<message>", "reason": "<Code>"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use db::DbError;
use engine::{EngineError, PublishError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn status_and_reason(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Publish(e) if e.is_authoring_error() => (StatusCode::UNPROCESSABLE_ENTITY, e.reason()),
            Self::Publish(PublishError::NotFound(_)) => (StatusCode::NOT_FOUND, "NotFound"),
            Self::Publish(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.reason()),
            Self::Engine(EngineError::RunNotFound(_) | EngineError::WorkflowNotFound(_)) => {
                (StatusCode::NOT_FOUND, "NotFound")
            }
            Self::Engine(EngineError::RunFinished { .. }) => (StatusCode::CONFLICT, "RunFinished"),
            Self::Engine(EngineError::RunInProgress(_)) => (StatusCode::CONFLICT, "RunInProgress"),
            Self::Engine(EngineError::WorkflowInactive(_)) | Self::Database(DbError::Inactive(_)) => {
                (StatusCode::CONFLICT, "WorkflowInactive")
            }
            Self::Engine(EngineError::Database(DbError::NotFound)) | Self::Database(DbError::NotFound) => {
                (StatusCode::NOT_FOUND, "NotFound")
            }
            Self::Engine(EngineError::Database(_)) | Self::Database(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PersistFailure")
            }
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = self.status_and_reason();
        if status.is_server_error() {
            error!(reason, "request failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string(), "reason": reason }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
