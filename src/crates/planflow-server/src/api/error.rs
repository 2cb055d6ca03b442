//! API error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use planflow_core::WorkflowError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body carried by every non-2xx reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Error type identifier
    pub error: String,
    /// Human-readable message
    pub message: String,
    /// Machine-readable kind token, stable across releases
    pub code: String,
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced over the RPC boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No workflow instance, or an unknown resource
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with the current instance
    #[error("conflict: {0}")]
    Conflict(String),

    /// Core workflow error, load or runtime
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Workflow(e) => match e {
                WorkflowError::NodeNotFound(_) => StatusCode::NOT_FOUND,
                WorkflowError::Io(_) | WorkflowError::Serialization(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                _ => StatusCode::BAD_REQUEST,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable kind token for the body.
    pub fn code(&self) -> String {
        match self {
            ApiError::NotFound(_) => "not_found".to_string(),
            ApiError::Conflict(_) => "conflict".to_string(),
            ApiError::Workflow(e) => e.kind().to_string(),
            ApiError::Internal(_) => "internal_error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.status_code().to_string(),
            message: self.to_string(),
            code: self.code(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
