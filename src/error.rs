use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::upload::UploadError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Forbidden")]
    Forbidden,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Procedure error code shared by the RPC and HTTP surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound => "NOT_FOUND",
            AppError::Forbidden => "FORBIDDEN",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Upload(e) => e.code(),
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Io(_)
            | AppError::Json(_)
            | AppError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upload(e) => e.status(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the same request might succeed if tried again.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Upload(e) => matches!(e, UploadError::Timeout | UploadError::Processing(_)),
            AppError::Database(_) | AppError::Pool(_) | AppError::Io(_) | AppError::Internal(_) => true,
            _ => false,
        }
    }

    /// Message safe to show to a client. Internal failures are logged here
    /// and replaced by a generic message.
    pub fn public_message(&self) -> String {
        match self {
            AppError::NotFound => "Not found".to_string(),
            AppError::Forbidden => "You do not have access to this resource".to_string(),
            AppError::Unauthorized => "Unauthorized".to_string(),
            AppError::BadRequest(msg) | AppError::Conflict(msg) => msg.clone(),
            AppError::Upload(e) => e.user_message(),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "code": self.code(),
            "message": self.public_message(),
        });

        (self.status(), Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
