use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use deckshare_core::UploadError;
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::MissingField(_)
            | UploadError::InvalidChecksum(_)
            | UploadError::InvalidFileName(_)
            | UploadError::DestinationMissing(_) => StatusCode::BAD_REQUEST,
            UploadError::UnknownUpload(_) => StatusCode::NOT_FOUND,
            UploadError::OffsetMismatch { .. } => StatusCode::CONFLICT,
            UploadError::ChunkTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::ChecksumMismatch { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            UploadError::Io(io) => {
                tracing::error!(error = %io, "upload storage failed");
                return Self::internal("Upload storage failed");
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found("Not found"),
            std::io::ErrorKind::PermissionDenied => {
                Self::new(StatusCode::FORBIDDEN, "Permission denied")
            }
            _ => {
                tracing::error!(error = %err, "filesystem operation failed");
                Self::internal("Filesystem operation failed")
            }
        }
    }
}
