use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::error::Error;
use std::fmt;
use thiserror::Error as ThisError;

use crate::backend::BackendError;
use crate::device::DeviceStatus;

/// Failures of device, job and registry operations.
///
/// Every variant carries a human-readable message; backend failures keep the
/// driver's message.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum DeviceError {
    #[error("device {0} is not enabled")]
    DeviceNotEnabled(String),
    #[error("device {name} is busy (status: {status})")]
    DeviceBusy { name: String, status: DeviceStatus },
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("job {index} not found on device {device}")]
    JobNotFound { device: String, index: usize },
    #[error("option {0} not found")]
    OptionNotFound(String),
    #[error("invalid value {value:?} for option {option}: {reason}")]
    InvalidOptionValue { option: String, value: String, reason: String },
    #[error("backend fault: {0}")]
    BackendFault(#[from] BackendError),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// The primary error type at the HTTP boundary.
#[derive(Debug)]
pub enum AppError {
    /// For internal server errors that are not expected to be handled by the client.
    Internal(anyhow::Error),
    /// For client errors due to invalid requests (e.g. a busy device).
    BadRequest(String),
    /// For when a requested resource is not found or not usable yet.
    NotFound(String),
    /// For option writes that the device refuses to accept.
    Forbidden(String),
    /// For errors raised by the scanning backend.
    Backend(String),
    /// For when a specific field in a request fails validation.
    ValidationError {
        /// The name of the field that failed validation.
        field: String,
        /// A message describing the validation error.
        message: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::Backend(msg) => write!(f, "Backend error: {}", msg),
            AppError::ValidationError { field, message } => {
                write!(f, "Validation error on field '{}': {}", field, message)
            }
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Internal(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message, details) = match self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                let error_id = uuid::Uuid::new_v4();
                tracing::error!("Error ID: {}", error_id);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    Some(json!({ "error_id": error_id.to_string() })),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            AppError::Backend(msg) => {
                tracing::warn!("Backend error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "BACKEND_ERROR", msg, None)
            }
            AppError::ValidationError { field, message } => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("Validation failed for field '{}'", field),
                Some(json!({ "field": field, "message": message })),
            ),
        };

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": error_message,
            },
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<DeviceError> for AppError {
    fn from(err: DeviceError) -> Self {
        let msg = err.to_string();
        match err {
            DeviceError::DeviceNotFound(_)
            | DeviceError::DeviceNotEnabled(_)
            | DeviceError::JobNotFound { .. } => AppError::NotFound(msg),
            DeviceError::DeviceBusy { .. } => AppError::BadRequest(msg),
            DeviceError::OptionNotFound(_) | DeviceError::InvalidOptionValue { .. } => AppError::Forbidden(msg),
            DeviceError::BackendFault(_) => AppError::Backend(msg),
        }
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the HTTP layer.
pub type AppResult<T> = Result<T, AppError>;
