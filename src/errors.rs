use crate::{
    context::TriggerError,
    services::{application_service::ApplicationError, resume_service::ResumeError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
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
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "database error");
        AppError::internal("database error")
    }
}

impl From<ResumeError> for AppError {
    fn from(err: ResumeError) -> Self {
        match err {
            ResumeError::InvalidPath(_) | ResumeError::UnsupportedExtension(_) => {
                AppError::bad_request(err.to_string())
            }
            ResumeError::Io(io) => {
                tracing::error!(error = %io, "resume storage I/O failed");
                AppError::internal("resume storage failure")
            }
        }
    }
}

impl From<ApplicationError> for AppError {
    fn from(err: ApplicationError) -> Self {
        match err {
            ApplicationError::Duplicate { .. } => AppError::conflict(err.to_string()),
            ApplicationError::Sqlx(db) => db.into(),
        }
    }
}

impl From<TriggerError> for AppError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::NotOwner => AppError::conflict(err.to_string()),
            TriggerError::Misconfigured => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            TriggerError::Lock(_) | TriggerError::Cycle(_) => {
                tracing::error!(error = %err, "manual offload failed");
                AppError::internal(err.to_string())
            }
        }
    }
}
