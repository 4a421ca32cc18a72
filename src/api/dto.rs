//! Response envelope and error codes for C9 (spec.md §4.9 "Error envelope").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Envelope<T: Serialize> {
    Ok {
        success: bool,
        data: T,
        timestamp: DateTime<Utc>,
    },
    Err {
        success: bool,
        error: ErrorBody,
        timestamp: DateTime<Utc>,
    },
}

pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope::Ok {
        success: true,
        data,
        timestamp: Utc::now(),
    })
}

/// API-facing error. Each variant maps to an HTTP status and a stable code
/// a client can match on (spec.md §4.9 validation rules).
#[derive(Debug)]
pub enum ApiError {
    InvalidId(String),
    NotFound(String),
    Conflict(String),
    Unauthorized,
    TooManyRequests,
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::InvalidId(field) => (
                StatusCode::BAD_REQUEST,
                "INVALID_ID",
                format!("'{field}' must match [A-Za-z0-9_-]{{1,100}}"),
            ),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, "NOT_FOUND", what.clone()),
            ApiError::Conflict(what) => (StatusCode::CONFLICT, "CONFLICT", what.clone()),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "missing or invalid API key".to_string(),
            ),
            ApiError::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "too many requests".to_string(),
            ),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body: Envelope<()> = Envelope::Err {
            success: false,
            error: ErrorBody { message, code },
            timestamp: Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<crate::repository::RepositoryError> for ApiError {
    fn from(err: crate::repository::RepositoryError) -> Self {
        match err {
            crate::repository::RepositoryError::InvalidId(id) => ApiError::InvalidId(id),
            crate::repository::RepositoryError::NotFound(id) => ApiError::NotFound(format!("job '{id}' not found")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<crate::executor::ExecutorError> for ApiError {
    fn from(err: crate::executor::ExecutorError) -> Self {
        match err {
            crate::executor::ExecutorError::UnknownPipeline(id) => {
                ApiError::NotFound(format!("pipeline '{id}' not registered"))
            }
            crate::executor::ExecutorError::JobNotFound(id) => ApiError::NotFound(format!("job '{id}' not found")),
            crate::executor::ExecutorError::InvalidTransition(id, status, action) => {
                ApiError::Conflict(format!("job '{id}' in status '{status}' cannot be {action}"))
            }
            crate::executor::ExecutorError::Repository(e) => e.into(),
        }
    }
}
