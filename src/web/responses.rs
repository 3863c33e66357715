//! Standardized API responses and error mapping.
//!
//! Every error leaving the HTTP surface has the same body shape:
//! `{"error": {"code", "message", "details"?, "field"?, "request_id"}}` with
//! the code drawn from a fixed set.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::errors::{AppError, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Conflict,
    ValidationError,
    RateLimited,
    InternalError,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub request_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug)]
pub struct ApiError {
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new<M: Into<String>>(code: ErrorCode, message: M, request_id: Uuid) -> Self {
        Self {
            body: ErrorBody {
                code,
                message: message.into(),
                details: None,
                field: None,
                request_id,
            },
        }
    }

    pub fn with_field<F: Into<String>>(mut self, field: F) -> Self {
        self.body.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.body.details = Some(details);
        self
    }

    pub fn not_found<M: Into<String>>(message: M, request_id: Uuid) -> Self {
        Self::new(ErrorCode::NotFound, message, request_id)
    }

    pub fn conflict<M: Into<String>>(message: M, request_id: Uuid) -> Self {
        Self::new(ErrorCode::Conflict, message, request_id)
    }

    pub fn validation<M: Into<String>>(message: M, request_id: Uuid) -> Self {
        Self::new(ErrorCode::ValidationError, message, request_id)
    }

    pub fn internal(request_id: Uuid) -> Self {
        Self::new(ErrorCode::InternalError, "internal error", request_id)
    }

    /// Map a typed application error to its wire code. Internal errors are
    /// logged with the request id so the payload can stay terse.
    pub fn from_app(err: AppError, request_id: Uuid) -> Self {
        match err {
            AppError::Validation { message, field } => {
                let api = Self::new(ErrorCode::ValidationError, message, request_id);
                match field {
                    Some(field) => api.with_field(field),
                    None => api,
                }
            }
            AppError::NotFound { resource, id } => Self::new(
                ErrorCode::NotFound,
                format!("{resource} {id} not found"),
                request_id,
            ),
            AppError::StateConflict { message } => {
                Self::new(ErrorCode::Conflict, message, request_id)
            }
            AppError::Store(StoreError::Duplicate { constraint, value }) => Self::new(
                ErrorCode::Conflict,
                format!("duplicate {constraint}: {value}"),
                request_id,
            ),
            AppError::Store(StoreError::RecordNotFound { table, id }) => Self::new(
                ErrorCode::NotFound,
                format!("{table} {id} not found"),
                request_id,
            ),
            other => {
                error!(request_id = %request_id, "Internal error: {}", other);
                Self::internal(request_id)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.body.code.status();
        (status, Json(ErrorEnvelope { error: self.body })).into_response()
    }
}
