//! Error type definitions for the tubefeed application
//!
//! This module defines all error types used throughout the application,
//! providing a hierarchical error system that makes debugging and error
//! handling more straightforward.

use thiserror::Error;

/// Top-level application error type
///
/// This enum represents all possible errors that can occur in the application.
/// It uses `thiserror` to provide automatic error trait implementations and
/// proper error chaining.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store layer errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// External tool invocation errors (extractor, transcoder)
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Bad input at the boundary; surfaced, never retried
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Entity lookup miss
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Operation illegal in the entity's current state
    #[error("State conflict: {message}")]
    StateConflict { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Store layer specific errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Uniqueness collision on `channels.url` or `episodes.video_id`.
    /// Refresh deduplication consumes this; channel creation surfaces it as 409.
    #[error("Duplicate {constraint}: {value}")]
    Duplicate { constraint: String, value: String },

    /// Record not found
    #[error("Record not found: {table} with id {id}")]
    RecordNotFound { table: String, id: String },

    /// A stored value could not be decoded into its model type
    #[error("Decode failed: {column} - {message}")]
    DecodeFailed { column: String, message: String },

    /// SQL query execution failures
    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Failure classification shared by both external-tool adapters.
///
/// The adapter classifies from exit status and stderr; callers only ever
/// branch on this enum and never parse tool output themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Upstream says the video or channel does not exist
    NotFound,
    /// Upstream refuses access (private, members-only, geo-blocked)
    Forbidden,
    /// Network hiccup; worth retrying
    TransientNetwork,
    /// Non-zero exit, malformed output, unexpected schema
    ToolFailure,
    /// The child process exceeded its invocation timeout
    Timeout,
}

impl ErrorClass {
    /// Whether the retry policy may re-attempt after this failure.
    /// `NotFound` and `Forbidden` are terminal on first occurrence.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorClass::TransientNetwork | ErrorClass::ToolFailure | ErrorClass::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::NotFound => "not_found",
            ErrorClass::Forbidden => "forbidden",
            ErrorClass::TransientNetwork => "transient_network",
            ErrorClass::ToolFailure => "tool_failure",
            ErrorClass::Timeout => "timeout",
        }
    }
}

/// External tool invocation error with its classification
#[derive(Error, Debug, Clone)]
#[error("{tool} failed ({}): {message}", .class.as_str())]
pub struct ToolError {
    pub tool: &'static str,
    pub class: ErrorClass,
    pub message: String,
}

impl ToolError {
    pub fn new<M: Into<String>>(tool: &'static str, class: ErrorClass, message: M) -> Self {
        Self {
            tool,
            class,
            message: message.into(),
        }
    }

    pub fn timeout(tool: &'static str, secs: u64) -> Self {
        Self {
            tool,
            class: ErrorClass::Timeout,
            message: format!("timed out after {secs}s"),
        }
    }
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error tied to a specific request field
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a not found error for a specific resource
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a state conflict error
    pub fn state_conflict<S: Into<String>>(message: S) -> Self {
        Self::StateConflict {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is a uniqueness collision
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Store(StoreError::Duplicate { .. }))
    }
}

impl StoreError {
    pub fn duplicate<C: Into<String>, V: Into<String>>(constraint: C, value: V) -> Self {
        Self::Duplicate {
            constraint: constraint.into(),
            value: value.into(),
        }
    }

    pub fn record_not_found<T: Into<String>, I: Into<String>>(table: T, id: I) -> Self {
        Self::RecordNotFound {
            table: table.into(),
            id: id.into(),
        }
    }

    pub fn decode_failed<C: Into<String>, M: Into<String>>(column: C, message: M) -> Self {
        Self::DecodeFailed {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Map a raw sqlx error, recognizing SQLite unique-constraint violations
    /// so callers get a typed duplicate instead of a generic query failure.
    pub fn from_sqlx<V: Into<String>>(err: sqlx::Error, value: V) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let message = db_err.message();
            if message.contains("UNIQUE constraint failed") {
                let constraint = message
                    .rsplit(':')
                    .next()
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|| "unique".to_string());
                return Self::Duplicate {
                    constraint,
                    value: value.into(),
                };
            }
        }
        Self::Query(err)
    }
}
