//! Error types for procedure dispatch.
//!
//! Every failure surfaced to a client is an [`RpcError`] carrying a
//! type-safe [`RpcErrorKind`]. When serialized, kinds are converted to
//! SCREAMING_SNAKE_CASE strings, so `ValidationError` becomes
//! `"VALIDATION_ERROR"` on the wire.
//!
//! # Example
//! ```rust,ignore
//! use brpc::{RpcError, RpcErrorKind};
//!
//! let error = RpcError::new(RpcErrorKind::NotFound, "message not found");
//! let error = RpcError::unauthorized("missing session token"); // convenience
//! ```

use crate::validation::FieldError;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Type-safe error kinds for procedure dispatch.
///
/// Kinds categorize failures into client errors (HTTP 4xx equivalent),
/// server errors (5xx equivalent), and dispatch-specific errors. The HTTP
/// layer derives response status codes from the kind via
/// [`RpcErrorKind::http_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorKind {
    // Client errors (4xx equivalent)
    /// The request was malformed or invalid
    BadRequest,
    /// Authentication is required
    Unauthorized,
    /// The authenticated user lacks permission
    Forbidden,
    /// The requested resource was not found
    NotFound,
    /// Input validation failed
    ValidationError,
    /// The request payload exceeds size limits
    PayloadTooLarge,
    /// The request method does not match the procedure's kind
    MethodNotAllowed,

    // Server errors (5xx equivalent)
    /// An unexpected internal error occurred
    InternalError,

    // Dispatch-specific errors
    /// No procedure is registered for the requested path
    ProcedureNotFound,
    /// A middleware rejected the request
    MiddlewareError,
    /// A subscription handler failed for one subscriber
    SubscriptionError,
    /// JSON serialization/deserialization failed
    SerializationError,
}

impl RpcErrorKind {
    /// Returns the string representation of the error kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ProcedureNotFound => "PROCEDURE_NOT_FOUND",
            Self::MiddlewareError => "MIDDLEWARE_ERROR",
            Self::SubscriptionError => "SUBSCRIPTION_ERROR",
            Self::SerializationError => "SERIALIZATION_ERROR",
        }
    }

    /// Returns true if this is a client error (4xx equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::BadRequest
                | Self::Unauthorized
                | Self::Forbidden
                | Self::NotFound
                | Self::ValidationError
                | Self::PayloadTooLarge
                | Self::MethodNotAllowed
                | Self::ProcedureNotFound
                | Self::MiddlewareError
        )
    }

    /// Returns true if this is a server error (5xx equivalent).
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::InternalError | Self::SubscriptionError | Self::SerializationError
        )
    }

    /// HTTP status for responses carrying an error of this kind.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::BadRequest | Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::MiddlewareError => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound | Self::ProcedureNotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InternalError | Self::SubscriptionError | Self::SerializationError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dispatch error with a type-safe kind and message.
///
/// Validation failures additionally carry field-scoped detail in `fields`.
/// The `cause` string is debugging context and is stripped from internal
/// errors by [`RpcError::sanitize`] before a client sees them.
///
/// # Example
/// ```rust,ignore
/// use brpc::{FieldError, RpcError};
///
/// let error = RpcError::validation(vec![FieldError::required("username")]);
/// let error = RpcError::internal("db down").with_cause("connection refused");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("[{kind}] {message}")]
pub struct RpcError {
    /// Type-safe error kind
    pub kind: RpcErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Field-scoped validation detail
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fields: Option<Vec<FieldError>>,
    /// Optional cause for debugging
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cause: Option<String>,
}

impl RpcError {
    /// Create a new error with kind and message.
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fields: None,
            cause: None,
        }
    }

    /// Attach field-scoped detail to the error.
    pub fn with_fields(mut self, fields: Vec<FieldError>) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Attach a cause string for debugging.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Sanitize the error for a client response.
    ///
    /// Internal errors are replaced with a generic message so internal
    /// detail never leaks; all other kinds pass through unchanged.
    pub fn sanitize(mut self) -> Self {
        if matches!(self.kind, RpcErrorKind::InternalError) {
            self.message = "an internal error occurred".to_string();
            self.fields = None;
            self.cause = None;
        }
        self
    }

    // Convenience constructors

    /// Create a BAD_REQUEST error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::BadRequest, message)
    }

    /// Create an UNAUTHORIZED error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Unauthorized, message)
    }

    /// Create a FORBIDDEN error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Forbidden, message)
    }

    /// Create a NOT_FOUND error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::NotFound, message)
    }

    /// Create a VALIDATION_ERROR carrying field-scoped detail.
    pub fn validation(fields: Vec<FieldError>) -> Self {
        Self::new(RpcErrorKind::ValidationError, "input validation failed").with_fields(fields)
    }

    /// Create a VALIDATION_ERROR for input that failed to deserialize.
    pub fn invalid_input(detail: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::ValidationError, "invalid input")
            .with_fields(vec![FieldError::new("input", detail)])
    }

    /// Create a PAYLOAD_TOO_LARGE error.
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::PayloadTooLarge, message)
    }

    /// Create a METHOD_NOT_ALLOWED error for a kind/method mismatch.
    pub fn method_not_allowed(path: &str, kind: impl fmt::Display) -> Self {
        Self::new(
            RpcErrorKind::MethodNotAllowed,
            format!("procedure '{}' is a {}; method not allowed", path, kind),
        )
    }

    /// Create an INTERNAL_ERROR error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::InternalError, message)
    }

    /// Create a PROCEDURE_NOT_FOUND error.
    pub fn procedure_not_found(path: &str) -> Self {
        Self::new(
            RpcErrorKind::ProcedureNotFound,
            format!("procedure '{}' not found", path),
        )
    }

    /// Create a MIDDLEWARE_ERROR error.
    pub fn middleware(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::MiddlewareError, message)
    }

    /// Create a SUBSCRIPTION_ERROR error.
    pub fn subscription(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::SubscriptionError, message)
    }

    /// Create a SERIALIZATION_ERROR error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::SerializationError, message)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

impl From<crate::stream::EmitError> for RpcError {
    fn from(err: crate::stream::EmitError) -> Self {
        Self::internal(err.to_string())
    }
}

/// Result type alias for procedure dispatch.
pub type RpcResult<T> = Result<T, RpcError>;
