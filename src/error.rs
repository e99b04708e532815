//! Transport-level failure taxonomy.
//!
//! # Responsibilities
//! - Define the closed set of (status, code) pairs the core can emit
//! - Give handlers typed failure values to raise with `?`
//! - Render any failure as a wire response carrying only the quoted code
//!
//! # Design Decisions
//! - Mapping is a total `match` over [`ErrorKind`], never a chain of type tests
//! - Validation failures keep their own stable code and always answer 400
//! - Internal details are logged, never serialized to the client

use std::any::Any;
use std::borrow::Cow;

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

/// Boxed error used as the cause of an internal failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used by handlers and the dispatcher.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Closed set of transport-level failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    MethodNotAllowed,
    PayloadTooLarge,
    BadRequest,
    Unauthorized,
    Forbidden,
    Internal,
    NotImplemented,
}

impl ErrorKind {
    /// Every kind, in status order.
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::BadRequest,
        ErrorKind::Unauthorized,
        ErrorKind::Forbidden,
        ErrorKind::NotFound,
        ErrorKind::MethodNotAllowed,
        ErrorKind::PayloadTooLarge,
        ErrorKind::Internal,
        ErrorKind::NotImplemented,
    ];

    /// HTTP status sent for this kind.
    pub const fn status(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// Stable machine-readable code written as the response body.
    pub const fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorKind::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::Internal => "INTERNAL_ERROR",
            ErrorKind::NotImplemented => "NOT_IMPLEMENTED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Failure reported by a schema-checking collaborator.
///
/// Answered with 400 and `code` verbatim; `message` stays server-side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ValidationError {
    code: Cow<'static, str>,
    message: String,
}

impl ValidationError {
    pub fn new(code: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure raised by a handler or by the dispatcher itself.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One of the fixed transport failures.
    #[error("{0}")]
    Http(ErrorKind),

    /// Schema validation failure with its own stable code.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Anything unclassified. Always answered as `INTERNAL_ERROR`.
    #[error("internal error: {0}")]
    Internal(#[source] BoxError),
}

impl Error {
    pub fn not_found() -> Self {
        Error::Http(ErrorKind::NotFound)
    }

    pub fn method_not_allowed() -> Self {
        Error::Http(ErrorKind::MethodNotAllowed)
    }

    pub fn payload_too_large() -> Self {
        Error::Http(ErrorKind::PayloadTooLarge)
    }

    pub fn bad_request() -> Self {
        Error::Http(ErrorKind::BadRequest)
    }

    pub fn unauthorized() -> Self {
        Error::Http(ErrorKind::Unauthorized)
    }

    pub fn forbidden() -> Self {
        Error::Http(ErrorKind::Forbidden)
    }

    pub fn not_implemented() -> Self {
        Error::Http(ErrorKind::NotImplemented)
    }

    pub fn internal(cause: impl Into<BoxError>) -> Self {
        Error::Internal(cause.into())
    }

    pub fn validation(code: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Error::Validation(ValidationError::new(code, message))
    }

    /// Status this failure is answered with.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Http(kind) => kind.status(),
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Internal(_) => ErrorKind::Internal.status(),
        }
    }

    /// Code written to the wire.
    pub fn code(&self) -> &str {
        match self {
            Error::Http(kind) => kind.code(),
            Error::Validation(v) => v.code(),
            Error::Internal(_) => ErrorKind::Internal.code(),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::Http(kind)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(Box::new(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(Box::new(e))
    }
}

impl From<axum::Error> for Error {
    fn from(e: axum::Error) -> Self {
        Error::Internal(Box::new(e))
    }
}

/// A handler panicked. The payload text is kept for logs only.
#[derive(Debug, thiserror::Error)]
#[error("handler panicked: {0}")]
pub(crate) struct HandlerPanic(String);

impl HandlerPanic {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self(message)
    }
}

/// Build a response whose body is `code` as a JSON string literal.
pub(crate) fn coded_response(status: StatusCode, code: &str) -> Response {
    // Serializing a &str cannot fail.
    let body = serde_json::to_string(code).unwrap_or_else(|_| String::from("\"INTERNAL_ERROR\""));
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Error::Internal(cause) = &self {
            tracing::error!(error = %cause, "Handler failed with unclassified error");
        }
        coded_response(self.status(), self.code())
    }
}
