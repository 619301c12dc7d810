//! Typed exception hierarchy and HTTP status mapping (C11).
//!
//! spec.md §4.11: ten kinds, each with a default message, a stable machine
//! code, and an optional structured payload. Non-typed exceptions become
//! `InternalError` with a logged traceback (see `VelithonError::internal`).

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::response::{IntoResponse, Json, Response};

/// A single validation failure, as surfaced to a `ValidationErrorFormatter`.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub input: Option<Value>,
}

/// The framework's typed exception hierarchy. Every kind carries a stable
/// machine `code` and maps to a fixed default HTTP status; user code may
/// override the payload via `with_payload`.
pub enum VelithonError {
    BadRequest(String),
    ValidationFailed(Vec<FieldError>),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    MethodNotAllowed { allowed: Vec<String> },
    UnsupportedMediaType(String),
    RateLimited(String),
    Conflict(String),
    InternalError(String),
    /// Escape hatch for app-defined status/body pairs (used by `Custom`
    /// responses that don't fit the ten named kinds).
    Custom { status: StatusCode, body: Value },
}

impl VelithonError {
    pub fn status(&self) -> StatusCode {
        match self {
            VelithonError::BadRequest(_) => StatusCode::BAD_REQUEST,
            VelithonError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            VelithonError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            VelithonError::Forbidden(_) => StatusCode::FORBIDDEN,
            VelithonError::NotFound(_) => StatusCode::NOT_FOUND,
            VelithonError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            VelithonError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            VelithonError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            VelithonError::Conflict(_) => StatusCode::CONFLICT,
            VelithonError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            VelithonError::Custom { status, .. } => *status,
        }
    }

    /// The stable machine code used for logging/correlation, independent of
    /// the human message (which callers may override).
    pub fn code(&self) -> &'static str {
        match self {
            VelithonError::BadRequest(_) => "bad_request",
            VelithonError::ValidationFailed(_) => "validation_failed",
            VelithonError::Unauthorized(_) => "unauthorized",
            VelithonError::Forbidden(_) => "forbidden",
            VelithonError::NotFound(_) => "not_found",
            VelithonError::MethodNotAllowed { .. } => "method_not_allowed",
            VelithonError::UnsupportedMediaType(_) => "unsupported_media_type",
            VelithonError::RateLimited(_) => "rate_limited",
            VelithonError::Conflict(_) => "conflict",
            VelithonError::InternalError(_) => "internal_error",
            VelithonError::Custom { .. } => "custom",
        }
    }

    /// Wrap a non-typed error as `InternalError`, logging it the way an
    /// uncaught exception crossing the middleware chain is logged per
    /// spec.md §4.4 / §7.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "uncaught error converted to InternalError");
        VelithonError::InternalError(err.to_string())
    }

    pub fn custom(status: StatusCode, body: Value) -> Self {
        VelithonError::Custom { status, body }
    }
}

impl IntoResponse for VelithonError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let allow_header = match &self {
            VelithonError::MethodNotAllowed { allowed } => Some(allowed.join(", ")),
            _ => None,
        };
        let body = match self {
            VelithonError::ValidationFailed(errors) => serde_json::json!({
                "error": { "code": code, "errors": errors }
            }),
            VelithonError::MethodNotAllowed { allowed } => serde_json::json!({
                "error": { "code": code, "allowed": allowed }
            }),
            VelithonError::Custom { body, .. } => body,
            VelithonError::BadRequest(msg)
            | VelithonError::Unauthorized(msg)
            | VelithonError::Forbidden(msg)
            | VelithonError::NotFound(msg)
            | VelithonError::UnsupportedMediaType(msg)
            | VelithonError::RateLimited(msg)
            | VelithonError::Conflict(msg)
            | VelithonError::InternalError(msg) => serde_json::json!({ "detail": msg }),
        };
        let mut resp = (status, Json(body)).into_response();
        if let Some(allow_value) = allow_header {
            if let Ok(value) = http::HeaderValue::from_str(&allow_value) {
                resp.headers.insert(http::header::ALLOW, value);
            }
        }
        resp
    }
}

impl std::fmt::Display for VelithonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VelithonError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            VelithonError::ValidationFailed(errs) => write!(f, "Validation Failed: {} errors", errs.len()),
            VelithonError::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            VelithonError::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            VelithonError::NotFound(msg) => write!(f, "Not Found: {msg}"),
            VelithonError::MethodNotAllowed { allowed } => {
                write!(f, "Method Not Allowed (allowed: {})", allowed.join(", "))
            }
            VelithonError::UnsupportedMediaType(msg) => write!(f, "Unsupported Media Type: {msg}"),
            VelithonError::RateLimited(msg) => write!(f, "Rate Limited: {msg}"),
            VelithonError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            VelithonError::InternalError(msg) => write!(f, "Internal Error: {msg}"),
            VelithonError::Custom { status, body } => write!(f, "Custom Error ({status}): {body}"),
        }
    }
}

impl std::fmt::Debug for VelithonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for VelithonError {}

impl From<std::io::Error> for VelithonError {
    fn from(err: std::io::Error) -> Self {
        VelithonError::internal(err)
    }
}

impl From<crate::di::BeanError> for VelithonError {
    fn from(err: crate::di::BeanError) -> Self {
        VelithonError::internal(err)
    }
}

impl From<crate::resolver::ResolverError> for VelithonError {
    fn from(err: crate::resolver::ResolverError) -> Self {
        err.into_velithon_error()
    }
}

/// Generate `From<E> for VelithonError` implementations that map error types
/// to a specific `VelithonError` variant carrying the error's `Display`.
///
/// ```ignore
/// velithon_core::map_error! {
///     sqlx::Error => InternalError,
///     std::num::ParseIntError => BadRequest,
/// }
/// ```
#[macro_export]
macro_rules! map_error {
    ( $( $err_ty:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$err_ty> for $crate::error::VelithonError {
                fn from(err: $err_ty) -> Self {
                    $crate::error::VelithonError::$variant(err.to_string())
                }
            }
        )*
    };
}
