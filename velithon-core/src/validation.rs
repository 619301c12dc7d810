//! Validation error formatting (part of C11) and the `garde`-based
//! autoref-specialization trick the route macro uses to auto-validate
//! extracted body/form/query types that implement `garde::Validate`.

use std::sync::Arc;

use crate::error::{FieldError, VelithonError};
use crate::response::{IntoResponse, Response};

/// How a route's validation failures get rendered into a `Response`.
/// Precedence when a request fails parameter/body validation is
/// route-level formatter, then router-level, then the app-wide default —
/// the first one present wins.
pub trait ValidationErrorFormatter: Send + Sync {
    fn format(&self, errors: Vec<FieldError>) -> Response;
}

/// Renders the spec's standard `{"error": {"code": ..., "errors": [...]}}` shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFormatter;

impl ValidationErrorFormatter for DefaultFormatter {
    fn format(&self, errors: Vec<FieldError>) -> Response {
        VelithonError::ValidationFailed(errors).into_response()
    }
}

/// Flattens to a bare list of `"field: message"` strings. Handy for clients
/// that don't parse structured error bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleFormatter;

impl ValidationErrorFormatter for SimpleFormatter {
    fn format(&self, errors: Vec<FieldError>) -> Response {
        let messages: Vec<String> = errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        let body = serde_json::json!({ "detail": messages });
        (http::StatusCode::UNPROCESSABLE_ENTITY, crate::response::Json(body)).into_response()
    }
}

/// Emits a JSON-Schema-flavored error document (`"instancePath"`/`"keyword"`),
/// for clients that already speak that convention for validation errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSchemaFormatter;

impl ValidationErrorFormatter for JsonSchemaFormatter {
    fn format(&self, errors: Vec<FieldError>) -> Response {
        let items: Vec<_> = errors
            .iter()
            .map(|e| {
                serde_json::json!({
                    "instancePath": format!("/{}", e.field),
                    "keyword": e.kind,
                    "message": e.message,
                })
            })
            .collect();
        let body = serde_json::json!({ "errors": items });
        (http::StatusCode::UNPROCESSABLE_ENTITY, crate::response::Json(body)).into_response()
    }
}

/// Resolve route > router > app precedence; falls back to `DefaultFormatter`.
pub fn resolve_formatter(
    route: Option<&Arc<dyn ValidationErrorFormatter>>,
    router: Option<&Arc<dyn ValidationErrorFormatter>>,
    app: Option<&Arc<dyn ValidationErrorFormatter>>,
) -> Arc<dyn ValidationErrorFormatter> {
    route
        .or(router)
        .or(app)
        .cloned()
        .unwrap_or_else(|| Arc::new(DefaultFormatter))
}

// ── Autoref specialization for automatic body/form validation ──────────
//
// Generated handler code calls:
//   (&__AutoValidator(&value)).__maybe_validate()
// Method resolution picks `__DoValidate` (direct match, higher priority)
// when `T: garde::Validate<Context = ()>`, else falls back to the
// `__SkipValidate` blanket impl via autoref — a no-op for types that don't
// implement `Validate` at all.

pub struct __AutoValidator<'a, T>(pub &'a T);

pub trait __DoValidate {
    fn __maybe_validate(&self) -> Result<(), Response>;
}

impl<T: garde::Validate> __DoValidate for __AutoValidator<'_, T>
where
    T::Context: Default,
{
    fn __maybe_validate(&self) -> Result<(), Response> {
        self.0.validate().map_err(|report| convert_garde_report(&report))
    }
}

pub trait __SkipValidate {
    fn __maybe_validate(&self) -> Result<(), Response>;
}

impl<T> __SkipValidate for &__AutoValidator<'_, T> {
    fn __maybe_validate(&self) -> Result<(), Response> {
        Ok(())
    }
}

fn convert_garde_report(report: &garde::Report) -> Response {
    let errors: Vec<FieldError> = report
        .iter()
        .map(|(path, error)| {
            let field = {
                let s = path.to_string();
                if s.is_empty() { "value".to_string() } else { s }
            };
            FieldError {
                field,
                message: error.message().to_string(),
                kind: "validation_error".to_string(),
                input: None,
            }
        })
        .collect();
    DefaultFormatter.format(errors)
}

pub use garde::Validate;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_errors() -> Vec<FieldError> {
        vec![FieldError {
            field: "age".into(),
            message: "must be >= 0".into(),
            kind: "value_error".into(),
            input: None,
        }]
    }

    #[test]
    fn default_formatter_uses_structured_error_shape() {
        let resp = DefaultFormatter.format(sample_errors());
        assert_eq!(resp.status, http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn simple_formatter_flattens_to_strings() {
        let resp = SimpleFormatter.format(sample_errors());
        assert_eq!(resp.status, http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn resolve_formatter_prefers_route_over_router_over_app() {
        let route: Arc<dyn ValidationErrorFormatter> = Arc::new(SimpleFormatter);
        let router: Arc<dyn ValidationErrorFormatter> = Arc::new(JsonSchemaFormatter);
        let picked = resolve_formatter(Some(&route), Some(&router), None);
        assert!(!picked.format(sample_errors()).status.is_success());
    }

    #[test]
    fn resolve_formatter_falls_back_to_default() {
        let picked = resolve_formatter(None, None, None);
        let resp = picked.format(sample_errors());
        assert_eq!(resp.status, http::StatusCode::UNPROCESSABLE_ENTITY);
    }
}
