//! Parameter resolver (C5).
//!
//! `ParameterSpec` is derived once per handler at registration time (see
//! `velithon-macros`'s route-attribute expansion) and cached; this module
//! supplies the per-source extraction rules the generated dispatch code
//! calls against a `ParameterSpec` and the current `Request`/DI context.

use std::collections::HashMap;
use std::str::FromStr;

use serde::de::DeserializeOwned;

use crate::di::BeanContext;
use crate::error::{FieldError, VelithonError};
use crate::pattern::CapturedValue;
use crate::scope::Request;

/// Where a handler parameter's value comes from, per spec.md §4.5's
/// classification algorithm (run once, at registration time, by the
/// route-attribute macro — never per request).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSource {
    Path,
    Query,
    Header,
    Cookie,
    BodyJson,
    Form,
    File,
    Dependency,
    RequestObject,
    ScopeObject,
}

/// A handler parameter's derived metadata. Immutable once built; one
/// `ParameterSpec` sequence is memoized per handler identity.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub name: String,
    pub source: ParameterSource,
    pub alias: Option<String>,
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

impl ParameterSpec {
    pub fn lookup_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("required parameter '{0}' is missing")]
    MissingRequired(String),
    #[error("parameter '{field}' failed conversion: {message}")]
    ConversionFailed { field: String, message: String },
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("unsupported content type '{0}' for form/multipart parsing")]
    UnsupportedMediaType(String),
    #[error(transparent)]
    Bean(#[from] crate::di::BeanError),
}

impl ResolverError {
    pub fn into_velithon_error(self) -> VelithonError {
        match self {
            ResolverError::MissingRequired(field) => VelithonError::ValidationFailed(vec![FieldError {
                field,
                message: "field required".into(),
                kind: "missing".into(),
                input: None,
            }]),
            ResolverError::ConversionFailed { field, message } => {
                VelithonError::ValidationFailed(vec![FieldError {
                    field,
                    message,
                    kind: "type_error".into(),
                    input: None,
                }])
            }
            ResolverError::InvalidJson(message) => VelithonError::BadRequest(message),
            ResolverError::UnsupportedMediaType(ct) => VelithonError::UnsupportedMediaType(ct),
            ResolverError::Bean(err) => VelithonError::internal(err),
        }
    }
}

/// Anything a path/query/header convertor target can be parsed into. Blanket
/// implemented for `FromStr` types plus `CapturedValue` passthrough.
pub trait ScalarParse: Sized {
    fn parse_scalar(raw: &str) -> Result<Self, String>;
}

impl ScalarParse for String {
    fn parse_scalar(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

impl ScalarParse for i64 {
    fn parse_scalar(raw: &str) -> Result<Self, String> {
        raw.parse().map_err(|_| format!("'{raw}' is not an integer"))
    }
}

impl ScalarParse for f64 {
    fn parse_scalar(raw: &str) -> Result<Self, String> {
        raw.parse().map_err(|_| format!("'{raw}' is not a float"))
    }
}

impl ScalarParse for bool {
    fn parse_scalar(raw: &str) -> Result<Self, String> {
        // spec.md §4.5: `true|1|yes|on` -> true, case-insensitively for the rest.
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(format!("'{other}' is not a boolean")),
        }
    }
}

impl ScalarParse for uuid::Uuid {
    fn parse_scalar(raw: &str) -> Result<Self, String> {
        uuid::Uuid::from_str(raw).map_err(|e| e.to_string())
    }
}

/// Extract a *path* parameter: already typed by the convertor (spec.md §4.5 "path").
pub fn resolve_path(
    spec: &ParameterSpec,
    captures: &HashMap<String, CapturedValue>,
) -> Result<CapturedValue, ResolverError> {
    captures
        .get(spec.lookup_key())
        .cloned()
        .ok_or_else(|| ResolverError::MissingRequired(spec.name.clone()))
}

/// Extract a single scalar *query* parameter, case-sensitive by name/alias.
pub fn resolve_query_scalar<T: ScalarParse>(
    spec: &ParameterSpec,
    req: &Request,
) -> Result<Option<T>, ResolverError> {
    let values = req.query_values(spec.lookup_key());
    match values.first() {
        Some(raw) => T::parse_scalar(raw)
            .map(Some)
            .map_err(|message| ResolverError::ConversionFailed {
                field: spec.name.clone(),
                message,
            }),
        None if spec.required => Err(ResolverError::MissingRequired(spec.name.clone())),
        None => Ok(None),
    }
}

/// Extract a sequence-typed *query* parameter: all repetitions, in order.
pub fn resolve_query_seq<T: ScalarParse>(
    spec: &ParameterSpec,
    req: &Request,
) -> Result<Vec<T>, ResolverError> {
    req.query_values(spec.lookup_key())
        .into_iter()
        .map(|raw| {
            T::parse_scalar(raw).map_err(|message| ResolverError::ConversionFailed {
                field: spec.name.clone(),
                message,
            })
        })
        .collect()
}

/// Extract a *header* value, case-insensitive lookup by alias-or-name.
pub fn resolve_header(spec: &ParameterSpec, req: &Request) -> Result<Option<String>, ResolverError> {
    match req.header(spec.lookup_key()) {
        Some(value) => Ok(Some(value.to_string())),
        None if spec.required => Err(ResolverError::MissingRequired(spec.name.clone())),
        None => Ok(None),
    }
}

/// Extract all values of a multi-valued header as a list, when declared.
pub fn resolve_header_multi(spec: &ParameterSpec, req: &Request) -> Vec<String> {
    req.headers()
        .get_all(spec.lookup_key())
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// Extract a cookie by name from the `Cookie` request header.
pub fn resolve_cookie(spec: &ParameterSpec, req: &Request) -> Result<Option<String>, ResolverError> {
    let header = match req.header("cookie") {
        Some(h) => h,
        None if spec.required => return Err(ResolverError::MissingRequired(spec.name.clone())),
        None => return Ok(None),
    };
    let key = spec.lookup_key();
    for part in header.split(';') {
        let part = part.trim();
        if let Some((name, value)) = part.split_once('=') {
            if name == key {
                return Ok(Some(value.to_string()));
            }
        }
    }
    if spec.required {
        Err(ResolverError::MissingRequired(spec.name.clone()))
    } else {
        Ok(None)
    }
}

/// Parse the body once as JSON and deserialize into `T`, per spec.md §4.5 "body-json".
pub fn resolve_body_json<T: DeserializeOwned>(req: &Request) -> Result<T, ResolverError> {
    serde_json::from_slice(req.body()).map_err(|e| ResolverError::InvalidJson(e.to_string()))
}

/// Parse `application/x-www-form-urlencoded` body into key-value pairs.
/// Content-Type mismatch yields `UnsupportedMediaType` (HTTP 415).
pub fn resolve_urlencoded_form(req: &Request) -> Result<Vec<(String, String)>, ResolverError> {
    match req.content_type() {
        Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => Ok(form_urlencoded::parse(req.body())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()),
        other => Err(ResolverError::UnsupportedMediaType(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

/// Parse an `application/x-www-form-urlencoded` body into a typed struct,
/// by round-tripping the decoded pairs through a JSON object so any
/// `DeserializeOwned` target works without a dedicated urlencoded-serde crate.
pub fn resolve_form<T: DeserializeOwned>(req: &Request) -> Result<T, ResolverError> {
    let pairs = resolve_urlencoded_form(req)?;
    let mut map = serde_json::Map::with_capacity(pairs.len());
    for (k, v) in pairs {
        map.insert(k, serde_json::Value::String(v));
    }
    serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|e| ResolverError::InvalidJson(e.to_string()))
}

/// Extract a single required file from a `multipart/form-data` body.
#[cfg(feature = "multipart")]
pub async fn resolve_file(
    spec: &ParameterSpec,
    req: &Request,
) -> Result<crate::extract::UploadedFile, ResolverError> {
    let fields = req
        .multipart_fields()
        .await
        .map_err(|e| ResolverError::UnsupportedMediaType(e.to_string()))?;
    let mut fields = fields.lock().await;
    fields
        .take_file(spec.lookup_key())
        .ok_or_else(|| ResolverError::MissingRequired(spec.name.clone()))
}

/// Extract a single text field from a `multipart/form-data` body.
#[cfg(feature = "multipart")]
pub async fn resolve_multipart_text(
    spec: &ParameterSpec,
    req: &Request,
) -> Result<Option<String>, ResolverError> {
    let fields = req
        .multipart_fields()
        .await
        .map_err(|e| ResolverError::UnsupportedMediaType(e.to_string()))?;
    let mut fields = fields.lock().await;
    match fields.take_text(spec.lookup_key()) {
        Some(value) => Ok(Some(value)),
        None if spec.required => Err(ResolverError::MissingRequired(spec.name.clone())),
        None => Ok(None),
    }
}

/// Resolve a `dependency`-sourced parameter through the DI container (C6).
pub async fn resolve_dependency<T: Send + Sync + 'static>(
    ctx: &BeanContext,
) -> Result<std::sync::Arc<T>, ResolverError> {
    ctx.resolve::<T>().await.map_err(ResolverError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, source: ParameterSource, required: bool) -> ParameterSpec {
        ParameterSpec {
            name: name.to_string(),
            source,
            alias: None,
            required,
            default: None,
        }
    }

    fn req_with_query(query: &str) -> Request {
        use crate::scope::{ProtocolKind, Scope};
        use std::sync::Arc;
        let scope = Arc::new(Scope::new(
            ProtocolKind::Http,
            http::Method::GET,
            "/".into(),
            Some(query.to_string()),
            http::HeaderMap::new(),
            None,
            "req".into(),
        ));
        Request::new(scope, bytes::Bytes::new())
    }

    #[test]
    fn bool_scalar_accepts_spec_truthy_values() {
        assert_eq!(bool::parse_scalar("yes"), Ok(true));
        assert_eq!(bool::parse_scalar("on"), Ok(true));
        assert_eq!(bool::parse_scalar("0"), Ok(false));
        assert!(bool::parse_scalar("maybe").is_err());
    }

    #[test]
    fn required_query_scalar_missing_errors() {
        let req = req_with_query("");
        let spec = spec("limit", ParameterSource::Query, true);
        let err = resolve_query_scalar::<i64>(&spec, &req).unwrap_err();
        assert!(matches!(err, ResolverError::MissingRequired(_)));
    }

    #[test]
    fn optional_query_scalar_missing_is_none() {
        let req = req_with_query("");
        let spec = spec("limit", ParameterSource::Query, false);
        assert_eq!(resolve_query_scalar::<i64>(&spec, &req).unwrap(), None);
    }

    #[test]
    fn query_scalar_converts_and_validates() {
        let req = req_with_query("limit=5");
        let spec = spec("limit", ParameterSource::Query, true);
        assert_eq!(resolve_query_scalar::<i64>(&spec, &req).unwrap(), Some(5));
    }

    #[test]
    fn query_seq_collects_all_repetitions_in_order() {
        let req = req_with_query("tag=a&tag=b&tag=c");
        let spec = spec("tag", ParameterSource::Query, false);
        assert_eq!(resolve_query_seq::<String>(&spec, &req).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn body_json_deserializes_into_target_type() {
        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct Item {
            id: u32,
        }
        let scope_req = {
            use crate::scope::{ProtocolKind, Scope};
            use std::sync::Arc;
            let scope = Arc::new(Scope::new(
                ProtocolKind::Http,
                http::Method::POST,
                "/".into(),
                None,
                http::HeaderMap::new(),
                None,
                "req".into(),
            ));
            Request::new(scope, bytes::Bytes::from_static(br#"{"id":7}"#))
        };
        let item: Item = resolve_body_json(&scope_req).unwrap();
        assert_eq!(item, Item { id: 7 });
    }

    #[test]
    fn cookie_lookup_finds_named_cookie_among_several() {
        use crate::scope::{ProtocolKind, Scope};
        use std::sync::Arc;
        let mut headers = http::HeaderMap::new();
        headers.insert(
            "cookie",
            http::HeaderValue::from_static("a=1; session=abc; b=2"),
        );
        let scope = Arc::new(Scope::new(
            ProtocolKind::Http,
            http::Method::GET,
            "/".into(),
            None,
            headers,
            None,
            "req".into(),
        ));
        let req = Request::new(scope, bytes::Bytes::new());
        let spec = spec("session", ParameterSource::Cookie, true);
        assert_eq!(resolve_cookie(&spec, &req).unwrap(), Some("abc".to_string()));
    }
}
