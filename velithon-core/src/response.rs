//! Response writer (C7).
//!
//! Handlers return either a [`Response`] directly or a raw value that is
//! auto-wrapped per spec.md §4.7. Serialization goes through a single
//! framework-wide JSON encoder with a tiny cache for trivial repeated
//! small-string responses.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;

use bytes::Bytes;
use futures_core::Stream;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use once_cell::sync::Lazy;
use serde::Serialize;

/// A `bytes`-backed, possibly-streamed response body.
pub enum Body {
    Buffered(Bytes),
    Streaming(Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>),
}

impl Body {
    pub fn empty() -> Self {
        Body::Buffered(Bytes::new())
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Body::Buffered(bytes.into())
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self, Body::Buffered(_))
    }

    pub fn as_buffered(&self) -> Option<&Bytes> {
        match self {
            Body::Buffered(b) => Some(b),
            Body::Streaming(_) => None,
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Buffered(b) => write!(f, "Body::Buffered({} bytes)", b.len()),
            Body::Streaming(_) => write!(f, "Body::Streaming"),
        }
    }
}

/// A background task scheduled to run after the response has been fully
/// written. Failures are logged but never alter the already-sent response.
pub struct BackgroundTask(
    Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
);

impl BackgroundTask {
    pub fn new<F>(fut: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        BackgroundTask(Box::pin(fut))
    }

    pub(crate) async fn run(self) {
        self.0.await;
    }
}

/// A `Set-Cookie` directive; cookie mutations append, never combine.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub max_age: Option<i64>,
    pub expires: Option<String>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
            max_age: None,
            expires: None,
            path: Some("/".to_string()),
            domain: None,
            secure: false,
            http_only: true,
            same_site: Some(SameSite::Lax),
        }
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(age) = self.max_age {
            out.push_str(&format!("; Max-Age={age}"));
        }
        if let Some(ref expires) = self.expires {
            out.push_str(&format!("; Expires={expires}"));
        }
        if let Some(ref path) = self.path {
            out.push_str(&format!("; Path={path}"));
        }
        if let Some(ref domain) = self.domain {
            out.push_str(&format!("; Domain={domain}"));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if let Some(same_site) = self.same_site {
            out.push_str(&format!("; SameSite={}", same_site.as_str()));
        }
        out
    }
}

/// The HTTP response produced by a handler after passing through the writer.
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
    pub cookies: Vec<Cookie>,
    pub background: Vec<BackgroundTask>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("cookies", &self.cookies.len())
            .finish()
    }
}

impl Response {
    pub fn new(status: StatusCode, body: Body) -> Self {
        Response {
            status,
            headers: HeaderMap::new(),
            body,
            cookies: Vec::new(),
            background: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    pub fn with_background(mut self, task: BackgroundTask) -> Self {
        self.background.push(task);
        self
    }

    /// Fill `Content-Length`/`Content-Type`/`server` headers and append
    /// `Set-Cookie` lines, per spec.md §4.7. Called once, right before the
    /// adapter writes the response.
    pub fn finalize(&mut self) {
        let no_length_allowed = self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED;

        if let Body::Buffered(bytes) = &self.body {
            if !no_length_allowed && !self.headers.contains_key(http::header::CONTENT_LENGTH) {
                self.headers.insert(
                    http::header::CONTENT_LENGTH,
                    HeaderValue::from_str(&bytes.len().to_string()).unwrap(),
                );
            }
        }
        if !self.headers.contains_key(http::header::CONTENT_TYPE) {
            self.headers.insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
        }
        if !self.headers.contains_key("server") {
            self.headers
                .insert(HeaderName::from_static("server"), HeaderValue::from_static("velithon"));
        }
        for cookie in &self.cookies {
            if let Ok(value) = HeaderValue::from_str(&cookie.to_header_value()) {
                self.headers.append(http::header::SET_COOKIE, value);
            }
        }
    }

    /// Run any background tasks after the response has been sent. Failures
    /// are logged, never surfaced to the client.
    pub async fn run_background_tasks(self) {
        for task in self.background {
            task.run().await;
        }
    }
}

/// Trait implemented by anything a handler may return. Raw values are
/// auto-wrapped per spec.md §4.7; `Response` passes through unchanged.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl IntoResponse for () {
    fn into_response(self) -> Response {
        Response::new(StatusCode::NO_CONTENT, Body::empty())
    }
}

impl<T: IntoResponse> IntoResponse for Option<T> {
    fn into_response(self) -> Response {
        match self {
            Some(v) => v.into_response(),
            None => Response::new(StatusCode::NO_CONTENT, Body::empty()),
        }
    }
}

impl IntoResponse for Vec<u8> {
    fn into_response(self) -> Response {
        Response::new(StatusCode::OK, Body::from_bytes(self))
            .with_header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            )
    }
}

impl IntoResponse for Bytes {
    fn into_response(self) -> Response {
        Response::new(StatusCode::OK, Body::from_bytes(self))
            .with_header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            )
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        text_response(self)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        text_response(self.to_string())
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response {
        Response::new(self, Body::empty())
    }
}

impl<T: IntoResponse> IntoResponse for (StatusCode, T) {
    fn into_response(self) -> Response {
        let mut resp = self.1.into_response();
        resp.status = self.0;
        resp
    }
}

impl<T: IntoResponse, E: IntoResponse> IntoResponse for Result<T, E> {
    fn into_response(self) -> Response {
        match self {
            Ok(v) => v.into_response(),
            Err(e) => e.into_response(),
        }
    }
}

/// Wraps any `Serialize` value as a canonical JSON response (UTF-8, no
/// ASCII escaping), per spec.md §4.7's "mapping / sequence / scalar" case.
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        match encode_json(&self.0) {
            Ok(bytes) => Response::new(StatusCode::OK, Body::from_bytes(bytes)).with_header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            ),
            Err(err) => {
                tracing::error!(error = %err, "failed to JSON-encode handler response");
                Response::new(StatusCode::INTERNAL_SERVER_ERROR, Body::empty())
            }
        }
    }
}

const SMALL_STRING_CACHE_CAP: usize = 50;
const SMALL_STRING_MAX_LEN: usize = 50;

static TEXT_CACHE: Lazy<Mutex<HashMap<String, Bytes>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn text_response(s: String) -> Response {
    let bytes = if s.len() <= SMALL_STRING_MAX_LEN {
        let mut cache = TEXT_CACHE.lock().unwrap();
        if let Some(cached) = cache.get(&s) {
            cached.clone()
        } else {
            let bytes = Bytes::from(s.clone().into_bytes());
            if cache.len() < SMALL_STRING_CACHE_CAP {
                cache.insert(s, bytes.clone());
            }
            bytes
        }
    } else {
        Bytes::from(s.into_bytes())
    };
    Response::new(StatusCode::OK, Body::from_bytes(bytes)).with_header(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    )
}

/// The single framework-wide JSON encoder, per spec.md §4.7.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// A streaming response body backed by an async iterator of `bytes`. The
/// adapter drains chunks honoring backpressure and closes cleanly on
/// exhaustion or upstream cancellation.
pub fn streaming_response<S>(status: StatusCode, content_type: &'static str, stream: S) -> Response
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
{
    Response::new(status, Body::Streaming(Box::pin(stream)))
        .with_header(http::header::CONTENT_TYPE, HeaderValue::from_static(content_type))
}
