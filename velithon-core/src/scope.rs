//! Scope/Protocol data model and adapter trait (C4).
//!
//! The adapter translates a host runtime's per-request objects into the
//! framework's own `Scope`/`Protocol` pair, assigns a request-id, and
//! invokes the composed middleware stack. On an uncaught exception it
//! synthesizes a 500 response and never lets the exception escape to the
//! host runtime.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::pattern::CapturedValue;
use crate::response::{Body, Response};

/// The protocol tag of a request's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Http,
    WebSocket,
}

/// Generates request-ids of the shape `{randPrefix}-{ms-timestamp}-{threadSlot}-{counter}`
/// per spec.md §4.4, unless the caller supplies its own generator.
pub trait RequestIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

pub struct DefaultRequestIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl DefaultRequestIdGenerator {
    pub fn new() -> Self {
        let prefix: String = uuid::Uuid::new_v4().simple().to_string()[..6].to_string();
        DefaultRequestIdGenerator {
            prefix,
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for DefaultRequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIdGenerator for DefaultRequestIdGenerator {
    fn generate(&self) -> String {
        let ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let thread_slot = thread_slot();
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{ms}-{thread_slot}-{n}", self.prefix)
    }
}

fn thread_slot() -> u64 {
    // A coarse per-thread identity; good enough to decorrelate concurrent
    // request-id generation without pulling in a thread-id crate.
    let tid = std::thread::current().id();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::hash::Hash::hash(&tid, &mut hasher);
    std::hash::Hasher::finish(&hasher) % 1000
}

/// Per-request descriptor. Created at request start, destroyed after the
/// response is fully written (per spec.md §3's Scope lifetime invariant).
pub struct Scope {
    pub protocol: ProtocolKind,
    pub method: Method,
    pub path: String,
    pub raw_query: Option<String>,
    pub headers: HeaderMap,
    pub remote: Option<String>,
    pub request_id: String,
    pub path_params: HashMap<String, CapturedValue>,
    /// Per-request stash for out-of-band objects (e.g. a DB session handed
    /// down by middleware for later handler use).
    stash: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Scope {
    pub fn new(
        protocol: ProtocolKind,
        method: Method,
        path: String,
        raw_query: Option<String>,
        headers: HeaderMap,
        remote: Option<String>,
        request_id: String,
    ) -> Self {
        Scope {
            protocol,
            method,
            path,
            raw_query,
            headers,
            remote,
            request_id,
            path_params: HashMap::new(),
            stash: Mutex::new(HashMap::new()),
        }
    }

    pub fn stash_insert<T: Send + Sync + 'static>(&self, value: T) {
        self.stash.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn stash_get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.stash
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    }
}

/// Errors a `Protocol` write can fail with (e.g. peer disconnect mid-stream).
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("peer disconnected")]
    Disconnected,
    #[error("response already started")]
    AlreadyStarted,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The per-request response sink. Exclusively owned by the adapter for the
/// request's lifetime; never shared across requests.
#[async_trait]
pub trait Protocol: Send {
    /// Write a complete buffered response in one call.
    async fn response_bytes(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<(), ProtocolError>;

    /// Begin a streaming response: send headers, then `send_chunk` for each
    /// body chunk, then `end_stream`.
    async fn response_start(&mut self, status: StatusCode, headers: HeaderMap) -> Result<(), ProtocolError>;

    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), ProtocolError>;

    async fn end_stream(&mut self) -> Result<(), ProtocolError>;
}

/// Write a finalized `Response` to a `Protocol`, handling both the buffered
/// and streaming body cases, then runs background tasks per spec.md §4.7.
pub async fn write_response(protocol: &mut dyn Protocol, mut response: Response) -> Result<(), ProtocolError> {
    response.finalize();
    match response.body {
        Body::Buffered(bytes) => {
            let background = std::mem::take(&mut response.background);
            protocol
                .response_bytes(response.status, response.headers, bytes)
                .await?;
            for task in background {
                task.run().await;
            }
        }
        Body::Streaming(mut stream) => {
            use futures_util::StreamExt;
            protocol.response_start(response.status, response.headers).await?;
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => protocol.send_chunk(bytes).await?,
                    Err(_) => break,
                }
            }
            protocol.end_stream().await?;
            for task in response.background {
                task.run().await;
            }
        }
    }
    Ok(())
}

/// Lazy view over `Scope` plus a fully-buffered request body. Caches parsed
/// query params, parsed form, parsed JSON, and the files extracted from a
/// multipart body. Singleton per request (see C8): any code path needing
/// "the" request must fetch the existing instance via the context system
/// rather than constructing a new one.
pub struct Request {
    pub scope: Arc<Scope>,
    body: Bytes,
    query_cache: OnceCell<Vec<(String, String)>>,
    json_cache: OnceCell<Arc<serde_json::Value>>,
    #[cfg(feature = "multipart")]
    multipart_cache: tokio::sync::OnceCell<Arc<tokio::sync::Mutex<crate::multipart::MultipartFields>>>,
}

impl Request {
    pub fn new(scope: Arc<Scope>, body: Bytes) -> Self {
        Request {
            scope,
            body,
            query_cache: OnceCell::new(),
            json_cache: OnceCell::new(),
            #[cfg(feature = "multipart")]
            multipart_cache: tokio::sync::OnceCell::new(),
        }
    }

    /// Parse the body as `multipart/form-data` once per request, caching the
    /// result behind a mutex so repeated `file`/`form` parameters in the
    /// same handler all draw from the same parse.
    #[cfg(feature = "multipart")]
    pub async fn multipart_fields(
        &self,
    ) -> Result<Arc<tokio::sync::Mutex<crate::multipart::MultipartFields>>, crate::multipart::MultipartError> {
        self.multipart_cache
            .get_or_try_init(|| async {
                let content_type = self.content_type().unwrap_or_default();
                let fields = crate::multipart::parse(content_type, self.body.clone()).await?;
                Ok(Arc::new(tokio::sync::Mutex::new(fields)))
            })
            .await
            .map(Arc::clone)
    }

    pub fn method(&self) -> &Method {
        &self.scope.method
    }

    pub fn path(&self) -> &str {
        &self.scope.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.scope.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.scope.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn request_id(&self) -> &str {
        &self.scope.request_id
    }

    /// Parse the query string once per request; repeated fields are
    /// preserved in order (used by the resolver's sequence-typed params).
    pub fn query_pairs(&self) -> &[(String, String)] {
        self.query_cache.get_or_init(|| {
            crate::params::parse_query_string(self.scope.raw_query.as_deref())
        })
    }

    pub fn query_values(&self, name: &str) -> Vec<&str> {
        self.query_pairs()
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Parse the body as JSON once per request.
    pub fn json_value(&self) -> Result<Arc<serde_json::Value>, serde_json::Error> {
        if let Some(cached) = self.json_cache.get() {
            return Ok(cached.clone());
        }
        let value: serde_json::Value = serde_json::from_slice(&self.body)?;
        let value = Arc::new(value);
        let _ = self.json_cache.set(value.clone());
        Ok(value)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Translates a host runtime's per-request objects into `Scope`/`Protocol`
/// and invokes the composed middleware stack. Implemented once, by
/// `builder::App`, for the standalone `hyper` binding in `crate::server`;
/// any host exposing a compatible scope/protocol pair can implement this.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn handle(&self, scope: Arc<Scope>, body: Bytes, protocol: &mut dyn Protocol);
}

/// Synthesize the spec.md §4.4 failure-mode response: a minimal 500 body,
/// logged at error level, that never lets the exception escape.
pub fn internal_error_response(err: impl std::fmt::Display, request_id: &str) -> Response {
    tracing::error!(request_id, error = %err, "uncaught exception in middleware stack");
    Response::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        Body::from_bytes(Bytes::from_static(br#"{"error": "internal"}"#)),
    )
    .with_header(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(path: &str, query: Option<&str>) -> Arc<Scope> {
        Arc::new(Scope::new(
            ProtocolKind::Http,
            Method::GET,
            path.to_string(),
            query.map(str::to_string),
            HeaderMap::new(),
            None,
            "test-request-id".to_string(),
        ))
    }

    #[test]
    fn request_id_generator_produces_unique_ids() {
        let gen = DefaultRequestIdGenerator::new();
        let a = gen.generate();
        let b = gen.generate();
        assert_ne!(a, b);
    }

    #[test]
    fn query_pairs_parsed_lazily_and_cached() {
        let req = Request::new(scope("/items", Some("a=1&a=2&b=x")), Bytes::new());
        assert_eq!(req.query_values("a"), vec!["1", "2"]);
        assert_eq!(req.query_values("b"), vec!["x"]);
        // second call hits the cache; same result
        assert_eq!(req.query_values("a"), vec!["1", "2"]);
    }

    #[test]
    fn json_value_parses_body_once() {
        let req = Request::new(scope("/items", None), Bytes::from_static(br#"{"id":1}"#));
        let v1 = req.json_value().unwrap();
        let v2 = req.json_value().unwrap();
        assert!(Arc::ptr_eq(&v1, &v2));
        assert_eq!(v1["id"], 1);
    }

    #[test]
    fn stash_roundtrips_per_request_object() {
        let s = scope("/x", None);
        s.stash_insert(42u32);
        assert_eq!(s.stash_get::<u32>(), Some(42));
        assert_eq!(s.stash_get::<String>(), None);
    }

    #[tokio::test]
    async fn internal_error_response_never_panics_on_display_input() {
        let resp = internal_error_response("boom", "req-1");
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
