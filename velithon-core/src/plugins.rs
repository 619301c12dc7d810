//! Built-in plugins for common cross-cutting concerns.
//!
//! Each plugin implements [`Plugin`](crate::plugin::Plugin) and is installed
//! via `AppBuilder::with_plugin()`.

use std::sync::Arc;
use std::time::Instant;

use http::{HeaderName, HeaderValue, Method, StatusCode};

use crate::dispatcher::DispatchContext;
use crate::health::{self, HealthState};
use crate::middleware::{Middleware, Next};
use crate::plugin::Plugin;
use crate::response::IntoResponse;
use crate::route::{RouteError, Router};

/// Which origins a [`Cors`] plugin accepts.
pub enum CorsOrigin {
    Any,
    List(Vec<HeaderValue>),
}

/// CORS plugin. No dependency on `tower-http`: preflight handling and
/// response-header injection are implemented directly as a [`Middleware`].
pub struct Cors {
    allow_origin: CorsOrigin,
    allow_methods: Vec<Method>,
    allow_headers: Vec<HeaderName>,
    allow_credentials: bool,
    max_age: Option<u64>,
}

impl Cors {
    /// A development-friendly configuration: any origin, the common verbs,
    /// and `*` request headers reflected back.
    pub fn permissive() -> Self {
        Self {
            allow_origin: CorsOrigin::Any,
            allow_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allow_headers: Vec::new(),
            allow_credentials: false,
            max_age: Some(86400),
        }
    }

    pub fn builder() -> CorsBuilder {
        CorsBuilder::new()
    }

    fn origin_header(&self, request_origin: Option<&str>) -> Option<HeaderValue> {
        match &self.allow_origin {
            CorsOrigin::Any => Some(HeaderValue::from_static("*")),
            CorsOrigin::List(origins) => {
                let request_origin = request_origin?;
                origins
                    .iter()
                    .find(|o| o.as_bytes() == request_origin.as_bytes())
                    .cloned()
            }
        }
    }

    fn apply_headers(&self, headers: &mut http::HeaderMap, request_origin: Option<&str>) {
        if let Some(origin) = self.origin_header(request_origin) {
            headers.insert(HeaderName::from_static("access-control-allow-origin"), origin);
        }
        if self.allow_credentials {
            headers.insert(
                HeaderName::from_static("access-control-allow-credentials"),
                HeaderValue::from_static("true"),
            );
        }
        if !self.allow_methods.is_empty() {
            let methods = self
                .allow_methods
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&methods) {
                headers.insert(HeaderName::from_static("access-control-allow-methods"), value);
            }
        }
        if !self.allow_headers.is_empty() {
            let hdrs = self
                .allow_headers
                .iter()
                .map(|h| h.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&hdrs) {
                headers.insert(HeaderName::from_static("access-control-allow-headers"), value);
            }
        }
        if let Some(max_age) = self.max_age {
            if let Ok(value) = HeaderValue::from_str(&max_age.to_string()) {
                headers.insert(HeaderName::from_static("access-control-max-age"), value);
            }
        }
    }
}

impl Plugin for Cors {
    fn middleware(self: Arc<Self>) -> Option<Arc<dyn Middleware>> {
        Some(self)
    }
}

impl Middleware for Cors {
    fn wrap(self: Arc<Self>, next: Next) -> Next {
        Next::new(move |ctx: DispatchContext| {
            let this = self.clone();
            let next = next.clone();
            async move {
                let request_origin = ctx.request.header("origin").map(str::to_string);
                if ctx.request.method() == Method::OPTIONS {
                    let mut resp = StatusCode::NO_CONTENT.into_response();
                    this.apply_headers(&mut resp.headers, request_origin.as_deref());
                    return resp;
                }
                let mut resp = next.run(ctx).await;
                this.apply_headers(&mut resp.headers, request_origin.as_deref());
                resp
            }
        })
    }

    fn name(&self) -> &'static str {
        "Cors"
    }
}

/// Builder for [`Cors`].
pub struct CorsBuilder {
    allow_origin: CorsOrigin,
    allow_methods: Vec<Method>,
    allow_headers: Vec<HeaderName>,
    allow_credentials: bool,
    max_age: Option<u64>,
}

impl CorsBuilder {
    fn new() -> Self {
        Self {
            allow_origin: CorsOrigin::List(Vec::new()),
            allow_methods: Vec::new(),
            allow_headers: Vec::new(),
            allow_credentials: false,
            max_age: None,
        }
    }

    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        let value = HeaderValue::from_str(&origin.into()).expect("valid origin header value");
        match &mut self.allow_origin {
            CorsOrigin::List(list) => list.push(value),
            CorsOrigin::Any => {}
        }
        self
    }

    pub fn allow_any_origin(mut self) -> Self {
        self.allow_origin = CorsOrigin::Any;
        self
    }

    pub fn allow_method(mut self, method: Method) -> Self {
        self.allow_methods.push(method);
        self
    }

    pub fn allow_header(mut self, header: HeaderName) -> Self {
        self.allow_headers.push(header);
        self
    }

    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn build(self) -> Cors {
        Cors {
            allow_origin: self.allow_origin,
            allow_methods: self.allow_methods,
            allow_headers: self.allow_headers,
            allow_credentials: self.allow_credentials,
            max_age: self.max_age,
        }
    }
}

/// Request/response tracing plugin. Emits one `tracing` event per request at
/// `DEBUG`, independent of [`crate::request_id::RequestIdMiddleware`]'s span
/// (which only tags; it doesn't log). Install both for full coverage.
pub struct Tracing;

impl Plugin for Tracing {
    fn middleware(self: Arc<Self>) -> Option<Arc<dyn Middleware>> {
        Some(self)
    }
}

impl Middleware for Tracing {
    fn wrap(self: Arc<Self>, next: Next) -> Next {
        Next::new(move |ctx: DispatchContext| {
            let next = next.clone();
            async move {
                let method = ctx.request.method().clone();
                let path = ctx.request.path().to_string();
                let start = Instant::now();
                let response = next.run(ctx).await;
                tracing::debug!(
                    %method,
                    %path,
                    status = response.status.as_u16(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "request handled"
                );
                response
            }
        })
    }

    fn name(&self) -> &'static str {
        "Tracing"
    }
}

/// Simple health-check endpoint plugin: `GET /health` -> `"OK"`.
///
/// For liveness/readiness probes backed by real indicators, use
/// [`Health::builder()`] (aliasing [`crate::health::HealthBuilder`]), which
/// produces an [`AdvancedHealth`] plugin instead.
pub struct Health;

impl Health {
    pub fn builder() -> crate::health::HealthBuilder {
        crate::health::HealthBuilder::new()
    }
}

impl Plugin for Health {
    fn routes(&self, router: &mut Router) -> Result<(), RouteError> {
        router.add_route(
            "/health",
            [Method::GET],
            health::simple_health_handler(),
            None,
        )
    }
}

/// Advanced health-check plugin with liveness/readiness probes, built via
/// [`Health::builder()`].
pub struct AdvancedHealth {
    state: Arc<HealthState>,
}

impl AdvancedHealth {
    pub(crate) fn new(
        checks: Vec<Box<dyn crate::health::HealthIndicatorErased>>,
        cache_ttl: Option<std::time::Duration>,
    ) -> Self {
        Self {
            state: Arc::new(HealthState {
                checks,
                start_time: Instant::now(),
                cache_ttl,
                cache: tokio::sync::RwLock::new(None),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn checks_for_test(self) -> Vec<Box<dyn crate::health::HealthIndicatorErased>> {
        Arc::try_unwrap(self.state)
            .unwrap_or_else(|_| panic!("state still shared"))
            .checks
    }
}

impl Plugin for AdvancedHealth {
    fn routes(&self, router: &mut Router) -> Result<(), RouteError> {
        router.add_route(
            "/health",
            [Method::GET],
            health::health_handler(self.state.clone()),
            None,
        )?;
        router.add_route(
            "/health/live",
            [Method::GET],
            health::liveness_handler(),
            None,
        )?;
        router.add_route(
            "/health/ready",
            [Method::GET],
            health::readiness_handler(self.state.clone()),
            None,
        )
    }
}

/// Logs every 5xx response at `ERROR`. Panics are already caught and turned
/// into a 500 by the dispatcher (C12); this plugin only adds visibility.
pub struct ErrorHandling;

impl Plugin for ErrorHandling {
    fn middleware(self: Arc<Self>) -> Option<Arc<dyn Middleware>> {
        Some(self)
    }
}

impl Middleware for ErrorHandling {
    fn wrap(self: Arc<Self>, next: Next) -> Next {
        Next::new(move |ctx: DispatchContext| {
            let next = next.clone();
            async move {
                let request_id = ctx.request.request_id().to_string();
                let response = next.run(ctx).await;
                if response.status.is_server_error() {
                    tracing::error!(request_id, status = response.status.as_u16(), "request failed");
                }
                response
            }
        })
    }

    fn name(&self) -> &'static str {
        "ErrorHandling"
    }
}

/// Dev-mode reload endpoints plugin. Adds `/__velithon_dev/status` and
/// `/__velithon_dev/ping` for tooling and browser scripts to detect restarts.
#[cfg(feature = "dev-reload")]
pub struct DevReload;

#[cfg(feature = "dev-reload")]
impl Plugin for DevReload {
    fn routes(&self, router: &mut Router) -> Result<(), RouteError> {
        crate::dev::register_dev_routes(router)
    }
}

/// Trailing-slash normalization marker, kept for discoverability alongside
/// the other plugins. The actual retry-on-trailing-slash logic lives in
/// `builder::terminal_handler` (it needs a second route match on a 404,
/// which a middleware layer can't trigger); enable it with
/// `AppBuilder::normalize_trailing_slash(true)`, independent of this type.
pub struct NormalizePath;

impl Plugin for NormalizePath {
    fn name(&self) -> &'static str {
        "NormalizePath"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{BeanContext, BeanRegistry};
    use crate::scope::{ProtocolKind, Scope};
    use bytes::Bytes;
    use http::HeaderMap;
    use std::collections::HashMap;

    fn ctx_with_origin(origin: Option<&str>) -> DispatchContext {
        let mut headers = HeaderMap::new();
        if let Some(origin) = origin {
            headers.insert("origin", HeaderValue::from_str(origin).unwrap());
        }
        let scope = Arc::new(Scope::new(
            ProtocolKind::Http,
            Method::GET,
            "/".into(),
            None,
            headers,
            None,
            "req".into(),
        ));
        DispatchContext {
            request: Arc::new(crate::scope::Request::new(scope, Bytes::new())),
            captures: HashMap::new(),
            beans: Arc::new(BeanContext::new(Arc::new(BeanRegistry::new()))),
        }
    }

    #[tokio::test]
    async fn permissive_cors_reflects_wildcard_origin() {
        let cors = Arc::new(Cors::permissive());
        let terminal = Next::new(|_ctx| async { ().into_response() });
        let wrapped = cors.wrap(terminal);
        let resp = wrapped.run(ctx_with_origin(Some("https://example.com"))).await;
        assert_eq!(resp.headers.get("access-control-allow-origin").unwrap(), "*");
    }

    #[tokio::test]
    async fn restrictive_cors_rejects_unlisted_origin() {
        let cors = Arc::new(CorsBuilder::new().allow_origin("https://allowed.com").build());
        let terminal = Next::new(|_ctx| async { ().into_response() });
        let wrapped = cors.wrap(terminal);
        let resp = wrapped.run(ctx_with_origin(Some("https://evil.com"))).await;
        assert!(resp.headers.get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn health_plugin_registers_ok_route() {
        let plugin = Health;
        let mut router = Router::new();
        plugin.routes(&mut router).unwrap();
        match router.match_request(&Method::GET, "/health") {
            crate::route::MatchResult::Full { .. } => {}
            _ => panic!("expected /health to match"),
        }
    }
}
