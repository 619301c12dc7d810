//! End-to-end coverage driving a fully assembled `App` through its
//! `Adapter::handle` entry point, the way `server.rs` would for a real
//! connection — as opposed to the unit-level coverage inline in
//! `builder.rs`/`plugins.rs`, which exercises one layer at a time.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};

use velithon_core::builder::AppBuilder;
use velithon_core::dispatcher::async_handler;
use velithon_core::health::{HealthIndicator, HealthStatus};
use velithon_core::plugins::{Cors, ErrorHandling, Health, NormalizePath};
use velithon_core::request_id::RequestIdMiddleware;
use velithon_core::response::{IntoResponse, Json};
use velithon_core::route::Router;
use velithon_core::scope::{Adapter, Protocol, ProtocolError, ProtocolKind, Scope};
use velithon_core::secure_headers::SecureHeaders;

#[derive(Default)]
struct RecordingProtocol {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Mutex<Vec<Bytes>>,
}

impl RecordingProtocol {
    fn body_string(&self) -> String {
        let chunks = self.body.lock().unwrap();
        String::from_utf8_lossy(&chunks.concat()).to_string()
    }
}

#[async_trait]
impl Protocol for RecordingProtocol {
    async fn response_bytes(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<(), ProtocolError> {
        self.status = Some(status);
        self.headers = headers;
        self.body.lock().unwrap().push(body);
        Ok(())
    }

    async fn response_start(&mut self, status: StatusCode, headers: HeaderMap) -> Result<(), ProtocolError> {
        self.status = Some(status);
        self.headers = headers;
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), ProtocolError> {
        self.body.lock().unwrap().push(chunk);
        Ok(())
    }

    async fn end_stream(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

fn scope(method: Method, path: &str) -> Arc<Scope> {
    scope_with_headers(method, path, HeaderMap::new())
}

fn scope_with_headers(method: Method, path: &str, headers: HeaderMap) -> Arc<Scope> {
    Arc::new(Scope::new(
        ProtocolKind::Http,
        method,
        path.to_string(),
        None,
        headers,
        None,
        "test-req".to_string(),
    ))
}

async fn dispatch(app: &dyn Adapter, method: Method, path: &str) -> RecordingProtocol {
    let mut protocol = RecordingProtocol::default();
    app.handle(scope(method, path), Bytes::new(), &mut protocol).await;
    protocol
}

async fn dispatch_with_header(
    app: &dyn Adapter,
    method: Method,
    path: &str,
    header: (&str, &str),
) -> RecordingProtocol {
    let mut headers = HeaderMap::new();
    headers.insert(
        http::HeaderName::from_bytes(header.0.as_bytes()).unwrap(),
        HeaderValue::from_str(header.1).unwrap(),
    );
    let mut protocol = RecordingProtocol::default();
    app.handle(scope_with_headers(method, path, headers), Bytes::new(), &mut protocol)
        .await;
    protocol
}

// ── Health plugin ────────────────────────────────────────────────────────

#[tokio::test]
async fn health_plugin_end_to_end() {
    let server = AppBuilder::new().with_plugin(Health).build();
    let protocol = dispatch(server.adapter(), Method::GET, "/health").await;
    assert_eq!(protocol.status, Some(StatusCode::OK));
    assert_eq!(protocol.body_string(), "OK");
}

struct AlwaysUp;
impl HealthIndicator for AlwaysUp {
    fn name(&self) -> &str {
        "always-up"
    }
    fn check(&self) -> impl std::future::Future<Output = HealthStatus> + Send {
        async { HealthStatus::Up }
    }
}

struct AlwaysDown;
impl HealthIndicator for AlwaysDown {
    fn name(&self) -> &str {
        "always-down"
    }
    fn check(&self) -> impl std::future::Future<Output = HealthStatus> + Send {
        async { HealthStatus::Down("intentionally down".into()) }
    }
}

struct LivenessOnly;
impl HealthIndicator for LivenessOnly {
    fn name(&self) -> &str {
        "liveness-only"
    }
    fn check(&self) -> impl std::future::Future<Output = HealthStatus> + Send {
        async { HealthStatus::Down("down but liveness-only".into()) }
    }
    fn affects_readiness(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn advanced_health_all_up() {
    let server = AppBuilder::new()
        .with_plugin(Health::builder().check(AlwaysUp).build())
        .build();
    let protocol = dispatch(server.adapter(), Method::GET, "/health").await;
    assert_eq!(protocol.status, Some(StatusCode::OK));
    let json: serde_json::Value = serde_json::from_str(&protocol.body_string()).unwrap();
    assert_eq!(json["status"], "UP");
}

#[tokio::test]
async fn advanced_health_one_down() {
    let server = AppBuilder::new()
        .with_plugin(Health::builder().check(AlwaysUp).check(AlwaysDown).build())
        .build();
    let protocol = dispatch(server.adapter(), Method::GET, "/health").await;
    assert_eq!(protocol.status, Some(StatusCode::SERVICE_UNAVAILABLE));
    let json: serde_json::Value = serde_json::from_str(&protocol.body_string()).unwrap();
    assert_eq!(json["status"], "DOWN");
}

#[tokio::test]
async fn advanced_health_liveness_always_ok() {
    let server = AppBuilder::new()
        .with_plugin(Health::builder().check(AlwaysDown).build())
        .build();
    let protocol = dispatch(server.adapter(), Method::GET, "/health/live").await;
    assert_eq!(protocol.status, Some(StatusCode::OK));
}

#[tokio::test]
async fn advanced_health_readiness_filters_liveness_only_checks() {
    let server = AppBuilder::new()
        .with_plugin(Health::builder().check(AlwaysUp).check(LivenessOnly).build())
        .build();
    let protocol = dispatch(server.adapter(), Method::GET, "/health/ready").await;
    assert_eq!(protocol.status, Some(StatusCode::OK));
    let json: serde_json::Value = serde_json::from_str(&protocol.body_string()).unwrap();
    assert_eq!(json["status"], "UP");
}

// ── CORS plugin ──────────────────────────────────────────────────────────

#[tokio::test]
async fn cors_permissive_allows_origin() {
    let server = AppBuilder::new().with_plugin(Health).with_plugin(Cors::permissive()).build();
    let protocol = dispatch_with_header(server.adapter(), Method::GET, "/health", ("origin", "http://example.com")).await;
    assert_eq!(protocol.status, Some(StatusCode::OK));
    assert!(protocol.headers.get("access-control-allow-origin").is_some());
}

#[tokio::test]
async fn cors_preflight_short_circuits_before_routing() {
    let server = AppBuilder::new().with_plugin(Health).with_plugin(Cors::permissive()).build();
    let protocol = dispatch_with_header(server.adapter(), Method::OPTIONS, "/health", ("origin", "http://example.com")).await;
    assert_eq!(protocol.status, Some(StatusCode::NO_CONTENT));
    assert!(protocol.headers.get("access-control-allow-methods").is_some());
}

// ── ErrorHandling plugin ─────────────────────────────────────────────────

#[tokio::test]
async fn error_handling_does_not_alter_a_healthy_response() {
    let server = AppBuilder::new().with_plugin(Health).with_plugin(ErrorHandling).build();
    let protocol = dispatch(server.adapter(), Method::GET, "/health").await;
    assert_eq!(protocol.status, Some(StatusCode::OK));
}

#[tokio::test]
async fn error_handling_passes_through_a_route_level_error() {
    let server = AppBuilder::new()
        .with_plugin(ErrorHandling)
        .register_routes(|router: &mut Router| {
            router.add_route(
                "/boom",
                [Method::GET],
                async_handler("boom", |_ctx| async {
                    velithon_core::error::VelithonError::InternalError("boom".into()).into_response()
                }),
                None,
            )
        })
        .build();
    let protocol = dispatch(server.adapter(), Method::GET, "/boom").await;
    assert_eq!(protocol.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
}

// ── Panics don't escape the middleware stack ────────────────────────────

#[tokio::test]
async fn a_panicking_handler_yields_500_instead_of_crashing() {
    let server = AppBuilder::new()
        .register_routes(|router: &mut Router| {
            router.add_route(
                "/panic",
                [Method::GET],
                async_handler("panic", |_ctx| async {
                    panic!("boom");
                    #[allow(unreachable_code)]
                    "never".into_response()
                }),
                None,
            )
        })
        .build();
    let protocol = dispatch(server.adapter(), Method::GET, "/panic").await;
    assert_eq!(protocol.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
}

// ── NormalizePath plugin + AppBuilder::normalize_trailing_slash ─────────

#[tokio::test]
async fn normalize_path_strips_trailing_slash_when_enabled() {
    let server = AppBuilder::new()
        .normalize_trailing_slash(true)
        .with_plugin(Health)
        .with_plugin(NormalizePath)
        .build();
    let protocol = dispatch(server.adapter(), Method::GET, "/health/").await;
    assert_eq!(protocol.status, Some(StatusCode::OK));
    assert_eq!(protocol.body_string(), "OK");
}

#[tokio::test]
async fn normalize_path_disabled_by_default() {
    let server = AppBuilder::new().with_plugin(Health).build();
    let protocol = dispatch(server.adapter(), Method::GET, "/health/").await;
    assert_eq!(protocol.status, Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn normalize_path_root_slash_unaffected() {
    let server = AppBuilder::new().normalize_trailing_slash(true).with_plugin(Health).build();
    let protocol = dispatch(server.adapter(), Method::GET, "/").await;
    assert_eq!(protocol.status, Some(StatusCode::NOT_FOUND));
}

// ── SecureHeaders, layered alongside other plugins ──────────────────────

#[tokio::test]
async fn secure_headers_layer_combines_with_other_plugins() {
    let server = AppBuilder::new()
        .with_plugin(Health)
        .with_plugin(SecureHeaders::default())
        .with_plugin(Cors::permissive())
        .build();
    let protocol = dispatch_with_header(server.adapter(), Method::GET, "/health", ("origin", "http://example.com")).await;
    assert_eq!(protocol.status, Some(StatusCode::OK));
    assert_eq!(
        protocol.headers.get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert!(protocol.headers.get("access-control-allow-origin").is_some());
}

// ── Route registration / merging ────────────────────────────────────────

#[tokio::test]
async fn multiple_route_registrations_merge() {
    let server = AppBuilder::new()
        .register_routes(|router: &mut Router| {
            router.add_route(
                "/a",
                [Method::GET],
                async_handler("a", |_ctx| async { "alpha".into_response() }),
                None,
            )
        })
        .register_routes(|router: &mut Router| {
            router.add_route(
                "/b",
                [Method::GET],
                async_handler("b", |_ctx| async { "beta".into_response() }),
                None,
            )
        })
        .build();

    let a = dispatch(server.adapter(), Method::GET, "/a").await;
    assert_eq!(a.body_string(), "alpha");
    let b = dispatch(server.adapter(), Method::GET, "/b").await;
    assert_eq!(b.body_string(), "beta");
}

#[tokio::test]
async fn merge_router_combines_a_separately_built_route_table() {
    let mut sub = Router::new();
    sub.add_route(
        "/sub",
        [Method::GET],
        async_handler("sub", |_ctx| async { Json(serde_json::json!({"ok": true})).into_response() }),
        None,
    )
    .unwrap();

    let server = AppBuilder::new().merge_router(sub).build();
    let protocol = dispatch(server.adapter(), Method::GET, "/sub").await;
    assert_eq!(protocol.status, Some(StatusCode::OK));
    let json: serde_json::Value = serde_json::from_str(&protocol.body_string()).unwrap();
    assert_eq!(json["ok"], true);
}

// ── Beans resolvable once the app is assembled ──────────────────────────

#[derive(Clone)]
struct Greeting(&'static str);

#[tokio::test]
async fn provided_bean_reachable_from_a_handler_through_di() {
    let server = AppBuilder::new()
        .provide(Greeting("hi"))
        .register_routes(|router: &mut Router| {
            router.add_route(
                "/greet",
                [Method::GET],
                async_handler("greet", |ctx| async move {
                    let greeting = ctx.beans.resolve::<Greeting>().await.unwrap();
                    greeting.0.into_response()
                }),
                None,
            )
        })
        .build();

    let protocol = dispatch(server.adapter(), Method::GET, "/greet").await;
    assert_eq!(protocol.status, Some(StatusCode::OK));
    assert_eq!(protocol.body_string(), "hi");
}

// ── Custom middleware layered alongside plugins ─────────────────────────

struct TaggingMiddleware;
impl velithon_core::middleware::Middleware for TaggingMiddleware {
    fn wrap(self: Arc<Self>, next: velithon_core::middleware::Next) -> velithon_core::middleware::Next {
        velithon_core::middleware::Next::new(move |ctx| {
            let next = next.clone();
            async move {
                let mut resp = next.run(ctx).await;
                resp.headers.insert(
                    http::HeaderName::from_static("x-custom-layer"),
                    HeaderValue::from_static("applied"),
                );
                resp
            }
        })
    }
}

#[tokio::test]
async fn custom_middleware_applies_alongside_builtin_plugins() {
    let server = AppBuilder::new()
        .with_plugin(Health)
        .with_middleware(TaggingMiddleware)
        .build();
    let protocol = dispatch(server.adapter(), Method::GET, "/health").await;
    assert_eq!(protocol.status, Some(StatusCode::OK));
    assert_eq!(protocol.headers.get("x-custom-layer").unwrap(), "applied");
}

// ── RequestIdMiddleware is installed by default ─────────────────────────

#[tokio::test]
async fn request_id_middleware_is_present_by_default_and_does_not_alter_the_response() {
    // AppBuilder::new() always pushes RequestIdMiddleware first; confirm the
    // stack still runs the route handler unchanged even with it present.
    let server = AppBuilder::new().with_plugin(Health).build();
    let protocol = dispatch(server.adapter(), Method::GET, "/health").await;
    assert_eq!(protocol.status, Some(StatusCode::OK));
    assert_eq!(protocol.body_string(), "OK");
    // Sanity: the middleware type itself stays constructible outside the
    // builder, for applications that assemble a stack manually.
    let _ = Arc::new(RequestIdMiddleware);
}
