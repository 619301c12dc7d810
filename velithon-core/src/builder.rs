//! Application assembly (composition root).
//!
//! `AppBuilder` wires the route table (route.rs), middleware stack
//! (middleware.rs), DI container (di.rs), and lifecycle hooks (lifecycle.rs)
//! into a `Server` that can be run with `.serve(addr)`. Dependency
//! completeness is checked once, at `.build()`, via `BeanRegistry::validate()`
//! rather than at compile time: the graph here is assembled from runtime
//! plugin/controller registration, which a typestate builder can't model
//! without seeing the whole application up front.

use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::config::VelithonConfig;
use crate::controller::Controller;
use crate::di::{BeanContext, BeanRegistry, Lifecycle, Provider};
use crate::dispatcher::{self, DispatchContext};
use crate::lifecycle::{shutdown_hook, shutdown_signal, startup_hook, ShutdownHook, StartupHook};
use crate::meta::MetaRegistry;
use crate::middleware::{Middleware, Next, Stack};
use crate::plugin::Plugin;
use crate::request_id::RequestIdMiddleware;
use crate::response::IntoResponse;
use crate::route::{MatchResult, RouteError, Router};
use crate::scope::{
    internal_error_response, write_response, Adapter, DefaultRequestIdGenerator, Protocol,
    ProtocolError, Request, RequestIdGenerator, Scope,
};
use crate::service::ServiceComponent;
use crate::validation::ValidationErrorFormatter;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type ServiceSpawn = Box<dyn FnOnce(BeanContext, CancellationToken) -> BoxFuture + Send>;
type MetaConsumer = Box<dyn FnOnce(&MetaRegistry) + Send>;

/// Assembles an [`App`]/[`Server`] from beans, routes, middleware, and
/// lifecycle hooks. Every registration method is fail-fast: a duplicate bean
/// or a malformed route pattern panics at `.build()` (or immediately, for
/// methods that can fail eagerly), since these are startup-time programmer
/// errors, not runtime conditions a caller should handle.
pub struct AppBuilder {
    registry: BeanRegistry,
    router: Router,
    stack: Stack,
    meta: MetaRegistry,
    meta_consumers: Vec<MetaConsumer>,
    startup_hooks: Vec<StartupHook>,
    shutdown_hooks: Vec<ShutdownHook>,
    services: Vec<ServiceSpawn>,
    normalize_path: bool,
    request_id_gen: Arc<dyn RequestIdGenerator>,
}

impl AppBuilder {
    pub fn new() -> Self {
        let mut stack = Stack::new();
        stack.push(Arc::new(RequestIdMiddleware));
        AppBuilder {
            registry: BeanRegistry::new(),
            router: Router::new(),
            stack,
            meta: MetaRegistry::new(),
            meta_consumers: Vec::new(),
            startup_hooks: Vec::new(),
            shutdown_hooks: Vec::new(),
            services: Vec::new(),
            normalize_path: false,
            request_id_gen: Arc::new(DefaultRequestIdGenerator::new()),
        }
    }

    /// Register a pre-built value as a singleton bean. `B` must be `Clone`
    /// since the same registered closure may in principle run more than
    /// once (it won't, for a `Singleton`, but the `Provider` signature
    /// doesn't distinguish).
    pub fn provide<B: Clone + Send + Sync + 'static>(mut self, value: B) -> Self {
        self.registry
            .register::<B, _, _>(
                std::any::type_name::<B>(),
                Lifecycle::Singleton,
                Vec::new(),
                move |_ctx| {
                    let value = value.clone();
                    async move { Ok(value) }
                },
            )
            .unwrap_or_else(|e| panic!("AppBuilder::provide: {e}"));
        self
    }

    /// Register a `Provider` implementation, with its dependencies declared
    /// by `TypeId` (the macro layer is expected to generate this call).
    pub fn register_provider<P: Provider>(mut self, deps: Vec<TypeId>) -> Self {
        self.registry
            .register::<P::Output, _, _>(
                std::any::type_name::<P>(),
                P::lifecycle(),
                deps,
                |ctx| async move { P::provide(&ctx).await },
            )
            .unwrap_or_else(|e| panic!("AppBuilder::register_provider: {e}"));
        self
    }

    /// Load application config and register it as a bean so handlers can
    /// resolve `Arc<VelithonConfig>` (or a typed wrapper registered via
    /// `provide` separately) through the DI container.
    pub fn with_config(self, config: VelithonConfig) -> Self {
        self.provide(config)
    }

    /// Install a validation error formatter consulted by generated handler
    /// code when no route-level formatter is set. Resolved through DI like
    /// any other bean, rather than threaded specially through
    /// `DispatchContext` — keeps the dispatch context's shape independent of
    /// which cross-cutting concerns an application happens to register.
    pub fn with_default_validation_formatter<F: ValidationErrorFormatter + 'static>(self, formatter: F) -> Self {
        let formatter: Arc<dyn ValidationErrorFormatter> = Arc::new(formatter);
        self.provide(formatter)
    }

    /// Install a [`Plugin`]: register its routes, then (if it contributes
    /// one) push its middleware onto the stack.
    pub fn with_plugin<P: Plugin>(mut self, plugin: P) -> Self {
        let plugin = Arc::new(plugin);
        plugin
            .routes(&mut self.router)
            .unwrap_or_else(|e| panic!("AppBuilder::with_plugin('{}'): {e}", plugin.name()));
        if let Some(mw) = plugin.clone().middleware() {
            self.stack.push(mw);
        }
        self
    }

    /// Push a raw middleware layer, bypassing the `Plugin` abstraction.
    pub fn with_middleware(mut self, middleware: impl Middleware) -> Self {
        self.stack.push(Arc::new(middleware));
        self
    }

    /// Register routes directly via a closure, for ad hoc routing that
    /// doesn't warrant a `Controller` or `Plugin`.
    pub fn register_routes<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut Router) -> Result<(), RouteError>,
    {
        f(&mut self.router).unwrap_or_else(|e| panic!("AppBuilder::register_routes: {e}"));
        self
    }

    /// Merge a separately-built `Router` (e.g. a sub-router mounted under a
    /// prefix) into the application's route table.
    pub fn merge_router(mut self, other: Router) -> Self {
        self.router.merge(other);
        self
    }

    /// Register a `#[controller]`-annotated type's routes and metadata.
    pub fn register_controller<C: Controller>(mut self) -> Self {
        C::register(&mut self.router)
            .unwrap_or_else(|e| panic!("AppBuilder::register_controller('{}'): {e}", C::name()));
        C::register_meta(&mut self.meta);
        self
    }

    /// Drain typed metadata from the registry once the app is fully
    /// assembled (e.g. to render an OpenAPI document route). Consumers run,
    /// in registration order, right before `.build()` finishes wiring routes.
    pub fn with_meta_consumer<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&MetaRegistry) + Send + 'static,
    {
        self.meta_consumers.push(Box::new(f));
        self
    }

    /// Spawn a [`ServiceComponent`] alongside the HTTP listener. Constructed
    /// from the resolved DI container after startup hooks run, before the
    /// listener starts accepting; cancelled (and awaited) on shutdown.
    pub fn spawn_service<C: ServiceComponent>(mut self) -> Self {
        self.services.push(Box::new(|beans, shutdown| {
            Box::pin(async move {
                match C::from_beans(&beans).await {
                    Ok(component) => component.start(shutdown).await,
                    Err(err) => tracing::error!(
                        service = std::any::type_name::<C>(),
                        error = %err,
                        "service construction failed; not starting"
                    ),
                }
            })
        }));
        self
    }

    /// Run `f` once the bean graph has resolved, before the listener starts
    /// accepting connections.
    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.startup_hooks.push(startup_hook(f));
        self
    }

    /// Run `f` after the listener stops accepting connections and in-flight
    /// requests (and spawned services) have drained.
    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shutdown_hooks.push(shutdown_hook(f));
        self
    }

    /// When a request path misses, retry with a trailing slash stripped
    /// before answering `NotFound`.
    pub fn normalize_trailing_slash(mut self, enabled: bool) -> Self {
        self.normalize_path = enabled;
        self
    }

    /// Override the request-id generator (default: random-prefixed counter,
    /// see `scope::DefaultRequestIdGenerator`).
    pub fn with_request_id_generator(mut self, gen: impl RequestIdGenerator + 'static) -> Self {
        self.request_id_gen = Arc::new(gen);
        self
    }

    /// Validate the bean graph, assemble the route/middleware chain, and
    /// return a [`Server`] ready to `.serve(addr)`.
    pub fn build(mut self) -> Server {
        self.registry
            .validate()
            .expect("AppBuilder::build: dependency graph validation failed");

        for consumer in self.meta_consumers {
            consumer(&self.meta);
        }

        let registry = Arc::new(self.registry);
        let beans = Arc::new(BeanContext::new(registry));
        let router = Arc::new(self.router);
        let terminal = terminal_handler(router, self.normalize_path);
        let chain = self.stack.build(terminal);

        let app = Arc::new(App {
            chain,
            beans: beans.clone(),
            request_id_gen: self.request_id_gen,
        });

        Server {
            app,
            beans,
            startup_hooks: self.startup_hooks,
            shutdown_hooks: self.shutdown_hooks,
            services: self.services,
        }
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the single terminal `Next` the middleware stack wraps: matches the
/// route table against the live request (path params aren't known until
/// then) and dispatches into the matched handler.
fn terminal_handler(router: Arc<Router>, normalize_path: bool) -> Next {
    Next::new(move |ctx: DispatchContext| {
        let router = router.clone();
        async move {
            let method = ctx.request.method().clone();
            let path = ctx.request.path().to_string();
            match router.match_request(&method, &path) {
                MatchResult::Full { route, captures } => {
                    let ctx = DispatchContext { captures, ..ctx };
                    dispatcher::invoke(&route.handler, ctx).await
                }
                MatchResult::MethodNotAllowed { allowed } => {
                    let allowed = allowed.iter().map(|m| m.to_string()).collect();
                    crate::error::VelithonError::MethodNotAllowed { allowed }.into_response()
                }
                MatchResult::NotFound if normalize_path && path.len() > 1 && path.ends_with('/') => {
                    let trimmed = path.trim_end_matches('/').to_string();
                    match router.match_request(&method, &trimmed) {
                        MatchResult::Full { route, captures } => {
                            let ctx = DispatchContext { captures, ..ctx };
                            dispatcher::invoke(&route.handler, ctx).await
                        }
                        _ => crate::error::VelithonError::NotFound(path).into_response(),
                    }
                }
                MatchResult::NotFound => crate::error::VelithonError::NotFound(path).into_response(),
            }
        }
    })
}

/// The built application: the composed middleware/routing chain plus the
/// resolved DI container. Implements [`Adapter`] so any host (the bundled
/// `hyper` binding in `server.rs`, or a custom one) can drive it.
pub struct App {
    chain: Next,
    beans: Arc<BeanContext>,
    request_id_gen: Arc<dyn RequestIdGenerator>,
}

#[async_trait]
impl Adapter for App {
    async fn handle(&self, scope: Arc<Scope>, body: Bytes, protocol: &mut dyn Protocol) {
        let request_id = scope.request_id.clone();
        let request = Arc::new(Request::new(scope, body));
        let ctx = DispatchContext {
            request: request.clone(),
            captures: HashMap::new(),
            beans: self.beans.clone(),
        };

        use futures_util::FutureExt;
        let chain = &self.chain;
        let response = match std::panic::AssertUnwindSafe(crate::context::with_request(request, || chain.run(ctx)))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(_) => internal_error_response("panic escaped the middleware stack", &request_id),
        };

        if let Err(err) = write_response(protocol, response).await {
            log_write_failure(&request_id, err);
        }
    }
}

fn log_write_failure(request_id: &str, err: ProtocolError) {
    tracing::warn!(request_id, error = %err, "failed to write response to the client");
}

/// An assembled application plus everything needed to run it: lifecycle
/// hooks and background services not yet spawned. Produced by
/// [`AppBuilder::build`]; consumed by `.serve(addr)`.
pub struct Server {
    app: Arc<App>,
    beans: Arc<BeanContext>,
    startup_hooks: Vec<StartupHook>,
    shutdown_hooks: Vec<ShutdownHook>,
    services: Vec<ServiceSpawn>,
}

impl Server {
    /// The assembled request-handling pipeline, as an [`Adapter`]. Lets a
    /// test harness (or an alternative host) drive requests through the
    /// exact same stack `.serve()` uses, without opening a socket.
    pub fn adapter(&self) -> Arc<dyn Adapter> {
        self.app.clone()
    }

    /// Run startup hooks, spawn background services, then serve HTTP on
    /// `addr` until a shutdown signal (Ctrl-C or SIGTERM) arrives. Drains
    /// in-flight connections and cancels services before running shutdown
    /// hooks and returning.
    pub async fn serve(self, addr: &str) -> std::io::Result<()> {
        for hook in self.startup_hooks {
            hook().await;
        }

        let mut service_handles = Vec::with_capacity(self.services.len());
        for spawn in self.services {
            let token = CancellationToken::new();
            let beans = (*self.beans).clone();
            let handle = tokio::spawn(spawn(beans, token.clone()));
            service_handles.push((token, handle));
        }

        let adapter: Arc<dyn Adapter> = self.app.clone();
        let result = crate::server::serve(
            addr,
            adapter,
            self.app.request_id_gen.clone(),
            shutdown_signal(),
        )
        .await;

        for (token, handle) in service_handles {
            token.cancel();
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "background service task panicked");
            }
        }

        for hook in self.shutdown_hooks {
            hook().await;
        }

        result
    }

    /// Like `.serve`, but binds through `dev::get_or_bind_listener` so a
    /// supervised dev-reload loop can hand the same socket to a freshly
    /// spawned process without a bind-in-use race.
    #[cfg(feature = "dev-reload")]
    pub async fn serve_dev(self, addr: &str) -> std::io::Result<()> {
        let listener = crate::dev::get_or_bind_listener(addr)
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        for hook in self.startup_hooks {
            hook().await;
        }

        let mut service_handles = Vec::with_capacity(self.services.len());
        for spawn in self.services {
            let token = CancellationToken::new();
            let beans = (*self.beans).clone();
            let handle = tokio::spawn(spawn(beans, token.clone()));
            service_handles.push((token, handle));
        }

        let adapter: Arc<dyn Adapter> = self.app.clone();
        let result = crate::server::serve_listener(
            listener,
            adapter,
            self.app.request_id_gen.clone(),
            shutdown_signal(),
        )
        .await;

        for (token, handle) in service_handles {
            token.cancel();
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "background service task panicked");
            }
        }

        for hook in self.shutdown_hooks {
            hook().await;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::async_handler;
    use crate::response::{IntoResponse, Json};
    use crate::scope::ProtocolKind;
    use http::{HeaderMap, HeaderValue, Method, StatusCode};
    use std::sync::Mutex;

    /// Collects whatever an `App` writes, for assertion in tests.
    #[derive(Default)]
    struct RecordingProtocol {
        status: Option<StatusCode>,
        headers: HeaderMap,
        body: Mutex<Vec<Bytes>>,
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
        Arc::new(Scope::new(
            ProtocolKind::Http,
            method,
            path.to_string(),
            None,
            HeaderMap::new(),
            None,
            "test-req".to_string(),
        ))
    }

    #[tokio::test]
    async fn dispatches_a_registered_route() {
        let server = AppBuilder::new()
            .register_routes(|router| {
                router.add_route(
                    "/hello",
                    [Method::GET],
                    async_handler("hello", |_ctx| async { "world".into_response() }),
                    None,
                )
            })
            .build();

        let mut protocol = RecordingProtocol::default();
        server
            .app
            .handle(scope(Method::GET, "/hello"), Bytes::new(), &mut protocol)
            .await;

        assert_eq!(protocol.status, Some(StatusCode::OK));
        assert_eq!(protocol.body.into_inner().unwrap().concat(), b"world");
    }

    #[tokio::test]
    async fn unmatched_path_yields_404() {
        let server = AppBuilder::new().build();
        let mut protocol = RecordingProtocol::default();
        server
            .app
            .handle(scope(Method::GET, "/missing"), Bytes::new(), &mut protocol)
            .await;
        assert_eq!(protocol.status, Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn trailing_slash_normalizes_when_enabled() {
        let server = AppBuilder::new()
            .normalize_trailing_slash(true)
            .register_routes(|router| {
                router.add_route(
                    "/items",
                    [Method::GET],
                    async_handler("items", |_ctx| async { Json(serde_json::json!([])).into_response() }),
                    None,
                )
            })
            .build();

        let mut protocol = RecordingProtocol::default();
        server
            .app
            .handle(scope(Method::GET, "/items/"), Bytes::new(), &mut protocol)
            .await;
        assert_eq!(protocol.status, Some(StatusCode::OK));
    }

    #[tokio::test]
    async fn plugin_middleware_runs_around_every_request() {
        let server = AppBuilder::new()
            .with_plugin(crate::secure_headers::SecureHeaders::default())
            .register_routes(|router| {
                router.add_route(
                    "/",
                    [Method::GET],
                    async_handler("root", |_ctx| async { "ok".into_response() }),
                    None,
                )
            })
            .build();

        let mut protocol = RecordingProtocol::default();
        server
            .app
            .handle(scope(Method::GET, "/"), Bytes::new(), &mut protocol)
            .await;

        assert_eq!(
            protocol.headers.get("x-content-type-options"),
            Some(&HeaderValue::from_static("nosniff"))
        );
    }

    #[tokio::test]
    async fn beans_are_resolvable_after_build() {
        #[derive(Clone)]
        struct Greeting(&'static str);

        let server = AppBuilder::new().provide(Greeting("hi")).build();
        let greeting = server.beans.resolve::<Greeting>().await.unwrap();
        assert_eq!(greeting.0, "hi");
    }
}
