use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use velithon_core::di::{BeanContext, BeanRegistry};
use velithon_core::dispatcher::DispatchContext;
use velithon_core::middleware::{Middleware, Next, Stack};
use velithon_core::plugin::Plugin;
use velithon_core::response::IntoResponse;
use velithon_core::route::{RouteError, Router};
use velithon_core::scope::{ProtocolKind, Request, Scope};

use bytes::Bytes;
use http::{HeaderMap, Method};
use std::collections::HashMap;

fn empty_ctx() -> DispatchContext {
    let scope = Arc::new(Scope::new(
        ProtocolKind::Http,
        Method::GET,
        "/".into(),
        None,
        HeaderMap::new(),
        None,
        "req".into(),
    ));
    DispatchContext {
        request: Arc::new(Request::new(scope, Bytes::new())),
        captures: HashMap::new(),
        beans: Arc::new(BeanContext::new(Arc::new(BeanRegistry::new()))),
    }
}

struct Noop;
impl Plugin for Noop {}

#[test]
fn default_name_is_type_name() {
    assert!(Noop.name().contains("Noop"));
}

#[test]
fn default_middleware_is_none() {
    assert!(Arc::new(Noop).middleware().is_none());
}

#[test]
fn default_routes_contribute_nothing() {
    let mut router = Router::new();
    Noop.routes(&mut router).unwrap();
}

struct TaggingMiddleware(&'static str);
impl Middleware for TaggingMiddleware {
    fn wrap(self: Arc<Self>, next: Next) -> Next {
        let tag = self.0;
        Next::new(move |ctx| {
            let tag = tag;
            let next = next.clone();
            async move {
                let mut resp = next.run(ctx).await;
                resp.headers.insert(
                    http::HeaderName::from_static("x-plugin"),
                    http::HeaderValue::from_static(tag),
                );
                resp
            }
        })
    }
}

struct TaggingPlugin;
impl Plugin for TaggingPlugin {
    fn name(&self) -> &'static str {
        "tagging"
    }

    fn middleware(self: Arc<Self>) -> Option<Arc<dyn Middleware>> {
        Some(Arc::new(TaggingMiddleware("tagged")))
    }

    fn routes(&self, router: &mut Router) -> Result<(), RouteError> {
        router.add_route(
            "/plugin-route",
            [Method::GET],
            velithon_core::dispatcher::async_handler("plugin_route", |_ctx| async {
                "ok".into_response()
            }),
            None,
        )
    }
}

#[test]
fn plugin_contributes_routes() {
    let mut router = Router::new();
    TaggingPlugin.routes(&mut router).unwrap();
    let result = router.match_request(&Method::GET, "/plugin-route");
    assert!(matches!(result, velithon_core::route::MatchResult::Full { .. }));
}

#[tokio::test]
async fn plugin_middleware_runs_in_stack() {
    let plugin = Arc::new(TaggingPlugin);
    let layer = Plugin::middleware(plugin).unwrap();
    let mut stack = Stack::new();
    stack.push(layer);
    let called = Arc::new(AtomicBool::new(false));
    let called2 = called.clone();
    let next = Next::new(move |_ctx| {
        let called2 = called2.clone();
        async move {
            called2.store(true, Ordering::SeqCst);
            "base".into_response()
        }
    });
    let chain = stack.build(next);
    let resp = chain.run(empty_ctx()).await;
    assert!(called.load(Ordering::SeqCst));
    assert_eq!(resp.headers.get("x-plugin").unwrap(), "tagged");
}
