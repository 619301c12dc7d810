//! Handler dispatch (C12): resolves parameters, invokes the handler, coerces
//! its return value into a `Response`, and runs the registered validation
//! error formatter on resolution/validation failure. Synchronous handlers
//! are offloaded to a blocking thread so they never stall the reactor.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::di::BeanContext;
use crate::error::VelithonError;
use crate::pattern::CapturedValue;
use crate::response::{IntoResponse, Response};
use crate::scope::Request;
use crate::validation::ValidationErrorFormatter;

/// Everything a handler invocation needs: the request, its path captures,
/// and a handle to the DI container for `dependency`-sourced parameters.
#[derive(Clone)]
pub struct DispatchContext {
    pub request: Arc<Request>,
    pub captures: HashMap<String, CapturedValue>,
    pub beans: Arc<BeanContext>,
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An async handler body. Boxed so `Router`/`Route` can hold heterogeneous
/// handlers behind one type.
pub type AsyncHandlerFn = Arc<dyn Fn(DispatchContext) -> BoxFuture<Response> + Send + Sync>;

/// A synchronous handler body, always run via `spawn_blocking`.
pub type BlockingHandlerFn = Arc<dyn Fn(DispatchContext) -> Response + Send + Sync>;

pub enum HandlerKind {
    Async(AsyncHandlerFn),
    Blocking(BlockingHandlerFn),
}

/// The handler a route holds. Carries a name purely for diagnostics
/// (panic messages, tracing spans) since closures have none of their own.
pub struct HandlerEntry {
    pub name: String,
    pub kind: HandlerKind,
}

pub type BoxedHandler = Arc<HandlerEntry>;

/// Wrap an async function as a `BoxedHandler`.
pub fn async_handler<F, Fut>(name: impl Into<String>, f: F) -> BoxedHandler
where
    F: Fn(DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(HandlerEntry {
        name: name.into(),
        kind: HandlerKind::Async(Arc::new(move |ctx| Box::pin(f(ctx)))),
    })
}

/// Wrap a synchronous function as a `BoxedHandler`; dispatched via
/// `tokio::task::spawn_blocking` so it never blocks the async reactor.
pub fn blocking_handler<F>(name: impl Into<String>, f: F) -> BoxedHandler
where
    F: Fn(DispatchContext) -> Response + Send + Sync + 'static,
{
    Arc::new(HandlerEntry {
        name: name.into(),
        kind: HandlerKind::Blocking(Arc::new(f)),
    })
}

/// Invoke a handler, running blocking handlers on a blocking thread. Panics
/// inside the handler are caught and turned into an `InternalError` response
/// rather than taking down the worker task (spec.md §4.4).
pub async fn invoke(handler: &HandlerEntry, ctx: DispatchContext) -> Response {
    match &handler.kind {
        HandlerKind::Async(f) => {
            let fut = f(ctx.clone());
            match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                Ok(response) => response,
                Err(_) => panic_response(&handler.name, &ctx),
            }
        }
        HandlerKind::Blocking(f) => {
            let f = f.clone();
            let ctx_for_blocking = ctx.clone();
            let joined = tokio::task::spawn_blocking(move || {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(ctx_for_blocking)))
            })
            .await;
            match joined {
                Ok(Ok(response)) => response,
                _ => panic_response(&handler.name, &ctx),
            }
        }
    }
}

fn panic_response(handler_name: &str, ctx: &DispatchContext) -> Response {
    tracing::error!(
        handler = handler_name,
        request_id = ctx.request.request_id(),
        "handler panicked"
    );
    VelithonError::internal(format!("handler '{handler_name}' panicked")).into_response()
}

/// Render a resolver failure through the route/router/app validation
/// formatter precedence, falling back to the plain `VelithonError` rendering
/// for non-validation resolver errors.
pub fn render_resolver_error(
    err: crate::resolver::ResolverError,
    formatter: Option<&Arc<dyn ValidationErrorFormatter>>,
) -> Response {
    let velithon_err = err.into_velithon_error();
    match (&velithon_err, formatter) {
        (VelithonError::ValidationFailed(errors), Some(f)) => f.format(errors.clone()),
        _ => velithon_err.into_response(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Body;
    use crate::scope::{ProtocolKind, Scope};
    use http::{HeaderMap, Method, StatusCode};

    fn test_ctx() -> DispatchContext {
        let scope = Arc::new(Scope::new(
            ProtocolKind::Http,
            Method::GET,
            "/".into(),
            None,
            HeaderMap::new(),
            None,
            "req-1".into(),
        ));
        let request = Arc::new(Request::new(scope, bytes::Bytes::new()));
        let registry = Arc::new(crate::di::BeanRegistry::new());
        let beans = Arc::new(BeanContext::new(registry));
        DispatchContext {
            request,
            captures: HashMap::new(),
            beans,
        }
    }

    #[tokio::test]
    async fn async_handler_invokes_and_returns_response() {
        let handler = async_handler("echo", |_ctx| async {
            Response::new(StatusCode::OK, Body::from_bytes(bytes::Bytes::from_static(b"hi")))
        });
        let resp = invoke(&handler, test_ctx()).await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn blocking_handler_runs_off_the_reactor() {
        let handler = blocking_handler("block", |_ctx| {
            Response::new(StatusCode::OK, Body::from_bytes(bytes::Bytes::new()))
        });
        let resp = invoke(&handler, test_ctx()).await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn panicking_handler_yields_internal_error_response() {
        let handler = async_handler("boom", |_ctx| async { panic!("kaboom") });
        let resp = invoke(&handler, test_ctx()).await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
