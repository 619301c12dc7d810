//! Middleware stack (C3).
//!
//! `tower`-shaped but not `tower`: a `Middleware` wraps a `Next` (the rest of
//! the chain) into a new `Next`. The full chain is built once, behind a
//! `OnceCell`, and reused for every request — no per-request allocation of
//! the middleware closures themselves. Declaration order is the dispatch
//! order; there is no automatic priority bucketing (see the design note
//! this preserves from spec.md).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::dispatcher::DispatchContext;
use crate::response::Response;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextFn = Arc<dyn Fn(DispatchContext) -> BoxFuture<Response> + Send + Sync>;

/// The remainder of the middleware chain (and, at the bottom, the handler
/// dispatch itself), callable as a single async function.
#[derive(Clone)]
pub struct Next(NextFn);

impl Next {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Next(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    pub async fn run(&self, ctx: DispatchContext) -> Response {
        (self.0)(ctx).await
    }
}

/// One layer of request/response processing. `wrap` receives the rest of
/// the chain and returns a new `Next` that runs this middleware first.
/// Implementations that don't call `next.run(ctx)` short-circuit the chain
/// (e.g. an auth guard rejecting before the handler ever runs).
pub trait Middleware: Send + Sync + 'static {
    fn wrap(self: Arc<Self>, next: Next) -> Next;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Builds the composed chain once and caches it. Middlewares are applied in
/// declaration order (first declared = outermost = runs first on the way
/// in, last on the way out) — this order is never reordered by priority,
/// weight, or any other heuristic.
pub struct Stack {
    layers: Vec<Arc<dyn Middleware>>,
    built: OnceCell<Next>,
}

impl Stack {
    pub fn new() -> Self {
        Stack {
            layers: Vec::new(),
            built: OnceCell::new(),
        }
    }

    /// Append a middleware. A layer already present (compared by `Arc`
    /// pointer identity) is not added again, so re-registering the same
    /// `Arc<dyn Middleware>` via two code paths doesn't double-run it —
    /// the original position in the chain is preserved.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        let already_present = self
            .layers
            .iter()
            .any(|existing| Arc::ptr_eq(existing, &middleware));
        if !already_present {
            self.layers.push(middleware);
        }
    }

    /// Build (or return the cached) composed chain terminating in `handler`.
    pub fn build(&self, handler: Next) -> Next {
        self.built
            .get_or_init(|| {
                self.layers
                    .iter()
                    .rev()
                    .cloned()
                    .fold(handler, |next, mw| mw.wrap(next))
            })
            .clone()
    }

    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{BeanContext, BeanRegistry};
    use crate::response::IntoResponse;
    use crate::scope::{ProtocolKind, Scope};
    use http::{HeaderMap, Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_ctx() -> DispatchContext {
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
            request: Arc::new(crate::scope::Request::new(scope, bytes::Bytes::new())),
            captures: Default::default(),
            beans: Arc::new(BeanContext::new(Arc::new(BeanRegistry::new()))),
        }
    }

    struct RecordOrder {
        id: &'static str,
        trace: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    impl Middleware for RecordOrder {
        fn wrap(self: Arc<Self>, next: Next) -> Next {
            Next::new(move |ctx| {
                let this = self.clone();
                let next = next.clone();
                async move {
                    this.trace.lock().push(this.id);
                    next.run(ctx).await
                }
            })
        }
    }

    struct ShortCircuit;
    impl Middleware for ShortCircuit {
        fn wrap(self: Arc<Self>, _next: Next) -> Next {
            Next::new(|_ctx| async { StatusCode::FORBIDDEN.into_response() })
        }
    }

    fn terminal() -> Next {
        Next::new(|_ctx| async { ().into_response() })
    }

    #[tokio::test]
    async fn middlewares_run_in_declaration_order() {
        let trace = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut stack = Stack::new();
        stack.push(Arc::new(RecordOrder { id: "a", trace: trace.clone() }));
        stack.push(Arc::new(RecordOrder { id: "b", trace: trace.clone() }));
        let chain = stack.build(terminal());
        chain.run(test_ctx()).await;
        assert_eq!(*trace.lock(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit_the_chain() {
        let mut stack = Stack::new();
        stack.push(Arc::new(ShortCircuit));
        stack.push(Arc::new(RecordOrder {
            id: "never",
            trace: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }));
        let chain = stack.build(terminal());
        let resp = chain.run(test_ctx()).await;
        assert_eq!(resp.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn duplicate_layer_by_identity_is_not_added_twice() {
        let trace = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let shared: Arc<dyn Middleware> = Arc::new(RecordOrder { id: "once", trace: trace.clone() });
        let mut stack = Stack::new();
        stack.push(shared.clone());
        stack.push(shared);
        let chain = stack.build(terminal());
        chain.run(test_ctx()).await;
        assert_eq!(*trace.lock(), vec!["once"]);
    }

    #[tokio::test]
    async fn build_is_memoized_behind_oncecell() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        struct Counting;
        impl Middleware for Counting {
            fn wrap(self: Arc<Self>, next: Next) -> Next {
                CALLS.fetch_add(1, Ordering::SeqCst);
                next
            }
        }
        let mut stack = Stack::new();
        stack.push(Arc::new(Counting));
        let _ = stack.build(terminal());
        let _ = stack.build(terminal());
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
