//! Context system (C8).
//!
//! Mirrors the request-handling call stack with two task-local stacks: an
//! app-level context (DI container, config) pushed once per process, and a
//! request-level context (the current `Request`) pushed once per incoming
//! request and popped when the handler returns. Handler code that needs
//! "the current request" fetches the existing instance rather than
//! threading it through every function signature — the "singleton
//! request" pattern.

use std::sync::Arc;

use crate::di::BeanContext;
use crate::scope::Request;

tokio::task_local! {
    static APP_CONTEXT: AppContext;
    static REQUEST_CONTEXT: Arc<Request>;
}

/// Process-wide context available to any code running inside `AppContext::scope`.
#[derive(Clone)]
pub struct AppContext {
    pub beans: Arc<BeanContext>,
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("called outside of an app context")]
    NoAppContext,
    #[error("called outside of a request context")]
    NoRequestContext,
}

impl AppContext {
    pub fn new(beans: Arc<BeanContext>) -> Self {
        AppContext { beans }
    }

    /// Run `f` with this context installed as the task-local app context.
    /// Every request handled by the server runs inside one such scope.
    pub async fn scope<F, Fut, T>(self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        APP_CONTEXT.scope(self, f()).await
    }

    /// Fetch the current app context. Errors if called from a task that was
    /// never spawned inside `AppContext::scope`.
    pub fn current() -> Result<AppContext, ContextError> {
        APP_CONTEXT
            .try_with(|ctx| ctx.clone())
            .map_err(|_| ContextError::NoAppContext)
    }
}

/// Push `request` as the task-local "current request" for the duration of `f`.
pub async fn with_request<F, Fut, T>(request: Arc<Request>, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    REQUEST_CONTEXT.scope(request, f()).await
}

/// Fetch the request installed by the innermost enclosing `with_request`.
/// This is the "singleton request" read path: resolver/middleware code asks
/// for *the* request instead of receiving a fresh one.
pub fn current_request() -> Result<Arc<Request>, ContextError> {
    REQUEST_CONTEXT
        .try_with(|req| req.clone())
        .map_err(|_| ContextError::NoRequestContext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::BeanRegistry;
    use crate::scope::{ProtocolKind, Scope};
    use bytes::Bytes;
    use http::{HeaderMap, Method};

    fn sample_request() -> Arc<Request> {
        let scope = Arc::new(Scope::new(
            ProtocolKind::Http,
            Method::GET,
            "/".into(),
            None,
            HeaderMap::new(),
            None,
            "req-ctx".into(),
        ));
        Arc::new(Request::new(scope, Bytes::new()))
    }

    #[tokio::test]
    async fn current_request_outside_scope_errors() {
        assert!(matches!(current_request(), Err(ContextError::NoRequestContext)));
    }

    #[tokio::test]
    async fn current_request_inside_scope_returns_the_same_instance() {
        let req = sample_request();
        let expected_id = req.request_id().to_string();
        with_request(req, || async move {
            let fetched = current_request().unwrap();
            assert_eq!(fetched.request_id(), expected_id);
        })
        .await;
    }

    #[tokio::test]
    async fn app_context_outside_scope_errors() {
        assert!(matches!(AppContext::current(), Err(ContextError::NoAppContext)));
    }

    #[tokio::test]
    async fn app_context_inside_scope_is_retrievable() {
        let beans = Arc::new(BeanContext::new(Arc::new(BeanRegistry::new())));
        let ctx = AppContext::new(beans);
        ctx.scope(|| async {
            assert!(AppContext::current().is_ok());
        })
        .await;
    }
}
