//! Request-id propagation (AMBIENT).
//!
//! Every `Scope` already carries a generated request id (see
//! `scope::DefaultRequestIdGenerator`). This middleware is the logging-side
//! counterpart: it wraps every request in a tracing span carrying that id,
//! so every log line emitted further down the stack (handlers, guards,
//! resolvers) correlates back to one request without passing the id
//! explicitly.

use std::sync::Arc;

use tracing::Instrument;

use crate::middleware::{Middleware, Next};

/// Installed first in the stack (outermost) so the span covers the whole
/// request/response cycle, including other middleware.
pub struct RequestIdMiddleware;

impl Middleware for RequestIdMiddleware {
    fn wrap(self: Arc<Self>, next: Next) -> Next {
        Next::new(move |ctx| {
            let next = next.clone();
            let request_id = ctx.request.request_id().to_string();
            let span = tracing::info_span!(
                "request",
                request_id = %request_id,
                method = %ctx.request.method(),
                path = %ctx.request.path()
            );
            async move { next.run(ctx).await }.instrument(span)
        })
    }
}
