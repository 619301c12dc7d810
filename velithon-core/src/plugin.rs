//! The `Plugin` extension point.
//!
//! A plugin bundles a middleware layer, a set of routes, or both, behind a
//! single name so applications can turn a cross-cutting concern (CORS,
//! health checks, security headers) on or off as a unit. Registration order
//! is the only sequencing rule: a plugin that needs to run outermost (e.g.
//! request-id tagging) is simply installed first.

use std::sync::Arc;

use crate::middleware::Middleware;
use crate::route::{RouteError, Router};

pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// The middleware layer this plugin contributes, if any.
    fn middleware(self: Arc<Self>) -> Option<Arc<dyn Middleware>> {
        None
    }

    /// Routes this plugin contributes (e.g. `/health`), if any.
    fn routes(&self, _router: &mut Router) -> Result<(), RouteError> {
        Ok(())
    }
}
