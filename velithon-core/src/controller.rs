//! Trait implemented by `#[controller]`-annotated structs (macro-generated).
//!
//! A controller groups a set of route handlers under a shared path prefix
//! and a shared name (used in tracing spans and `MetaRegistry` entries).
//! Handlers reach application services through the DI container (C6)
//! rather than through a controller field, so `register` takes no state.

use crate::meta::MetaRegistry;
use crate::route::{RouteError, Router};

pub trait Controller: Send + Sync + 'static {
    /// Register this controller's routes into `router`.
    fn register(router: &mut Router) -> Result<(), RouteError>
    where
        Self: Sized;

    /// Push this controller's route metadata (for reflection/OpenAPI-style
    /// consumers) into the registry. Default: nothing.
    fn register_meta(_registry: &mut MetaRegistry)
    where
        Self: Sized,
    {
    }

    fn name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}
