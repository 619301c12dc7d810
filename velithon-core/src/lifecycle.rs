//! Startup/shutdown hooks and the graceful-shutdown signal.
//!
//! Hooks run once: startup hooks after the bean graph resolves and before
//! the listener starts accepting, shutdown hooks after the listener stops
//! accepting but before the process exits.

use std::future::Future;
use std::pin::Pin;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub type StartupHook = Box<dyn FnOnce() -> BoxFuture + Send>;
pub type ShutdownHook = Box<dyn FnOnce() -> BoxFuture + Send>;

pub fn startup_hook<F, Fut>(f: F) -> StartupHook
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

pub fn shutdown_hook<F, Fut>(f: F) -> ShutdownHook
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM — whichever comes first.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
