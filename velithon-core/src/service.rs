//! Background services that participate in DI but don't handle HTTP.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::di::{BeanContext, BeanError};

/// A long-running background component (queue consumer, metrics exporter,
/// scheduled job runner) constructed from the DI container and spawned
/// alongside the HTTP listener.
///
/// # Example
///
/// ```ignore
/// struct MetricsExporter { pool: Arc<Pool> }
///
/// impl ServiceComponent for MetricsExporter {
///     async fn from_beans(beans: &BeanContext) -> Result<Self, BeanError> {
///         Ok(Self { pool: beans.resolve::<Pool>().await? })
///     }
///
///     async fn start(self, shutdown: CancellationToken) {
///         loop {
///             tokio::select! {
///                 _ = shutdown.cancelled() => break,
///                 _ = tokio::time::sleep(Duration::from_secs(60)) => { /* export */ }
///             }
///         }
///     }
/// }
/// ```
pub trait ServiceComponent: Sized + Send + 'static {
    /// Construct from the resolved DI container.
    fn from_beans(beans: &BeanContext) -> impl Future<Output = Result<Self, BeanError>> + Send;

    /// Run until the shutdown token is cancelled.
    fn start(self, shutdown: CancellationToken) -> impl Future<Output = ()> + Send;
}
