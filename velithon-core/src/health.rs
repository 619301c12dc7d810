//! Advanced health check system with liveness/readiness probes.
//!
//! Provides a [`HealthIndicator`] trait for custom health checks and a
//! builder pattern for assembling multiple checks into the
//! [`Health`](crate::plugins::Health) plugin.
//!
//! # Endpoints
//!
//! | Path                | Description                                 |
//! |----------------------|---------------------------------------------|
//! | `GET /health`        | Aggregated status — 200 if UP, 503 if DOWN  |
//! | `GET /health/live`   | Liveness probe — always 200                 |
//! | `GET /health/ready`  | Readiness probe — 200 if all checks pass    |
//!
//! # Example
//!
//! ```ignore
//! use velithon_core::health::{HealthIndicator, HealthStatus};
//!
//! struct DbHealth { pool: SqlitePool }
//!
//! impl HealthIndicator for DbHealth {
//!     fn name(&self) -> &str { "db" }
//!     async fn check(&self) -> HealthStatus {
//!         match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
//!             Ok(_) => HealthStatus::Up,
//!             Err(e) => HealthStatus::Down(e.to_string()),
//!         }
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use serde::Serialize;

use crate::dispatcher::{async_handler, BoxedHandler};
use crate::response::{IntoResponse, Json};

/// Result of a single health check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down(String),
}

impl HealthStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, HealthStatus::Up)
    }
}

/// A named health indicator that can be registered with the health plugin.
pub trait HealthIndicator: Send + Sync + 'static {
    /// The name of this health check (e.g. `"db"`, `"redis"`).
    fn name(&self) -> &str;

    /// Perform the health check.
    fn check(&self) -> impl std::future::Future<Output = HealthStatus> + Send;

    /// Whether this check affects the readiness probe (default: `true`).
    ///
    /// Liveness-only checks (e.g. disk space) return `false` so they don't
    /// block readiness.
    fn affects_readiness(&self) -> bool {
        true
    }
}

/// A single check result in the health response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthCheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthCheckStatus {
    Up,
    Down,
}

/// Aggregated health response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthCheckStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<HealthCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
}

/// Object-safe wrapper for `HealthIndicator`.
#[doc(hidden)]
pub trait HealthIndicatorErased: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn check(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = HealthStatus> + Send + '_>>;
    fn affects_readiness(&self) -> bool;
}

impl<T: HealthIndicator> HealthIndicatorErased for T {
    fn name(&self) -> &str {
        HealthIndicator::name(self)
    }

    fn check(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = HealthStatus> + Send + '_>> {
        Box::pin(HealthIndicator::check(self))
    }

    fn affects_readiness(&self) -> bool {
        HealthIndicator::affects_readiness(self)
    }
}

/// Builder for assembling health checks.
pub struct HealthBuilder {
    checks: Vec<Box<dyn HealthIndicatorErased>>,
    cache_ttl: Option<Duration>,
}

impl HealthBuilder {
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            cache_ttl: None,
        }
    }

    /// Register a health check.
    pub fn check<H: HealthIndicator>(mut self, indicator: H) -> Self {
        self.checks.push(Box::new(indicator));
        self
    }

    /// Cache check results for the given duration before re-running them.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Build the advanced health plugin.
    pub fn build(self) -> crate::plugins::AdvancedHealth {
        crate::plugins::AdvancedHealth::new(self.checks, self.cache_ttl)
    }
}

impl Default for HealthBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state for health check handlers.
#[doc(hidden)]
pub struct HealthState {
    #[doc(hidden)]
    pub checks: Vec<Box<dyn HealthIndicatorErased>>,
    #[doc(hidden)]
    pub start_time: Instant,
    #[doc(hidden)]
    pub cache_ttl: Option<Duration>,
    #[doc(hidden)]
    pub cache: tokio::sync::RwLock<Option<(HealthResponse, Instant)>>,
}

impl HealthState {
    #[doc(hidden)]
    pub async fn aggregate(&self) -> HealthResponse {
        self.aggregate_filtered(|_| true).await
    }

    /// Aggregate only checks that affect readiness.
    #[doc(hidden)]
    pub async fn aggregate_readiness(&self) -> HealthResponse {
        self.aggregate_filtered(|c| c.affects_readiness()).await
    }

    async fn aggregate_filtered(
        &self,
        include: impl Fn(&dyn HealthIndicatorErased) -> bool,
    ) -> HealthResponse {
        if let Some(ttl) = self.cache_ttl {
            let cache = self.cache.read().await;
            if let Some((ref response, ref timestamp)) = *cache {
                if timestamp.elapsed() < ttl {
                    return response.clone();
                }
            }
        }

        let mut checks = Vec::new();
        let mut all_up = true;

        for indicator in &self.checks {
            if !include(indicator.as_ref()) {
                continue;
            }
            let start = Instant::now();
            let status = indicator.check().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (check_status, reason) = match &status {
                HealthStatus::Up => (HealthCheckStatus::Up, None),
                HealthStatus::Down(r) => {
                    all_up = false;
                    (HealthCheckStatus::Down, Some(r.clone()))
                }
            };
            checks.push(HealthCheck {
                name: indicator.name().to_string(),
                status: check_status,
                reason,
                duration_ms: Some(duration_ms),
            });
        }

        let response = HealthResponse {
            status: if all_up { HealthCheckStatus::Up } else { HealthCheckStatus::Down },
            checks,
            uptime_seconds: Some(self.start_time.elapsed().as_secs()),
        };

        if self.cache_ttl.is_some() {
            let mut cache = self.cache.write().await;
            *cache = Some((response.clone(), Instant::now()));
        }

        response
    }
}

fn status_for(response: &HealthResponse) -> StatusCode {
    if response.status == HealthCheckStatus::Up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub(crate) fn simple_health_handler() -> BoxedHandler {
    async_handler("health", |_ctx| async { "OK".into_response() })
}

pub(crate) fn health_handler(state: Arc<HealthState>) -> BoxedHandler {
    async_handler("health", move |_ctx| {
        let state = state.clone();
        async move {
            let response = state.aggregate().await;
            let status = status_for(&response);
            (status, Json(response)).into_response()
        }
    })
}

pub(crate) fn liveness_handler() -> BoxedHandler {
    async_handler("health_live", |_ctx| async { (StatusCode::OK, "OK").into_response() })
}

pub(crate) fn readiness_handler(state: Arc<HealthState>) -> BoxedHandler {
    async_handler("health_ready", move |_ctx| {
        let state = state.clone();
        async move {
            let response = state.aggregate_readiness().await;
            let status = status_for(&response);
            (status, Json(response)).into_response()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysUp;
    impl HealthIndicator for AlwaysUp {
        fn name(&self) -> &str {
            "always_up"
        }
        async fn check(&self) -> HealthStatus {
            HealthStatus::Up
        }
    }

    struct AlwaysDown;
    impl HealthIndicator for AlwaysDown {
        fn name(&self) -> &str {
            "always_down"
        }
        async fn check(&self) -> HealthStatus {
            HealthStatus::Down("boom".into())
        }
        fn affects_readiness(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn aggregate_reports_down_when_any_check_fails() {
        let plugin = HealthBuilder::new().check(AlwaysUp).check(AlwaysDown).build();
        let state = Arc::new(HealthState {
            checks: plugin.checks_for_test(),
            start_time: Instant::now(),
            cache_ttl: None,
            cache: tokio::sync::RwLock::new(None),
        });
        let response = state.aggregate().await;
        assert_eq!(response.status, HealthCheckStatus::Down);
        assert_eq!(response.checks.len(), 2);
    }

    #[tokio::test]
    async fn readiness_excludes_liveness_only_checks() {
        let plugin = HealthBuilder::new().check(AlwaysDown).build();
        let state = Arc::new(HealthState {
            checks: plugin.checks_for_test(),
            start_time: Instant::now(),
            cache_ttl: None,
            cache: tokio::sync::RwLock::new(None),
        });
        let response = state.aggregate_readiness().await;
        assert_eq!(response.status, HealthCheckStatus::Up);
        assert!(response.checks.is_empty());
    }
}
