//! Service registry and health-aware peer selection (C10).
//!
//! Grounded on `velithon/vsp/mesh.py`'s `ServiceInfo`/`ServiceMesh`, with
//! the registry backed by `dashmap` instead of a plain dict plus lock
//! (spec.md §5: "Service registry: readers/writers coordinate via a lock;
//! mesh queries do not block health updates for long").

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;

#[derive(Debug)]
pub struct ServiceInfo {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    healthy: AtomicBool,
    last_health_check_unix_ms: AtomicU64,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            weight: weight.max(1),
            healthy: AtomicBool::new(true),
            last_health_check_unix_ms: AtomicU64::new(0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn mark_healthy(&self) {
        if !self.healthy.swap(true, Ordering::Relaxed) {
            tracing::info!(service = %self.name, host = %self.host, port = self.port, "peer marked healthy");
        }
    }

    pub fn mark_unhealthy(&self) {
        if self.healthy.swap(false, Ordering::Relaxed) {
            tracing::warn!(service = %self.name, host = %self.host, port = self.port, "peer marked unhealthy");
        }
    }

    pub fn connection_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Pluggable peer-selection strategy (spec.md §4.10: round-robin default,
/// weighted and random pluggable).
pub trait LoadBalancer: Send + Sync {
    fn select(&self, service_name: &str, instances: &[Arc<ServiceInfo>]) -> Arc<ServiceInfo>;
}

#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    cursors: DashMap<String, AtomicUsize>,
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self, service_name: &str, instances: &[Arc<ServiceInfo>]) -> Arc<ServiceInfo> {
        let cursor = self
            .cursors
            .entry(service_name.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        let idx = cursor.fetch_add(1, Ordering::Relaxed) % instances.len();
        Arc::clone(&instances[idx])
    }
}

#[derive(Debug, Default)]
pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn select(&self, _service_name: &str, instances: &[Arc<ServiceInfo>]) -> Arc<ServiceInfo> {
        let idx = rand::thread_rng().gen_range(0..instances.len());
        Arc::clone(&instances[idx])
    }
}

#[derive(Debug, Default)]
pub struct WeightedBalancer;

impl LoadBalancer for WeightedBalancer {
    fn select(&self, _service_name: &str, instances: &[Arc<ServiceInfo>]) -> Arc<ServiceInfo> {
        let total_weight: u32 = instances.iter().map(|s| s.weight).sum();
        let mut pick = rand::thread_rng().gen_range(0..total_weight.max(1));
        for instance in instances {
            if pick < instance.weight {
                return Arc::clone(instance);
            }
            pick -= instance.weight;
        }
        Arc::clone(instances.last().expect("instances is non-empty"))
    }
}

/// Registry of VSP peers, grouped by service name.
pub struct ServiceMesh {
    services: DashMap<String, Vec<Arc<ServiceInfo>>>,
    balancer: Arc<dyn LoadBalancer>,
}

impl ServiceMesh {
    pub fn new(balancer: Arc<dyn LoadBalancer>) -> Self {
        Self {
            services: DashMap::new(),
            balancer,
        }
    }

    pub fn register(&self, name: impl Into<String>, host: impl Into<String>, port: u16, weight: u32) {
        let name = name.into();
        let host = host.into();
        let mut entry = self.services.entry(name.clone()).or_default();
        if entry.iter().any(|s| s.host == host && s.port == port) {
            return;
        }
        tracing::info!(service = %name, %host, port, "registered peer");
        entry.push(Arc::new(ServiceInfo::new(name, host, port, weight)));
    }

    pub fn deregister(&self, name: &str, host: &str, port: u16) {
        if let Some(mut entry) = self.services.get_mut(name) {
            entry.retain(|s| !(s.host == host && s.port == port));
        }
    }

    /// Healthy peer selected by the configured balancer, or `None` if the
    /// service is unknown or has no healthy instances.
    pub fn query(&self, name: &str) -> Option<Arc<ServiceInfo>> {
        let entry = self.services.get(name)?;
        let healthy: Vec<Arc<ServiceInfo>> = entry.iter().filter(|s| s.is_healthy()).cloned().collect();
        if healthy.is_empty() {
            tracing::debug!(service = %name, "no healthy instances");
            return None;
        }
        Some(self.balancer.select(name, &healthy))
    }

    pub fn peers(&self, name: &str) -> Vec<Arc<ServiceInfo>> {
        self.services.get(name).map(|e| e.clone()).unwrap_or_default()
    }
}

impl Default for ServiceMesh {
    fn default() -> Self {
        Self::new(Arc::new(RoundRobinBalancer::default()))
    }
}
