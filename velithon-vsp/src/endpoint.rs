//! Endpoint registration: the VSP-side counterpart of C12's handler
//! dispatcher, minus the HTTP parameter resolver — a VSP endpoint takes
//! a JSON body and returns a JSON body.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::message::VspError;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type EndpointResult = Result<Value, VspError>;
pub type EndpointHandler = Arc<dyn Fn(Value) -> BoxFuture<EndpointResult> + Send + Sync>;

/// How workers invoke a registered endpoint: cooperatively on the async
/// runtime, or offloaded to a blocking thread-pool task. spec.md §4.9:
/// "single-thread cooperative workers, or cross-thread workers that
/// execute the handler on a thread pool."
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerMode {
    Cooperative,
    Threaded,
}

#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: DashMap<String, EndpointHandler>,
}

impl EndpointRegistry {
    pub fn register<F, Fut>(&self, endpoint: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EndpointResult> + Send + 'static,
    {
        let endpoint = endpoint.into();
        let handler: EndpointHandler = Arc::new(move |body| Box::pin(handler(body)));
        self.endpoints.insert(endpoint, handler);
    }

    pub fn get(&self, endpoint: &str) -> Option<EndpointHandler> {
        self.endpoints.get(endpoint).map(|e| Arc::clone(e.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registers_and_invokes_handler() {
        let registry = EndpointRegistry::default();
        registry.register("add", |body: Value| async move {
            let a = body["a"].as_i64().unwrap_or(0);
            let b = body["b"].as_i64().unwrap_or(0);
            Ok(serde_json::json!({ "sum": a + b }))
        });

        let handler = registry.get("add").unwrap();
        let result = handler(serde_json::json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(result["sum"], 5);
    }

    #[test]
    fn unregistered_endpoint_returns_none() {
        let registry = EndpointRegistry::default();
        assert!(registry.get("ghost").is_none());
    }
}
