//! Dependency-injection container (C6).
//!
//! Generalizes the bean/producer registry pattern into the three provider
//! lifecycles named by spec.md §4.6: `Singleton`, `Factory`, `AsyncFactory`.
//! A provider graph is validated for cycles once, with Kahn's algorithm,
//! at registration time; per-resolution re-entrancy is additionally guarded
//! against at call time in case providers are registered incrementally.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

// A dependency chain being resolved right now, scoped per top-level
// `resolve()` call rather than stored on the shared `BeanContext` — two
// concurrent, independent top-level resolutions of the same key (e.g. two
// requests racing to build the same singleton) must not collide with each
// other's re-entrancy guard. Nested resolutions made from inside a
// provider factory (`ctx.resolve::<Dep>()`) run within the same task-local
// scope as their caller, so a genuine cycle within one chain is still
// caught.
tokio::task_local! {
    static RESOLUTION_CHAIN: RefCell<HashSet<TypeId>>;
}

pub type AnyValue = Arc<dyn Any + Send + Sync>;
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors raised while registering or resolving providers.
#[derive(Debug, thiserror::Error)]
pub enum BeanError {
    #[error("cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
    #[error("missing dependency '{0}' required by '{1}'")]
    MissingDependency(String, String),
    #[error("bean '{0}' is already registered")]
    DuplicateBean(String),
    #[error("missing config keys for bean '{bean}': {}", .keys.join(", "))]
    MissingConfigKeys { bean: String, keys: Vec<String> },
    #[error("construction of '{0}' failed: {1}")]
    ConstructionFailed(String, String),
}

/// A provider's declared lifecycle, per spec.md §4.6.
pub enum Lifecycle {
    /// Resolved at most once; concurrent first-resolutions converge on the
    /// same instance. Failure is not cached — a retry may succeed.
    Singleton,
    /// A fresh instance per call; dependencies are re-resolved each time.
    Factory,
    /// Same as `Factory`, but the factory itself is `async`.
    AsyncFactory,
}

type Factory = Arc<dyn Fn(BeanContext) -> BoxFuture<'static, Result<AnyValue, BeanError>> + Send + Sync>;

struct ProviderEntry {
    key: TypeId,
    name: &'static str,
    lifecycle: Lifecycle,
    deps: Vec<TypeId>,
    factory: Factory,
}

/// A trait object a bean/provider can implement to declare itself, as a
/// generalization of the teacher's `Bean`/`AsyncBean` split — kept as a
/// single async trait since Rust's `async fn` in traits covers both cases.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    fn lifecycle() -> Lifecycle
    where
        Self: Sized,
    {
        Lifecycle::Singleton
    }

    async fn provide(ctx: &BeanContext) -> Result<Self::Output, BeanError>
    where
        Self: Sized;
}

/// Builds the provider DAG and validates acyclicity via Kahn's algorithm.
#[derive(Default)]
pub struct BeanRegistry {
    providers: HashMap<TypeId, ProviderEntry>,
}

impl BeanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider with its declared dependencies (by `TypeId`).
    pub fn register<T, F, Fut>(
        &mut self,
        name: &'static str,
        lifecycle: Lifecycle,
        deps: Vec<TypeId>,
        factory: F,
    ) -> Result<(), BeanError>
    where
        T: Send + Sync + 'static,
        F: Fn(BeanContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BeanError>> + Send + 'static,
    {
        let key = TypeId::of::<T>();
        if self.providers.contains_key(&key) {
            return Err(BeanError::DuplicateBean(name.to_string()));
        }
        let boxed_factory: Factory = Arc::new(move |ctx| {
            let fut = factory(ctx);
            Box::pin(async move {
                fut.await
                    .map(|v| Arc::new(v) as AnyValue)
            })
        });
        self.providers.insert(
            key,
            ProviderEntry {
                key,
                name,
                lifecycle,
                deps,
                factory: boxed_factory,
            },
        );
        Ok(())
    }

    /// Validate the provider graph for cycles and missing dependencies,
    /// using Kahn's algorithm (topological sort). Call once after all
    /// providers are registered, before the server begins accepting
    /// requests.
    pub fn validate(&self) -> Result<(), BeanError> {
        let mut in_degree: HashMap<TypeId, usize> = HashMap::new();
        let mut dependents: HashMap<TypeId, Vec<TypeId>> = HashMap::new();

        for entry in self.providers.values() {
            in_degree.entry(entry.key).or_insert(0);
            for dep in &entry.deps {
                if !self.providers.contains_key(dep) {
                    return Err(BeanError::MissingDependency(
                        format!("{dep:?}"),
                        entry.name.to_string(),
                    ));
                }
                *in_degree.entry(entry.key).or_insert(0) += 1;
                dependents.entry(*dep).or_default().push(entry.key);
            }
        }

        let mut queue: VecDeque<TypeId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut visited = 0usize;

        while let Some(key) = queue.pop_front() {
            visited += 1;
            if let Some(deps) = dependents.get(&key) {
                for dep_key in deps {
                    let deg = in_degree.get_mut(dep_key).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(*dep_key);
                    }
                }
            }
        }

        if visited != self.providers.len() {
            let chain: Vec<String> = self
                .providers
                .values()
                .filter(|e| in_degree.get(&e.key).copied().unwrap_or(0) > 0)
                .map(|e| e.name.to_string())
                .collect();
            return Err(BeanError::CyclicDependency(chain));
        }
        Ok(())
    }
}

/// Per-resolution context handed to providers. Cheap to clone (an `Arc`
/// around the shared registry/cache state).
#[derive(Clone)]
pub struct BeanContext {
    inner: Arc<BeanContextInner>,
}

struct BeanContextInner {
    registry: Arc<BeanRegistry>,
    /// Singleton cache: resolved at most once, keyed by `TypeId`. Failure
    /// is not cached (see `resolve`).
    singletons: Mutex<HashMap<TypeId, AnyValue>>,
    /// Per-key locks guarding concurrent first-resolution of a singleton so
    /// concurrent callers converge on the same instance.
    locks: Mutex<HashMap<TypeId, Arc<tokio::sync::Mutex<()>>>>,
    /// Request-scoped override map (AMBIENT-5): a request may supply a
    /// pre-built instance for a provider key, consulted before the
    /// process-global singleton cache.
    overrides: Mutex<HashMap<TypeId, AnyValue>>,
}

impl BeanContext {
    pub fn new(registry: Arc<BeanRegistry>) -> Self {
        BeanContext {
            inner: Arc::new(BeanContextInner {
                registry,
                singletons: Mutex::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
                overrides: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Supply a request-scoped override for `T`, consulted before falling
    /// back to the process-global singleton cache.
    pub fn with_override<T: Send + Sync + 'static>(&self, value: T) {
        self.inner
            .overrides
            .lock()
            .insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Resolve a provider key, honoring its declared lifecycle.
    pub async fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, BeanError> {
        let key = TypeId::of::<T>();

        if let Some(value) = self.inner.overrides.lock().get(&key).cloned() {
            return downcast(value);
        }

        // If we're already running inside a resolution chain (this call came
        // from a provider factory resolving one of its own dependencies),
        // extend that chain's in-progress set. Otherwise this is a fresh
        // top-level call: start a new chain scoped to it alone, so it can't
        // collide with another top-level resolution racing it.
        if RESOLUTION_CHAIN.try_with(|_| ()).is_ok() {
            self.resolve_chained::<T>(key).await
        } else {
            RESOLUTION_CHAIN
                .scope(RefCell::new(HashSet::new()), self.resolve_chained::<T>(key))
                .await
        }
    }

    async fn resolve_chained<T: Send + Sync + 'static>(&self, key: TypeId) -> Result<Arc<T>, BeanError> {
        let first_insert = RESOLUTION_CHAIN.with(|chain| chain.borrow_mut().insert(key));
        if !first_insert {
            return Err(BeanError::CyclicDependency(vec![format!("{key:?}")]));
        }
        let result = self.resolve_inner::<T>(key).await;
        RESOLUTION_CHAIN.with(|chain| {
            chain.borrow_mut().remove(&key);
        });
        result
    }

    async fn resolve_inner<T: Send + Sync + 'static>(&self, key: TypeId) -> Result<Arc<T>, BeanError> {
        let entry_name;
        let factory;
        let lifecycle_is_singleton;
        {
            let entry = self
                .inner
                .registry
                .providers
                .get(&key)
                .ok_or_else(|| BeanError::MissingDependency(format!("{key:?}"), "<root>".into()))?;
            entry_name = entry.name;
            factory = entry.factory.clone();
            lifecycle_is_singleton = matches!(entry.lifecycle, Lifecycle::Singleton);
        }

        if lifecycle_is_singleton {
            if let Some(cached) = self.inner.singletons.lock().get(&key).cloned() {
                return downcast(cached);
            }
            let lock = {
                let mut locks = self.inner.locks.lock();
                locks
                    .entry(key)
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                    .clone()
            };
            let _guard = lock.lock().await;
            // Re-check after acquiring the lock: another resolver may have
            // populated the cache while we waited.
            if let Some(cached) = self.inner.singletons.lock().get(&key).cloned() {
                return downcast(cached);
            }
            let value = factory(self.clone())
                .await
                .map_err(|e| BeanError::ConstructionFailed(entry_name.to_string(), e.to_string()))?;
            self.inner.singletons.lock().insert(key, value.clone());
            downcast(value)
        } else {
            let value = factory(self.clone()).await?;
            downcast(value)
        }
    }
}

fn downcast<T: Send + Sync + 'static>(value: AnyValue) -> Result<Arc<T>, BeanError> {
    value
        .downcast::<T>()
        .map_err(|_| BeanError::ConstructionFailed(std::any::type_name::<T>().to_string(), "type mismatch".into()))
}
