//! The VSP orchestrator: server accept loop + bounded worker queue on the
//! inbound side, connection pool + response routing on the outbound side.
//!
//! Grounded on `velithon/vsp/manager.py` (`VSPManager`) and `client.py`
//! (`VSPClient`), merged into one type because both share the same
//! connection/endpoint/mesh state in the original and every accepted or
//! dialed socket is handled by the same message-routing logic (a socket
//! "carries both directions", per spec.md §4.9).

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::connection::Connection;
use crate::endpoint::{EndpointRegistry, EndpointResult, WorkerMode};
use crate::message::{VspError, VspMessage};
use crate::mesh::ServiceMesh;

const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(5);
const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(8);

struct QueuedMessage {
    message: VspMessage,
    conn: Connection,
}

/// Per-peer exponential backoff after a transient connection error. Doubles
/// from `BACKOFF_BASE` up to `BACKOFF_CAP` on repeated failures and is
/// consulted on the *next* call before dialing again. Keyed by connection
/// key (`host:port`), same granularity as `pools`.
#[derive(Clone, Copy)]
struct Backoff {
    until: Instant,
    next: Duration,
}

pub struct VspManagerConfig {
    pub num_workers: usize,
    pub worker_mode: WorkerMode,
    pub max_queue_size: usize,
    pub max_transports: usize,
}

impl Default for VspManagerConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            worker_mode: WorkerMode::Cooperative,
            max_queue_size: 1000,
            max_transports: 5,
        }
    }
}

pub struct VspManager {
    name: String,
    mesh: Arc<ServiceMesh>,
    endpoints: EndpointRegistry,
    queue_tx: mpsc::Sender<QueuedMessage>,
    queue_rx: std::sync::Mutex<Option<mpsc::Receiver<QueuedMessage>>>,
    waiters: DashMap<String, oneshot::Sender<VspMessage>>,
    pools: DashMap<String, Vec<Connection>>,
    backoffs: DashMap<String, Backoff>,
    health_tasks: DashMap<String, tokio::task::JoinHandle<()>>,
    max_transports: usize,
    worker_mode: WorkerMode,
    num_workers: usize,
    started: AtomicUsize,
}

impl VspManager {
    pub fn new(name: impl Into<String>, mesh: Arc<ServiceMesh>, config: VspManagerConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.max_queue_size.max(1));
        Arc::new(Self {
            name: name.into(),
            mesh,
            endpoints: EndpointRegistry::default(),
            queue_tx: tx,
            queue_rx: std::sync::Mutex::new(Some(rx)),
            waiters: DashMap::new(),
            pools: DashMap::new(),
            backoffs: DashMap::new(),
            health_tasks: DashMap::new(),
            max_transports: config.max_transports.max(1),
            worker_mode: config.worker_mode,
            num_workers: config.num_workers.max(1),
            started: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mesh(&self) -> &Arc<ServiceMesh> {
        &self.mesh
    }

    /// Register a VSP endpoint handler, mirroring `VSPManager.vsp_service`.
    pub fn vsp_service<F, Fut>(&self, endpoint: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EndpointResult> + Send + 'static,
    {
        self.endpoints.register(endpoint, handler);
    }

    /// Start the worker pool. Idempotent: later calls are no-ops so
    /// `serve()` can call it without double-spawning workers.
    pub fn start_workers(self: &Arc<Self>) {
        if self.started.swap(1, Ordering::SeqCst) == 1 {
            return;
        }
        let rx = {
            let mut guard = self.queue_rx.lock().expect("VspManager queue lock poisoned");
            guard.take().expect("VspManager worker queue taken twice")
        };
        let rx = Arc::new(AsyncMutex::new(rx));
        for worker_id in 0..self.num_workers {
            let manager = Arc::clone(self);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                tracing::info!(name = %manager.name, worker_id, mode = ?manager.worker_mode, "VSP worker started");
                loop {
                    let queued = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    match queued {
                        Some(queued) => manager.process_message(queued).await,
                        None => break,
                    }
                }
            });
        }
    }

    async fn process_message(&self, queued: QueuedMessage) {
        let QueuedMessage { message, conn } = queued;
        if message.header.is_response {
            self.handle_response(message);
            return;
        }

        let response = match message.header.endpoint.as_str() {
            "ping" => message.response_to("pong", serde_json::json!({"status": "alive"})),
            "health" => message.response_to("health", serde_json::json!({"status": "healthy"})),
            endpoint => {
                let result = self.invoke_endpoint(endpoint, message.body.clone()).await;
                match result {
                    Ok(body) => message.response_to(endpoint, body),
                    Err(err) => {
                        tracing::error!(%endpoint, error = %err, "VSP endpoint failed");
                        message.error_response(err)
                    }
                }
            }
        };

        if let Err(err) = conn.send(response) {
            tracing::debug!(error = %err, "failed to send VSP response, peer likely gone");
        }
    }

    async fn invoke_endpoint(&self, endpoint: &str, body: Value) -> EndpointResult {
        let handler = self
            .endpoints
            .get(endpoint)
            .ok_or_else(|| VspError::Remote(format!("Endpoint {endpoint} not found")))?;

        match self.worker_mode {
            WorkerMode::Cooperative => handler(body).await,
            WorkerMode::Threaded => {
                let runtime = tokio::runtime::Handle::current();
                tokio::task::spawn_blocking(move || runtime.block_on(handler(body)))
                    .await
                    .unwrap_or_else(|join_err| Err(VspError::Remote(join_err.to_string())))
            }
        }
    }

    fn handle_response(&self, message: VspMessage) {
        if let Some((_, tx)) = self.waiters.remove(&message.header.request_id) {
            let _ = tx.send(message);
        }
    }

    fn route_incoming(self: &Arc<Self>) -> impl Fn(VspMessage, Connection) + Send + Sync + 'static {
        let manager = Arc::clone(self);
        move |message, conn| {
            let request_id = message.header.request_id.clone();
            match manager.queue_tx.try_send(QueuedMessage { message: message.clone(), conn: conn.clone() }) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::error!(%request_id, "VSP worker queue full, dropping message");
                    let _ = conn.send(message.error_response("Message queue full"));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::error!(%request_id, "VSP worker queue closed, dropping message");
                }
            }
        }
    }

    /// Bind and accept connections forever, dispatching every decoded
    /// frame (from either an accepted or a dialed socket) into the worker
    /// queue. Starts the worker pool on first call.
    pub async fn serve(self: &Arc<Self>, host: &str, port: u16) -> Result<(), VspError> {
        self.start_workers();
        let listener = TcpListener::bind((host, port)).await?;
        tracing::info!(name = %self.name, %host, port, "VSP server listening");
        loop {
            let (stream, addr) = listener.accept().await?;
            Connection::accept(stream, addr.to_string(), self.route_incoming());
        }
    }

    /// Register this manager's own service under the mesh so peers can
    /// discover it, without blocking on `serve()`.
    pub fn register_self(&self, host: impl Into<String>, port: u16, weight: u32) {
        self.mesh.register(self.name.clone(), host, port, weight);
    }

    async fn fill_pool(self: &Arc<Self>, key: &str, host: &str, port: u16) -> Result<(), VspError> {
        loop {
            let needed = {
                let mut pool = self.pools.entry(key.to_string()).or_default();
                pool.retain(|c| !c.is_closed());
                self.max_transports.saturating_sub(pool.len())
            };
            if needed == 0 {
                return Ok(());
            }
            let conn = Connection::dial(host, port, self.route_incoming()).await?;
            self.spawn_ping_loop(conn.clone());
            self.pools.entry(key.to_string()).or_default().push(conn);
        }
    }

    async fn ensure_transport(self: &Arc<Self>, service_name: &str) -> Result<String, VspError> {
        let service = self
            .mesh
            .query(service_name)
            .ok_or_else(|| VspError::ServiceUnavailable(service_name.to_string()))?;
        let key = service.connection_key();
        if self.backoff_remaining(&key).is_some() {
            return Err(VspError::ServiceUnavailable(service_name.to_string()));
        }
        if let Err(err) = self.fill_pool(&key, &service.host, service.port).await {
            service.mark_unhealthy();
            self.record_connection_failure(&key);
            return Err(err);
        }
        self.record_connection_success(&key);
        self.start_health_check(service_name.to_string());
        Ok(key)
    }

    /// Remaining backoff window for `key`, if a transient connection error
    /// hasn't yet cooled down. `None` once `until` has passed.
    fn backoff_remaining(&self, key: &str) -> Option<Duration> {
        let backoff = self.backoffs.get(key)?;
        let now = Instant::now();
        if backoff.until > now {
            Some(backoff.until - now)
        } else {
            None
        }
    }

    /// Record a transient connection failure for `key`, doubling the next
    /// backoff window up to `BACKOFF_CAP`.
    fn record_connection_failure(&self, key: &str) {
        let next = self
            .backoffs
            .get(key)
            .map(|b| (b.next * 2).min(BACKOFF_CAP))
            .unwrap_or(BACKOFF_BASE);
        self.backoffs.insert(
            key.to_string(),
            Backoff {
                until: Instant::now() + next,
                next,
            },
        );
    }

    /// Clear any backoff window for `key` after a successful connection.
    fn record_connection_success(&self, key: &str) {
        self.backoffs.remove(key);
    }

    /// Keep a dialed connection's traffic flowing so the peer's heartbeat
    /// supervisor doesn't time it out: spec.md §4.9, "each live connection
    /// sends ping every 10 seconds".
    fn spawn_ping_loop(&self, conn: Connection) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(10)).await;
                if conn.is_closed() {
                    break;
                }
                let ping = VspMessage::new(Uuid::new_v4().to_string(), "", "ping", serde_json::json!({}), false);
                if conn.send(ping).is_err() {
                    break;
                }
            }
        });
    }

    fn pick_transport(&self, key: &str) -> Option<Connection> {
        let pool = self.pools.get(key)?;
        let live: Vec<&Connection> = pool.iter().filter(|c| !c.is_closed()).collect();
        if live.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..live.len());
        Some(live[idx].clone())
    }

    fn clear_pool(&self, key: &str) {
        if let Some(mut pool) = self.pools.get_mut(key) {
            for conn in pool.iter() {
                conn.close();
            }
            pool.clear();
        }
    }

    fn start_health_check(self: &Arc<Self>, service_name: String) {
        if self.health_tasks.contains_key(&service_name) {
            return;
        }
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEALTH_PROBE_INTERVAL).await;
                let peers = manager.mesh.peers(&service_name);
                match manager.call(&service_name, "health", serde_json::json!({})).await {
                    Ok(_) => peers.iter().for_each(|p| p.mark_healthy()),
                    Err(err) => {
                        tracing::warn!(service = %service_name, error = %err, "VSP health probe failed");
                        peers.iter().for_each(|p| p.mark_unhealthy());
                    }
                }
            }
        });
        self.health_tasks.insert(service_name, handle);
    }

    /// Call a remote endpoint by service name, per spec.md §4.9's RPC call
    /// sequence: fresh request id, 10s timeout, pool-clear + unhealthy
    /// mark on timeout.
    pub async fn call(self: &Arc<Self>, service_name: &str, endpoint: &str, body: Value) -> Result<Value, VspError> {
        let key = self.ensure_transport(service_name).await?;
        let conn = match self.pick_transport(&key) {
            Some(conn) => conn,
            None => {
                self.clear_pool(&key);
                self.ensure_transport(service_name).await?;
                self.pick_transport(&key).ok_or(VspError::TransportClosed)?
            }
        };

        let request_id = Uuid::new_v4().to_string();
        let message = VspMessage::new(request_id.clone(), service_name, endpoint, body, false);

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(request_id.clone(), tx);
        if let Err(err) = conn.send(message) {
            self.waiters.remove(&request_id);
            return Err(err);
        }

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(response)) => match response.body_error() {
                Some(message) => Err(VspError::Remote(message)),
                None => Ok(response.body),
            },
            Ok(Err(_)) => Err(VspError::TransportClosed),
            Err(_) => {
                self.waiters.remove(&request_id);
                self.clear_pool(&key);
                self.record_connection_failure(&key);
                self.mesh
                    .peers(service_name)
                    .iter()
                    .for_each(|p| p.mark_unhealthy());
                tracing::error!(%request_id, service = %service_name, "VSP request timed out");
                Err(VspError::Timeout)
            }
        }
    }

    /// Tear down workers, pooled connections and health probes. Mirrors
    /// `VSPManager.close`.
    pub fn close(&self) {
        for entry in self.health_tasks.iter() {
            entry.value().abort();
        }
        self.health_tasks.clear();
        for entry in self.pools.iter() {
            for conn in entry.value().iter() {
                conn.close();
            }
        }
        self.pools.clear();
    }
}
