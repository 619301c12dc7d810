//! Per-connection state machine shared by server and client sides.
//!
//! Grounded on `VSPProtocol`/`TCPTransport` in `protocol.py`/`transport.py`:
//! a read loop that decodes frames off a buffer, a write side that can be
//! driven from any task, a last-heartbeat timestamp, and a heartbeat
//! supervisor that closes the socket after 30s of silence.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::codec::VspCodec;
use crate::message::{VspError, VspMessage};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

/// A live VSP connection: an outbound channel to the write task plus
/// shared liveness state. Cheap to clone; every clone shares the same
/// underlying socket.
#[derive(Clone)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<VspMessage>,
    last_heartbeat_ms: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    peer: String,
    tasks: Arc<std::sync::Mutex<Vec<tokio::task::AbortHandle>>>,
}

impl Connection {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn send(&self, message: VspMessage) -> Result<(), VspError> {
        if self.is_closed() {
            return Err(VspError::TransportClosed);
        }
        self.outbound.send(message).map_err(|_| VspError::TransportClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        for handle in self.tasks.lock().expect("connection task list poisoned").drain(..) {
            handle.abort();
        }
    }

    pub fn touch_heartbeat(&self) {
        self.last_heartbeat_ms.store(now_ms(), Ordering::Relaxed);
    }

    async fn connect(host: &str, port: u16) -> Result<TcpStream, VspError> {
        Ok(TcpStream::connect((host, port)).await?)
    }

    /// Dial a peer and start its read/write/heartbeat tasks. `on_message`
    /// runs once per decoded frame on the connection's read task.
    pub async fn dial<F>(host: &str, port: u16, on_message: F) -> Result<Connection, VspError>
    where
        F: Fn(VspMessage, Connection) + Send + Sync + 'static,
    {
        let stream = Self::connect(host, port).await?;
        Ok(Self::spawn(stream, format!("{host}:{port}"), on_message))
    }

    /// Wrap an already-accepted socket (server side) in the same
    /// read/write/heartbeat machinery used by the client.
    pub fn accept<F>(stream: TcpStream, peer: String, on_message: F) -> Connection
    where
        F: Fn(VspMessage, Connection) + Send + Sync + 'static,
    {
        Self::spawn(stream, peer, on_message)
    }

    fn spawn<F>(stream: TcpStream, peer: String, on_message: F) -> Connection
    where
        F: Fn(VspMessage, Connection) + Send + Sync + 'static,
    {
        let framed = Framed::new(stream, VspCodec);
        let (mut sink, mut stream) = framed.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<VspMessage>();

        let closed = Arc::new(AtomicBool::new(false));
        let last_heartbeat_ms = Arc::new(AtomicU64::new(now_ms()));

        let conn = Connection {
            outbound: tx,
            last_heartbeat_ms: last_heartbeat_ms.clone(),
            closed: closed.clone(),
            peer: peer.clone(),
            tasks: Arc::new(std::sync::Mutex::new(Vec::with_capacity(3))),
        };

        let write_task = tokio::spawn({
            let closed = closed.clone();
            async move {
                while let Some(message) = rx.recv().await {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                closed.store(true, Ordering::Relaxed);
            }
        });

        let read_task = tokio::spawn({
            let conn = conn.clone();
            let peer = peer.clone();
            async move {
                loop {
                    match stream.next().await {
                        Some(Ok(message)) => {
                            conn.touch_heartbeat();
                            on_message(message, conn.clone());
                        }
                        Some(Err(err)) => {
                            tracing::error!(%peer, error = %err, "failed to decode VSP frame");
                            break;
                        }
                        None => break,
                    }
                }
                conn.close();
            }
        });

        let heartbeat_task = tokio::spawn({
            let conn = conn.clone();
            let peer = peer.clone();
            async move {
                loop {
                    tokio::time::sleep(HEARTBEAT_INTERVAL).await;
                    if conn.is_closed() {
                        break;
                    }
                    let elapsed_ms = now_ms().saturating_sub(conn.last_heartbeat_ms.load(Ordering::Relaxed));
                    if elapsed_ms > HEARTBEAT_TIMEOUT.as_millis() as u64 {
                        tracing::warn!(%peer, "heartbeat timeout, closing connection");
                        conn.close();
                        break;
                    }
                }
            }
        });

        {
            let mut tasks = conn.tasks.lock().expect("connection task list poisoned");
            tasks.push(write_task.abort_handle());
            tasks.push(read_task.abort_handle());
            tasks.push(heartbeat_task.abort_handle());
        }

        conn
    }
}
