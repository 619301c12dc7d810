//! The standalone `hyper` binding for `Adapter` (C4).
//!
//! Scoped strictly to wire-level transport: accepting TCP connections,
//! framing HTTP/1.1 requests and responses, and bridging hyper's streaming
//! body types to the framework's [`Protocol`] trait. No routing, extraction,
//! or middleware logic lives here — that's the composed `Next` chain built
//! in `builder.rs`, which this module calls into through [`Adapter::handle`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Response as HttpResponse, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper::Request as HyperRequest;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::scope::{Adapter, Protocol, ProtocolError, ProtocolKind, Scope};

type RespBody = BoxBody<Bytes, std::io::Error>;

fn empty_body() -> RespBody {
    Empty::<Bytes>::new().map_err(|never: Infallible| match never {}).boxed()
}

fn full_body(bytes: Bytes) -> RespBody {
    Full::new(bytes).map_err(|never: Infallible| match never {}).boxed()
}

/// Bridges the push-based [`Protocol`] trait to hyper's pull-based response
/// model: `response_bytes`/`response_start` send the (possibly still-filling)
/// `http::Response` once over a oneshot, `send_chunk`/`end_stream` feed an
/// mpsc channel the streaming body reads from.
struct ChannelProtocol {
    response_tx: Option<oneshot::Sender<HttpResponse<RespBody>>>,
    chunk_tx: Option<mpsc::Sender<Result<Frame<Bytes>, std::io::Error>>>,
}

impl ChannelProtocol {
    fn new(response_tx: oneshot::Sender<HttpResponse<RespBody>>) -> Self {
        ChannelProtocol {
            response_tx: Some(response_tx),
            chunk_tx: None,
        }
    }
}

#[async_trait::async_trait]
impl Protocol for ChannelProtocol {
    async fn response_bytes(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<(), ProtocolError> {
        let mut resp = HttpResponse::new(full_body(body));
        *resp.status_mut() = status;
        *resp.headers_mut() = headers;
        self.response_tx
            .take()
            .ok_or(ProtocolError::AlreadyStarted)?
            .send(resp)
            .map_err(|_| ProtocolError::Disconnected)
    }

    async fn response_start(&mut self, status: StatusCode, headers: HeaderMap) -> Result<(), ProtocolError> {
        let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, std::io::Error>>(16);
        let stream = ReceiverStream::new(rx);
        let mut resp = HttpResponse::new(StreamBody::new(stream).boxed());
        *resp.status_mut() = status;
        *resp.headers_mut() = headers;
        self.response_tx
            .take()
            .ok_or(ProtocolError::AlreadyStarted)?
            .send(resp)
            .map_err(|_| ProtocolError::Disconnected)?;
        self.chunk_tx = Some(tx);
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), ProtocolError> {
        let tx = self.chunk_tx.as_ref().ok_or(ProtocolError::Disconnected)?;
        tx.send(Ok(Frame::data(chunk)))
            .await
            .map_err(|_| ProtocolError::Disconnected)
    }

    async fn end_stream(&mut self) -> Result<(), ProtocolError> {
        self.chunk_tx = None;
        Ok(())
    }
}

fn scope_from_hyper(req: &HyperRequest<Incoming>, remote: Option<SocketAddr>, request_id: String) -> Arc<Scope> {
    let path = req.uri().path().to_string();
    let raw_query = req.uri().query().map(str::to_string);
    Arc::new(Scope::new(
        ProtocolKind::Http,
        req.method().clone(),
        path,
        raw_query,
        req.headers().clone(),
        remote.map(|a| a.to_string()),
        request_id,
    ))
}

/// Drive a single connection: collect the body, build the `Scope`, and hand
/// off to `adapter.handle()`. Returns the response once the adapter has
/// finished writing it (buffered) or started it (streaming).
async fn serve_request(
    adapter: Arc<dyn Adapter>,
    request_id_gen: Arc<dyn crate::scope::RequestIdGenerator>,
    remote: Option<SocketAddr>,
    req: HyperRequest<Incoming>,
) -> Result<HttpResponse<RespBody>, Infallible> {
    let request_id = request_id_gen.generate();
    let scope = scope_from_hyper(&req, remote, request_id.clone());

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::warn!(request_id, error = %err, "failed to read request body");
            let mut resp = HttpResponse::new(empty_body());
            *resp.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(resp);
        }
    };

    let (tx, rx) = oneshot::channel();
    let mut protocol = ChannelProtocol::new(tx);
    // The adapter writes the response via `protocol`; we race receiving the
    // (possibly early, for streaming bodies) response against it finishing.
    let handled = adapter.handle(scope, body, &mut protocol);
    tokio::pin!(handled);

    tokio::select! {
        biased;
        resp = rx => resp.map_err(|_| ()).or_else(|_| Ok(internal_error_http())),
        _ = &mut handled => {
            // The adapter finished without ever sending a response (a bug in
            // a custom Adapter impl, not reachable via the built-in one).
            Ok(internal_error_http())
        }
    }
}

fn internal_error_http() -> HttpResponse<RespBody> {
    let mut resp = HttpResponse::new(full_body(Bytes::from_static(br#"{"error":"internal"}"#)));
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    resp
}

/// Bind `addr` and serve `adapter` until `shutdown` resolves, draining
/// in-flight connections gracefully afterwards.
pub async fn serve(
    addr: &str,
    adapter: Arc<dyn Adapter>,
    request_id_gen: Arc<dyn crate::scope::RequestIdGenerator>,
    shutdown: impl std::future::Future<Output = ()>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, adapter, request_id_gen, shutdown).await
}

/// Same as [`serve`], but over an already-bound listener — used by the
/// `dev-reload` path to hand the same socket across a supervised restart.
pub async fn serve_listener(
    listener: TcpListener,
    adapter: Arc<dyn Adapter>,
    request_id_gen: Arc<dyn crate::scope::RequestIdGenerator>,
    shutdown: impl std::future::Future<Output = ()>,
) -> std::io::Result<()> {
    tracing::info!("velithon server listening");

    let graceful = GracefulShutdown::new();
    let http = auto::Builder::new(TokioExecutor::new());

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to accept connection");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let adapter = adapter.clone();
                let request_id_gen = request_id_gen.clone();
                let service = service_fn(move |req| {
                    serve_request(adapter.clone(), request_id_gen.clone(), Some(remote), req)
                });
                let conn = http.serve_connection(io, service);
                let conn = graceful.watch(conn);
                tokio::spawn(async move {
                    if let Err(err) = conn.await {
                        tracing::debug!(error = %err, "connection error");
                    }
                });
            }
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received, draining connections");
                break;
            }
        }
    }

    graceful.shutdown().await;
    tracing::info!("velithon server stopped");
    Ok(())
}
