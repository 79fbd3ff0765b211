// ABOUTME: Listener lifecycle binding one socket per variant and driving connections into the router
// ABOUTME: Implements listen/close with graceful drain or abandon of in-flight calls
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # Listener Lifecycle
//!
//! One start/stop contract for all four transport variants. Every variant
//! shares the same accept loop; they differ only in how a TCP stream is
//! turned into a byte stream (plain or TLS handshake) and which HTTP
//! versions the connection builder allows.
//!
//! ```text
//!   Idle ──listen──▶ Listening ──close──▶ Idle
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::config::{ProtocolVariant, ServerConfig, ShutdownPolicy};
use crate::router::{RouteFn, ServiceRouter};
use crate::tls;
use crate::types::BridgeError;

/// Back-off after a failed `accept`, e.g. when the process is out of descriptors
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

// ============================================================================
// Connection Acceptors
// ============================================================================

/// Turns an accepted TCP stream into the byte stream HTTP is served over
#[async_trait]
trait ConnectionAcceptor: Send + Sync + 'static {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept(&self, stream: TcpStream) -> io::Result<Self::Io>;
}

/// Serves directly on the TCP stream
struct PlainAcceptor;

#[async_trait]
impl ConnectionAcceptor for PlainAcceptor {
    type Io = TcpStream;

    async fn accept(&self, stream: TcpStream) -> io::Result<Self::Io> {
        Ok(stream)
    }
}

/// Performs the TLS handshake before serving
struct TlsConnectionAcceptor {
    acceptor: TlsAcceptor,
}

#[async_trait]
impl ConnectionAcceptor for TlsConnectionAcceptor {
    type Io = TlsStream<TcpStream>;

    async fn accept(&self, stream: TcpStream) -> io::Result<Self::Io> {
        self.acceptor.accept(stream).await
    }
}

/// HTTP connection builder restricted to the versions a variant speaks
fn connection_builder(protocol: ProtocolVariant) -> auto::Builder<TokioExecutor> {
    let builder = auto::Builder::new(TokioExecutor::new());
    if protocol.is_multiplexed() {
        builder.http2_only()
    } else {
        builder.http1_only()
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

/// Resolves once shutdown has been signalled or the signal sender is gone
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}

/// Accept connections until shutdown, returning the connections still in flight
async fn accept_loop<A: ConnectionAcceptor>(
    listener: TcpListener,
    acceptor: Arc<A>,
    builder: auto::Builder<TokioExecutor>,
    router: Router,
    shutdown: watch::Receiver<bool>,
) -> JoinSet<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            () = shutdown_requested(shutdown.clone()) => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Accepted connection");
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        Arc::clone(&acceptor),
                        builder.clone(),
                        router.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }

    connections
}

/// Serve one connection, shutting it down gracefully when signalled
async fn serve_connection<A: ConnectionAcceptor>(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Arc<A>,
    builder: auto::Builder<TokioExecutor>,
    router: Router,
    shutdown: watch::Receiver<bool>,
) {
    let io = tokio::select! {
        accepted = acceptor.accept(stream) => match accepted {
            Ok(io) => io,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Connection handshake failed");
                return;
            }
        },
        () = shutdown_requested(shutdown.clone()) => {
            debug!(peer = %peer, "Shutdown before handshake completed");
            return;
        }
    };

    let conn = builder.serve_connection(TokioIo::new(io), TowerToHyperService::new(router));
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(peer = %peer, error = %e, "Connection ended with error");
            }
        }
        () = shutdown_requested(shutdown) => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!(peer = %peer, error = %e, "Connection ended with error during shutdown");
            }
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Resources of an active listener
struct ServerHandle {
    local_addr: SocketAddr,
    protocol: ProtocolVariant,
    config: ServerConfig,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<JoinSet<()>>,
}

/// Owns at most one active listener
///
/// Dropping a listening lifecycle signals shutdown and aborts every
/// connection without waiting.
#[derive(Default)]
pub struct ListenerLifecycle {
    handle: Option<ServerHandle>,
}

impl ListenerLifecycle {
    /// Create an idle lifecycle
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a listener is active
    pub fn is_listening(&self) -> bool {
        self.handle.is_some()
    }

    /// Bound address of the active listener
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.as_ref().map(|h| h.local_addr)
    }

    /// Variant served by the active listener
    pub fn protocol(&self) -> Option<ProtocolVariant> {
        self.handle.as_ref().map(|h| h.protocol)
    }

    /// Start serving
    ///
    /// The protocol name is validated before the route callback runs and
    /// before any socket is opened. The route callback runs exactly once.
    /// On success the completion callback is invoked and the bound address
    /// is returned; on failure no listener remains.
    pub async fn listen(
        &mut self,
        config: &ServerConfig,
        route: &RouteFn,
    ) -> Result<SocketAddr, BridgeError> {
        if let Some(handle) = &self.handle {
            return Err(BridgeError::already_listening(handle.local_addr));
        }

        let protocol = config.protocol_variant()?;

        let mut service_router = ServiceRouter::new();
        route(&mut service_router)?;
        let routes = service_router.len();
        let router = service_router.into_router();

        let tls_acceptor = if protocol.requires_certificate() {
            let material = config.certificate.as_ref().ok_or_else(|| {
                BridgeError::server_start_message(format!(
                    "Protocol {protocol} requires a certificate and private key"
                ))
            })?;
            Some(TlsAcceptor::from(tls::server_config(protocol, material)?))
        } else {
            None
        };

        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| BridgeError::server_start_failure(format!("Failed to bind {address}"), e))?;
        let local_addr = listener.local_addr().map_err(|e| {
            BridgeError::server_start_failure(format!("Failed to read bound address for {address}"), e)
        })?;

        let builder = connection_builder(protocol);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = match tls_acceptor {
            Some(acceptor) => tokio::spawn(accept_loop(
                listener,
                Arc::new(TlsConnectionAcceptor { acceptor }),
                builder,
                router,
                shutdown_rx,
            )),
            None => tokio::spawn(accept_loop(
                listener,
                Arc::new(PlainAcceptor),
                builder,
                router,
                shutdown_rx,
            )),
        };

        info!(
            address = %local_addr,
            protocol = %protocol,
            routes,
            "Listening"
        );

        self.handle = Some(ServerHandle {
            local_addr,
            protocol,
            config: config.clone(),
            shutdown,
            accept_task,
        });
        config.notify();

        Ok(local_addr)
    }

    /// Stop serving
    ///
    /// Stops accepting, asks live connections to finish, then waits or
    /// aborts according to the configured [`ShutdownPolicy`]. The handle is
    /// released and the completion callback invoked once the connections
    /// are gone.
    pub async fn close(&mut self) -> Result<(), BridgeError> {
        let Some(handle) = self.handle.take() else {
            return Err(BridgeError::server_not_running());
        };
        let ServerHandle {
            local_addr,
            protocol,
            config,
            shutdown,
            accept_task,
        } = handle;

        shutdown.send_replace(true);

        let mut connections = match accept_task.await {
            Ok(connections) => connections,
            Err(e) => {
                warn!(address = %local_addr, error = %e, "Accept loop ended abnormally");
                JoinSet::new()
            }
        };

        let in_flight = connections.len();
        match config.shutdown {
            ShutdownPolicy::Drain { timeout } => {
                let drained = tokio::time::timeout(timeout, async {
                    while connections.join_next().await.is_some() {}
                })
                .await;
                if drained.is_err() {
                    warn!(
                        address = %local_addr,
                        remaining = connections.len(),
                        timeout_ms = timeout.as_millis() as u64,
                        "Drain timed out, aborting remaining connections"
                    );
                    connections.shutdown().await;
                }
            }
            ShutdownPolicy::Abandon => {
                if in_flight > 0 {
                    debug!(address = %local_addr, in_flight, "Abandoning in-flight connections");
                }
                connections.shutdown().await;
            }
        }

        info!(address = %local_addr, protocol = %protocol, "Listener closed");
        config.notify();

        Ok(())
    }
}

impl Drop for ListenerLifecycle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown.send_replace(true);
            handle.accept_task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::config::CertificateMaterial;
    use crate::registry::{MethodDescriptor, ServiceDescriptor};
    use crate::resolver::{MethodHandler, ServiceHandlers, UnaryHandler};
    use crate::types::{CallContext, ErrorKind, Message};

    fn no_routes() -> RouteFn {
        Arc::new(|_router: &mut ServiceRouter| Ok(()))
    }

    fn counting_routes(calls: Arc<AtomicUsize>) -> RouteFn {
        Arc::new(move |_router: &mut ServiceRouter| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn ping_routes() -> RouteFn {
        Arc::new(|router: &mut ServiceRouter| {
            let descriptor = ServiceDescriptor::new("ping.v1.PingService").with_method(
                MethodDescriptor::unary("Ping", "ping.v1.PingRequest", "ping.v1.PingResponse"),
            );
            let handler: UnaryHandler = Arc::new(|request: Message, _ctx: CallContext| {
                futures::FutureExt::boxed(async move { Ok::<_, BridgeError>(request) })
            });
            let mut handlers = ServiceHandlers::new();
            handlers.insert("Ping".to_owned(), MethodHandler::Unary(handler));
            router.service(&descriptor, handlers);
            Ok(())
        })
    }

    async fn raw_post(addr: SocketAddr, path: &str, body: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let request = format!(
            "POST {path} HTTP/1.1\r\nhost: localhost\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        response
    }

    #[tokio::test]
    async fn close_when_idle_is_not_running() {
        let mut lifecycle = ListenerLifecycle::new();
        let err = lifecycle.close().await.expect_err("idle");
        assert_eq!(err.kind, ErrorKind::ServerNotRunning);
        assert!(!lifecycle.is_listening());
    }

    #[tokio::test]
    async fn unknown_protocol_is_rejected_before_routes_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut lifecycle = ListenerLifecycle::new();
        let config = ServerConfig::new("carrier_pigeon", 0);

        let err = lifecycle
            .listen(&config, &counting_routes(Arc::clone(&calls)))
            .await
            .expect_err("invalid");
        assert_eq!(err.kind, ErrorKind::InvalidProtocol);
        assert!(err.message.contains("carrier_pigeon"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!lifecycle.is_listening());
    }

    #[tokio::test]
    async fn tls_without_certificate_fails_to_start() {
        for protocol in ["https", "http2"] {
            let mut lifecycle = ListenerLifecycle::new();
            let err = lifecycle
                .listen(&ServerConfig::new(protocol, 0), &no_routes())
                .await
                .expect_err("no certificate");
            assert_eq!(err.kind, ErrorKind::ServerStartFailure, "{protocol}");
            assert!(!lifecycle.is_listening());
        }
    }

    #[tokio::test]
    async fn route_errors_surface_unchanged() {
        let failing: RouteFn =
            Arc::new(|_router: &mut ServiceRouter| Err(BridgeError::config("bad route")));
        let mut lifecycle = ListenerLifecycle::new();
        let err = lifecycle
            .listen(&ServerConfig::plaintext(0), &failing)
            .await
            .expect_err("route error");
        assert_eq!(err.kind, ErrorKind::Config);
        assert_eq!(err.message, "bad route");
        assert!(!lifecycle.is_listening());
    }

    #[tokio::test]
    async fn bind_conflict_keeps_cause() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = occupied.local_addr().expect("addr").port();

        let mut lifecycle = ListenerLifecycle::new();
        let err = lifecycle
            .listen(&ServerConfig::plaintext(port), &no_routes())
            .await
            .expect_err("port taken");
        assert_eq!(err.kind, ErrorKind::ServerStartFailure);
        assert!(std::error::Error::source(&err).is_some());
        assert!(!lifecycle.is_listening());
    }

    #[tokio::test]
    async fn listen_close_cycle_invokes_callback_each_time() {
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let config = ServerConfig::plaintext(0).with_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let routes = counting_routes(Arc::clone(&calls));
        let mut lifecycle = ListenerLifecycle::new();

        let addr = lifecycle.listen(&config, &routes).await.expect("listen");
        assert_ne!(addr.port(), 0);
        assert_eq!(lifecycle.local_addr(), Some(addr));
        assert_eq!(lifecycle.protocol(), Some(ProtocolVariant::Plaintext));
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        let err = lifecycle.listen(&config, &routes).await.expect_err("second listen");
        assert_eq!(err.kind, ErrorKind::AlreadyListening);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        lifecycle.close().await.expect("close");
        assert!(!lifecycle.is_listening());
        assert_eq!(notified.load(Ordering::SeqCst), 2);

        let err = lifecycle.close().await.expect_err("second close");
        assert_eq!(err.kind, ErrorKind::ServerNotRunning);
        assert_eq!(notified.load(Ordering::SeqCst), 2);

        lifecycle.listen(&config, &routes).await.expect("listen again");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        lifecycle.close().await.expect("close again");
    }

    #[tokio::test]
    async fn serves_http1_and_releases_port_on_close() {
        let mut lifecycle = ListenerLifecycle::new();
        let addr = lifecycle
            .listen(&ServerConfig::plaintext(0), &ping_routes())
            .await
            .expect("listen");

        let response = raw_post(addr, "/ping.v1.PingService/Ping", r#"{"n":1}"#).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with(r#"{"n":1}"#), "{response}");

        let missing = raw_post(addr, "/ping.v1.PingService/Pong", "{}").await;
        assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");

        lifecycle.close().await.expect("close");
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn close_does_not_wait_for_idle_tls_handshake() {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).expect("rcgen");
        let config = ServerConfig::tls(0, CertificateMaterial::from_pem(cert.pem(), key_pair.serialize_pem()))
            .with_shutdown_policy(ShutdownPolicy::Drain {
                timeout: Duration::from_secs(3),
            });

        let mut lifecycle = ListenerLifecycle::new();
        let addr = lifecycle.listen(&config, &no_routes()).await.expect("listen");

        // Connected but never sends a ClientHello
        let _idle = TcpStream::connect(addr).await.expect("connect");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = tokio::time::Instant::now();
        lifecycle.close().await.expect("close");
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "close waited {:?} on an idle handshake",
            started.elapsed()
        );
        assert!(!lifecycle.is_listening());
    }

    #[tokio::test]
    async fn drop_stops_accepting() {
        let addr = {
            let mut lifecycle = ListenerLifecycle::new();
            lifecycle
                .listen(&ServerConfig::plaintext(0), &no_routes())
                .await
                .expect("listen")
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
