//! Signaling server listener
//!
//! Handles the TCP accept loop, upgrades each connection to a WebSocket and
//! hands it to the session registry.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::error::Result;
use crate::media::MediaBackend;
use crate::registry::SessionRegistry;
use crate::rtc::{PeerFactory, WebRtcPeerFactory};
use crate::server::config::ServerConfig;
use crate::stats::ServerStats;
use crate::transport::{self, TransportSession};

#[derive(Default)]
struct ConnectionCounters {
    total: AtomicU64,
    active: AtomicU64,
    rejected: AtomicU64,
}

/// Group watch signaling server
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    counters: Arc<ConnectionCounters>,
    started_at: Instant,
}

impl SyncServer {
    /// Create a server with explicit peer and media backends
    pub fn new(config: ServerConfig, peers: Arc<dyn PeerFactory>, media: MediaBackend) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let registry = SessionRegistry::new(config.registry.clone(), peers, media);

        Self {
            config,
            registry,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
            counters: Arc::new(ConnectionCounters::default()),
            started_at: Instant::now(),
        }
    }

    /// Create a server backed by webrtc-rs, ffmpeg and openh264
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_webrtc(config: ServerConfig) -> Result<Self> {
        let peers = WebRtcPeerFactory::new(config.rtc.clone())?;
        let media = MediaBackend::ffmpeg(&config.registry.video)?;
        Ok(Self::new(config, Arc::new(peers), media))
    }

    /// Get a reference to the session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener until `shutdown`
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "Signaling server listening");

        self.registry.start();

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        self.registry.shutdown().await;

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.counters.active.fetch_add(1, Ordering::Relaxed);

        let connection = Connection {
            session_id,
            peer_addr,
            ws_config: self.websocket_config(),
            queue_capacity: self.config.outbound_queue_capacity,
            registry: Arc::clone(&self.registry),
            _permit: permit,
        };
        let counters = Arc::clone(&self.counters);

        tokio::spawn(async move {
            connection.run(socket).await;
            counters.active.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }

    fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.config.max_message_size);
        config.max_frame_size = Some(self.config.max_message_size);
        config
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.counters.total.load(Ordering::Relaxed),
            active_connections: self.counters.active.load(Ordering::Relaxed),
            rejected_connections: self.counters.rejected.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

/// One accepted TCP connection on its way to becoming a client
struct Connection {
    session_id: u64,
    peer_addr: SocketAddr,
    ws_config: WebSocketConfig,
    queue_capacity: usize,
    registry: Arc<SessionRegistry>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    async fn run(self, socket: TcpStream) {
        let ws = match tokio_tungstenite::accept_async_with_config(socket, Some(self.ws_config))
            .await
        {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!(session_id = self.session_id, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let session = Arc::new(TransportSession::new(
            self.session_id,
            self.peer_addr,
            self.queue_capacity,
            Arc::downgrade(&self.registry),
        ));

        if let Err(e) = self.registry.join(&session).await {
            tracing::warn!(session_id = self.session_id, error = %e, "Join failed");
            return;
        }

        transport::serve(session, ws, Arc::clone(&self.registry)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;
    use crate::test_support::{eventually, FakeOpener, MockPeerFactory, RecordingSinkFactory};

    fn test_server(config: ServerConfig) -> Arc<SyncServer> {
        let media = MediaBackend::new(
            Arc::new(FakeOpener::new(1, None)),
            Arc::new(RecordingSinkFactory::default()),
        );
        Arc::new(SyncServer::new(config, Arc::new(MockPeerFactory::new()), media))
    }

    async fn start(
        server: &Arc<SyncServer>,
    ) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = Arc::clone(server);
        let handle = tokio::spawn(async move {
            running
                .serve(listener, async {
                    let _ = stop_rx.await;
                })
                .await
        });
        (addr, stop_tx, handle)
    }

    #[tokio::test]
    async fn test_sync_request_round_trip() {
        let server = test_server(ServerConfig::default());
        let (addr, stop_tx, handle) = start(&server).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
            .await
            .unwrap();
        assert!(eventually(Duration::from_secs(2), || server.registry().client_count() == 1).await);

        ws.send(Message::Text(r#"{"type":"sync_request"}"#.into()))
            .await
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Message::Text(text) = reply else {
            panic!("expected text frame, got {:?}", reply);
        };
        let reply: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(reply["type"], "sync");
        assert_eq!(reply["isPlaying"], false);

        ws.close(None).await.unwrap();
        assert!(eventually(Duration::from_secs(2), || server.registry().client_count() == 0).await);

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(server.stats().total_connections, 1);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let server = test_server(ServerConfig::default().max_connections(1));
        let (addr, stop_tx, handle) = start(&server).await;

        let (_first, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
            .await
            .unwrap();
        assert!(eventually(Duration::from_secs(2), || server.registry().client_count() == 1).await);

        let second = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await;
        assert!(second.is_err());
        assert!(eventually(Duration::from_secs(2), || server.stats().rejected_connections == 1).await);

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let server = test_server(ServerConfig::default());
        let (addr, stop_tx, handle) = start(&server).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
            .await
            .unwrap();
        assert!(eventually(Duration::from_secs(2), || server.registry().client_count() == 1).await);

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap();
        assert!(matches!(frame, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
        assert_eq!(server.registry().client_count(), 0);
    }
}
