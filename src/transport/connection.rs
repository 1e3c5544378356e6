//! WebSocket connection driver
//!
//! Splits an accepted WebSocket into three cooperating tasks:
//!
//! ```text
//!   socket ──► read loop ──► mpsc (bounded) ──► dispatcher ──► registry.dispatch()
//!                 │
//!                 └── stops on close signal / read error / backlog overflow
//!
//!   queue ──► writer ──► socket            (single writer, pops after write)
//! ```
//!
//! The read loop only hands frames off, so a slow dispatch never delays the
//! next read, and frames from one browser are dispatched in arrival order.
//! A browser that outruns its dispatcher by more than the backlog is closed
//! with the same code as an outbound overflow.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::session::{CloseReason, Outbound, TransportSession};
use crate::registry::SessionRegistry;

/// How long the read side waits for the writer to flush its close frame
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Inbound frames read but not yet dispatched, per connection
pub const INBOUND_BACKLOG: usize = 256;

/// Drive one WebSocket until either side closes
///
/// The session must already be joined to `registry`. Departure is reported
/// exactly once when the connection ends.
pub async fn serve<S>(
    session: Arc<TransportSession>,
    ws: WebSocketStream<S>,
    registry: Arc<SessionRegistry>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    serve_with_backlog(session, ws, registry, INBOUND_BACKLOG).await
}

pub(crate) async fn serve_with_backlog<S>(
    session: Arc<TransportSession>,
    ws: WebSocketStream<S>,
    registry: Arc<SessionRegistry>,
    backlog: usize,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, mut stream) = ws.split();

    let mut writer = tokio::spawn(write_loop(Arc::clone(&session), sink));

    let (dispatch_tx, dispatch_rx) = mpsc::channel(backlog.max(1));
    tokio::spawn(dispatch_loop(
        Arc::clone(&registry),
        Arc::clone(&session),
        dispatch_rx,
    ));

    let mut closing = session.closing_signal();
    loop {
        tokio::select! {
            _ = closing.wait_for(Option::is_some) => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match dispatch_tx.try_send(text.as_str().to_owned()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::warn!(
                                session_id = session.id(),
                                backlog = backlog,
                                "Inbound backlog overflow, closing session"
                            );
                            session.close(CloseReason::TryAgainLater);
                            break;
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(
                        session_id = session.id(),
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session_id = session.id(), error = %e, "Read error");
                    break;
                }
            }
        }
    }

    drop(dispatch_tx);
    session.close(CloseReason::Normal);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        tracing::debug!(session_id = session.id(), "Writer stalled, aborting");
        writer.abort();
    }

    session.depart().await;
}

async fn write_loop<S>(
    session: Arc<TransportSession>,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match session.next_outbound().await {
            Outbound::Message(payload) => {
                if let Err(e) = sink.send(Message::Text(payload.to_string().into())).await {
                    tracing::debug!(session_id = session.id(), error = %e, "Write error");
                    session.close(CloseReason::Normal);
                    break;
                }
                session.complete_write();
            }
            Outbound::Close(reason) => {
                let frame = CloseFrame {
                    code: reason.close_code(),
                    reason: reason.as_str().into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                let _ = sink.close().await;
                break;
            }
        }
    }

    session.depart().await;
}

async fn dispatch_loop(
    registry: Arc<SessionRegistry>,
    session: Arc<TransportSession>,
    mut rx: mpsc::Receiver<String>,
) {
    while let Some(raw) = rx.recv().await {
        registry.dispatch(&raw, &session).await;
    }
}

#[cfg(test)]
mod tests {
    use tokio_tungstenite::tungstenite::protocol::Role;

    use super::*;
    use crate::media::{MediaBackend, SourceConfig};
    use crate::registry::RegistryConfig;
    use crate::rtc::PeerFactory;
    use crate::test_support::{
        eventually, transport_for, FakeOpener, MockPeerFactory, RecordingSinkFactory,
    };

    async fn ws_pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    fn registry_with(opener: FakeOpener) -> Arc<SessionRegistry> {
        let media = MediaBackend::new(Arc::new(opener), Arc::new(RecordingSinkFactory::default()));
        SessionRegistry::new(
            RegistryConfig::default(),
            Arc::new(MockPeerFactory::new()) as Arc<dyn PeerFactory>,
            media,
        )
    }

    #[tokio::test]
    async fn test_sync_request_over_socket() {
        let registry = registry_with(FakeOpener::new(1, None));
        let session = transport_for(&registry, 1);
        registry.join(&session).await.unwrap();
        let (server, mut client) = ws_pair().await;

        let served = tokio::spawn(serve(Arc::clone(&session), server, Arc::clone(&registry)));

        client
            .send(Message::Text(r#"{"type":"sync_request"}"#.into()))
            .await
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(reply, Message::Text(ref text) if text.as_str().contains("\"sync\"")));

        client.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), served)
            .await
            .unwrap()
            .unwrap();
        assert!(session.has_departed());
        assert_eq!(registry.client_count(), 0);
    }

    #[tokio::test]
    async fn test_inbound_flood_closes_session() {
        // A slow open holds the lifecycle lock, so each stop_stream dispatch waits
        let registry = registry_with(
            FakeOpener::new(10_000, Some(100.0)).with_open_delay(Duration::from_millis(300)),
        );
        let session = transport_for(&registry, 1);
        registry.join(&session).await.unwrap();

        let starting = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.start_stream(SourceConfig::new("movie.mp4")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (server, mut client) = ws_pair().await;
        let served = tokio::spawn(serve_with_backlog(
            Arc::clone(&session),
            server,
            Arc::clone(&registry),
            2,
        ));

        for _ in 0..8 {
            let _ = client
                .send(Message::Text(r#"{"type":"stop_stream"}"#.into()))
                .await;
        }

        assert!(
            eventually(Duration::from_secs(2), || {
                session.close_reason() == Some(CloseReason::TryAgainLater)
            })
            .await
        );
        tokio::time::timeout(Duration::from_secs(2), served)
            .await
            .unwrap()
            .unwrap();
        starting.await.unwrap().unwrap();
    }
}
