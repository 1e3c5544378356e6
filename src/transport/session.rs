//! Per-connection transport session
//!
//! Owns the outbound queue and the close state of one WebSocket connection.
//! The socket itself lives in [`super::connection`]; this type is what the
//! rest of the server holds (weakly) to talk back to a browser.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use tokio::sync::{watch, Notify};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::queue::OutboundQueue;
use crate::error::Result;
use crate::registry::SessionRegistry;

/// Why a session is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer went away or the server closed it normally
    Normal,
    /// Outbound queue overflowed
    TryAgainLater,
    /// Server is shutting down
    Shutdown,
}

impl CloseReason {
    /// WebSocket close code sent to the browser
    pub fn close_code(&self) -> CloseCode {
        match self {
            CloseReason::Normal => CloseCode::Normal,
            CloseReason::TryAgainLater => CloseCode::Again,
            CloseReason::Shutdown => CloseCode::Away,
        }
    }

    /// Close frame reason text
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Normal => "closing",
            CloseReason::TryAgainLater => "outbound queue full",
            CloseReason::Shutdown => "server shutting down",
        }
    }
}

/// Next action for the writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write this message, then call [`TransportSession::complete_write`]
    Message(Arc<str>),
    /// Send a close frame and stop
    Close(CloseReason),
}

/// One browser connection
pub struct TransportSession {
    id: u64,
    peer_addr: SocketAddr,
    connected_at: Instant,

    outbound: Mutex<OutboundQueue>,
    writable: Notify,

    /// `Some` once the session started closing
    closing: watch::Sender<Option<CloseReason>>,

    /// Set by the first terminal notification
    departed: AtomicBool,

    registry: Weak<SessionRegistry>,
}

impl TransportSession {
    /// Create a session whose departure is reported to `registry`
    pub fn new(
        id: u64,
        peer_addr: SocketAddr,
        queue_capacity: usize,
        registry: Weak<SessionRegistry>,
    ) -> Self {
        let (closing, _) = watch::channel(None);
        Self {
            id,
            peer_addr,
            connected_at: Instant::now(),
            outbound: Mutex::new(OutboundQueue::new(queue_capacity)),
            writable: Notify::new(),
            closing,
            departed: AtomicBool::new(false),
            registry,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Enqueue a message for the writer
    ///
    /// Messages sent after the session started closing are dropped. When the
    /// queue is full the session is force-closed with
    /// [`CloseReason::TryAgainLater`] and the backpressure error returned.
    pub fn send(&self, message: impl Into<Arc<str>>) -> Result<()> {
        if self.is_closing() {
            return Ok(());
        }

        let pushed = self.queue().push(message.into());
        match pushed {
            Ok(()) => {
                self.writable.notify_one();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    session_id = self.id,
                    peer = %self.peer_addr,
                    error = %e,
                    "Outbound queue overflow, closing session"
                );
                self.close(CloseReason::TryAgainLater);
                Err(e)
            }
        }
    }

    /// Begin closing the session
    ///
    /// Only the first call has an effect. Pending messages are discarded and
    /// the writer is told to send a close frame.
    pub fn close(&self, reason: CloseReason) {
        let changed = self.closing.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });

        if changed {
            self.queue().clear();
            self.writable.notify_one();
            tracing::debug!(session_id = self.id, reason = ?reason, "Session closing");
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.borrow().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.closing.borrow()
    }

    /// Receiver that resolves once the session starts closing
    pub fn closing_signal(&self) -> watch::Receiver<Option<CloseReason>> {
        self.closing.subscribe()
    }

    /// Wait for the next thing the writer should do
    pub async fn next_outbound(&self) -> Outbound {
        let mut closing = self.closing.subscribe();
        loop {
            if let Some(reason) = *closing.borrow_and_update() {
                return Outbound::Close(reason);
            }
            if let Some(head) = self.queue().front().cloned() {
                return Outbound::Message(head);
            }

            tokio::select! {
                _ = self.writable.notified() => {}
                _ = closing.changed() => {}
            }
        }
    }

    /// Release the head entry after the writer finished sending it
    pub fn complete_write(&self) {
        self.queue().pop_front();
    }

    /// Number of messages waiting (including one in flight)
    pub fn queued(&self) -> usize {
        self.queue().len()
    }

    /// Report the end of this connection to the registry
    ///
    /// Reachable from the read path and from the writer path; only the first
    /// call notifies.
    pub async fn depart(&self) {
        if self.departed.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::debug!(
            session_id = self.id,
            peer = %self.peer_addr,
            connected_secs = self.connected_at.elapsed().as_secs(),
            "Session departed"
        );

        if let Some(registry) = self.registry.upgrade() {
            registry.leave(self.id).await;
        }
    }

    pub fn has_departed(&self) -> bool {
        self.departed.load(Ordering::Acquire)
    }

    fn queue(&self) -> MutexGuard<'_, OutboundQueue> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closing", &self.close_reason())
            .finish()
    }
}
