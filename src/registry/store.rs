//! Session registry implementation
//!
//! The central registry that maps connections to clients, routes signaling
//! into the negotiation engine and owns the shared stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::broadcaster::SyncBroadcaster;
use super::config::RegistryConfig;
use super::entry::{ClientId, ClientSession, GlobalStream};
use super::error::RegistryError;
use crate::error::{ResourceError, Result};
use crate::media::{MediaBackend, SourceConfig, VideoSource, VideoTrack};
use crate::protocol::{ClientMessage, ServerMessage, SyncPayload};
use crate::rtc::{NegotiationEngine, OnMessage, PeerFactory};
use crate::stats::{RegistryStats, StreamStats};
use crate::transport::{CloseReason, TransportSession};

#[derive(Default)]
struct ClientMap {
    by_transport: HashMap<u64, ClientId>,
    sessions: HashMap<ClientId, ClientSession>,
}

/// Central registry for connected clients and the shared stream
///
/// The client map sits behind a `std::sync::Mutex` that is never held
/// across an `.await`. Stream start/stop is serialized by a separate async
/// lock, and every lifecycle command takes a ticket in the order it was
/// issued: a start that reaches the lock after a newer command does nothing.
pub struct SessionRegistry {
    engine: Arc<NegotiationEngine>,
    media: MediaBackend,
    config: RegistryConfig,
    next_client_id: AtomicU64,
    clients: Mutex<ClientMap>,
    stream: Mutex<Option<Arc<GlobalStream>>>,
    lifecycle: tokio::sync::Mutex<()>,
    lifecycle_seq: AtomicU64,
    broadcaster: Mutex<Option<SyncBroadcaster>>,
    this: Weak<SessionRegistry>,
}

impl SessionRegistry {
    pub fn new(
        config: RegistryConfig,
        peers: Arc<dyn PeerFactory>,
        media: MediaBackend,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            engine: NegotiationEngine::new(peers),
            media,
            config,
            next_client_id: AtomicU64::new(1),
            clients: Mutex::new(ClientMap::default()),
            stream: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            lifecycle_seq: AtomicU64::new(0),
            broadcaster: Mutex::new(None),
            this: this.clone(),
        })
    }

    fn clients(&self) -> MutexGuard<'_, ClientMap> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stream_slot(&self) -> MutexGuard<'_, Option<Arc<GlobalStream>>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<NegotiationEngine> {
        &self.engine
    }

    /// Start the sync broadcaster
    pub fn start(&self) {
        let mut slot = self
            .broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(SyncBroadcaster::spawn(
                self.this.clone(),
                self.config.sync_interval,
            ));
        }
    }

    /// Register a connection and create its peer
    pub async fn join(&self, transport: &Arc<TransportSession>) -> Result<ClientId> {
        let client_id = ClientId::new(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        let transport_id = transport.id();

        {
            let mut clients = self.clients();
            clients.by_transport.insert(transport_id, client_id);
            clients
                .sessions
                .insert(client_id, ClientSession::new(client_id, transport));
        }

        let weak = Arc::downgrade(transport);
        let on_message: OnMessage = Arc::new(move |text| {
            if let Some(transport) = weak.upgrade() {
                let _ = transport.send(text);
            }
        });

        if let Err(e) = self.engine.create_peer(client_id, on_message).await {
            tracing::warn!(client = %client_id, session_id = transport_id, error = %e, "Peer creation failed");
            self.forget(transport_id, client_id);
            return Err(e);
        }

        let (still_joined, clients) = {
            let clients = self.clients();
            (
                clients.sessions.contains_key(&client_id),
                clients.sessions.len(),
            )
        };

        if !still_joined {
            // Left while the peer was being created
            self.engine.close_peer(client_id).await;
            tracing::debug!(client = %client_id, "Client left during join");
            return Ok(client_id);
        }

        tracing::info!(
            client = %client_id,
            session_id = transport_id,
            peer = %transport.peer_addr(),
            clients = clients,
            "Client joined"
        );

        Ok(client_id)
    }

    fn forget(&self, transport_id: u64, client_id: ClientId) {
        let mut clients = self.clients();
        if clients.by_transport.get(&transport_id) == Some(&client_id) {
            clients.by_transport.remove(&transport_id);
        }
        clients.sessions.remove(&client_id);
    }

    /// Remove a connection's client and close its peer
    ///
    /// Safe to call more than once.
    pub async fn leave(&self, transport_id: u64) {
        let removed = {
            let mut clients = self.clients();
            clients.by_transport.remove(&transport_id).map(|client_id| {
                clients.sessions.remove(&client_id);
                (client_id, clients.sessions.len())
            })
        };
        let Some((client_id, remaining)) = removed else {
            return;
        };

        self.engine.close_peer(client_id).await;

        tracing::info!(
            client = %client_id,
            session_id = transport_id,
            clients = remaining,
            "Client left"
        );
    }

    /// Handle one inbound text frame from `sender`
    ///
    /// Bad input is logged and dropped; the connection stays open.
    pub async fn dispatch(self: &Arc<Self>, raw: &str, sender: &TransportSession) {
        let message = match ClientMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(session_id = sender.id(), error = %e, "Dropping inbound message");
                return;
            }
        };

        let Some(client_id) = self.client_id_for(sender.id()) else {
            tracing::warn!(error = %RegistryError::UnknownSender(sender.id()), kind = message.kind(), "Dropping inbound message");
            return;
        };

        tracing::debug!(client = %client_id, kind = message.kind(), "Signaling in");

        match message {
            ClientMessage::Offer { sdp } => self.engine.handle_offer(client_id, sdp).await,
            ClientMessage::Answer { sdp } => self.engine.handle_answer(client_id, sdp).await,
            ClientMessage::IceCandidate(candidate) => {
                self.engine.handle_ice(client_id, candidate).await
            }
            ClientMessage::StartStream { file_path } => {
                let config = SourceConfig::new(file_path)
                    .looping(self.config.video.looping)
                    .default_fps(self.config.video.default_fps);
                // Ticket taken here so a later stop_stream from any client wins
                let ticket = self.next_lifecycle_ticket();
                let registry = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = registry.start_stream_ticketed(config, ticket).await {
                        tracing::warn!(client = %client_id, error = %e, "Stream start failed");
                    }
                });
            }
            ClientMessage::StopStream => self.stop_stream().await,
            ClientMessage::SyncRequest => {
                let (current_time, is_playing) = self.playback_position();
                match ServerMessage::Sync(SyncPayload::now(current_time, is_playing)).encode() {
                    Ok(text) => {
                        let _ = sender.send(text);
                    }
                    Err(e) => tracing::warn!(client = %client_id, error = %e, "Dropping sync reply"),
                }
            }
            ClientMessage::Playback(control) => {
                let relayed = self.relay(client_id, &control.raw);
                tracing::debug!(client = %client_id, kind = %control.kind, relayed = relayed, "Playback control relayed");
            }
        }
    }

    /// Send `raw` to every client except `from`
    fn relay(&self, from: ClientId, raw: &Arc<str>) -> usize {
        let targets: Vec<Arc<TransportSession>> = {
            let clients = self.clients();
            clients
                .sessions
                .values()
                .filter(|session| session.id != from)
                .filter_map(ClientSession::transport)
                .collect()
        };

        for transport in &targets {
            let _ = transport.send(Arc::clone(raw));
        }
        targets.len()
    }

    fn next_lifecycle_ticket(&self) -> u64 {
        self.lifecycle_seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Start (or restart) the shared stream and offer it to every client
    ///
    /// Concurrent calls run one after another; the previous decode thread
    /// is joined before the next file is opened.
    pub async fn start_stream(&self, config: SourceConfig) -> Result<()> {
        let ticket = self.next_lifecycle_ticket();
        self.start_stream_ticketed(config, ticket).await
    }

    async fn start_stream_ticketed(&self, config: SourceConfig, ticket: u64) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.lifecycle_seq.load(Ordering::Acquire) != ticket {
            tracing::debug!(path = %config.file_path.display(), "Stream start superseded");
            return Ok(());
        }

        self.stop_stream_locked().await;

        let track = VideoTrack::default();
        let sink = self.media.sinks.sink_for(&track);
        let opener = Arc::clone(&self.media.opener);
        let source_config = config.clone();

        let started = tokio::task::spawn_blocking(move || {
            VideoSource::start(source_config, opener.as_ref(), sink)
        })
        .await
        .map_err(|e| ResourceError::Worker(e.to_string()))?;
        let source = started?;

        tracing::info!(
            path = %config.file_path.display(),
            fps = source.fps(),
            looping = config.looping,
            "Shared stream started"
        );

        let stream = Arc::new(GlobalStream::new(config, source, track.clone()));
        *self.stream_slot() = Some(stream);

        self.engine.start_global_stream(track).await;
        Ok(())
    }

    /// Stop the shared stream and detach it from every peer
    pub async fn stop_stream(&self) {
        self.next_lifecycle_ticket();
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_stream_locked().await;
    }

    async fn stop_stream_locked(&self) {
        let stream = self.stream_slot().take();
        let Some(stream) = stream else {
            return;
        };

        let stopping = Arc::clone(&stream);
        if let Err(e) = tokio::task::spawn_blocking(move || stopping.source.stop()).await {
            tracing::warn!(error = %e, "Joining video source failed");
        }

        self.engine.stop_global_stream().await;

        tracing::info!(path = %stream.config.file_path.display(), "Shared stream stopped");
    }

    /// Push the playback position to every client with an open data channel
    ///
    /// Clients whose connection is gone are removed first. Returns the
    /// number of sync messages sent.
    pub async fn tick_sync(&self) -> usize {
        let Some(stream) = self.current_stream() else {
            return 0;
        };
        let current_time = stream.source.current_time();
        let is_playing = stream.source.is_playing();

        let (live, expired) = {
            let clients = self.clients();
            let mut live = Vec::new();
            let mut expired = Vec::new();
            for (transport_id, client_id) in &clients.by_transport {
                match clients.sessions.get(client_id) {
                    Some(session) if !session.is_expired() => live.push(*client_id),
                    _ => expired.push(*transport_id),
                }
            }
            (live, expired)
        };

        for transport_id in expired {
            self.leave(transport_id).await;
        }

        let mut sent = 0;
        for client_id in live {
            if self
                .engine
                .send_sync(client_id, current_time, is_playing)
                .await
            {
                sent += 1;
            }
        }

        tracing::trace!(sent = sent, current_time = current_time, "Sync tick");
        sent
    }

    /// Stop the broadcaster and the stream, then close every client
    pub async fn shutdown(&self) {
        let broadcaster = self
            .broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(broadcaster) = broadcaster {
            broadcaster.stop().await;
        }

        self.stop_stream().await;

        let sessions: Vec<ClientSession> = {
            let mut clients = self.clients();
            clients.by_transport.clear();
            clients.sessions.drain().map(|(_, session)| session).collect()
        };

        for session in &sessions {
            self.engine.close_peer(session.id).await;
            if let Some(transport) = session.transport.upgrade() {
                transport.close(CloseReason::Shutdown);
            }
        }

        tracing::info!(clients = sessions.len(), "Registry shut down");
    }

    pub fn current_stream(&self) -> Option<Arc<GlobalStream>> {
        self.stream_slot().clone()
    }

    /// Current time and playing flag of the shared stream
    pub fn playback_position(&self) -> (f64, bool) {
        self.current_stream()
            .map(|stream| (stream.source.current_time(), stream.source.is_playing()))
            .unwrap_or((0.0, false))
    }

    pub fn client_id_for(&self, transport_id: u64) -> Option<ClientId> {
        self.clients().by_transport.get(&transport_id).copied()
    }

    pub fn client_count(&self) -> usize {
        self.clients().sessions.len()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients().sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Transport of a registered client
    pub fn transport_of(&self, client_id: ClientId) -> std::result::Result<Arc<TransportSession>, RegistryError> {
        self.clients()
            .sessions
            .get(&client_id)
            .and_then(ClientSession::transport)
            .ok_or(RegistryError::ClientNotFound(client_id))
    }

    pub fn stats(&self) -> RegistryStats {
        let stream = self.current_stream().map(|stream| {
            let clock = stream.source.clock();
            StreamStats {
                file_path: stream.config.file_path.clone(),
                running: stream.is_running(),
                is_playing: clock.is_playing(),
                current_time: clock.current_time(),
                frames_emitted: clock.frames_emitted(),
                loops: clock.loops(),
                fps: stream.source.fps(),
                started_at: stream.started_at,
            }
        });

        RegistryStats {
            clients: self.client_count(),
            peers: self.engine.peer_count(),
            attached_peers: self.engine.attached_clients().len(),
            stream,
        }
    }
}
