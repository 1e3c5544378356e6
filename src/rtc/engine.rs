//! Negotiation engine
//!
//! Owns one [`PeerContext`] per client and runs offer/answer exchanges
//! against the [`MediaPeer`] seam.
//!
//! Asynchronous completions (remote description applied, offer created) are
//! routed back by [`ClientId`]. If the client left in the meantime the
//! lookup fails and the completion does nothing.
//!
//! # Ordering
//!
//! Remote ICE candidates that arrive before the remote description is
//! applied are buffered. The flush that follows sets
//! `remote_description_set` and applies the buffer while holding the peer's
//! ICE lock, so a candidate arriving mid-flush waits and is applied after
//! every buffered one.
//!
//! # Track attachment
//!
//! The shared video track is attached before a remote offer is applied so
//! the answer already carries it. Peers that are mid-negotiation when a
//! stream starts get it later: on the stable signaling event, and again once
//! the engine's own state settles after an answer is sent or applied.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::runtime::Handle;

use super::peer::{
    MediaPeer, PeerEvents, PeerFactory, SdpKind, SessionDescription, SignalingState,
};
use super::state::{IceBuffer, NegotiationState};
use crate::error::Result;
use crate::media::VideoTrack;
use crate::protocol::{IceCandidate, ServerMessage, SyncPayload};
use crate::registry::ClientId;

/// Delivers serialized signaling messages to a client
pub type OnMessage = Arc<dyn Fn(Arc<str>) + Send + Sync>;

/// Engine-side state of one client
struct PeerContext {
    peer: Arc<dyn MediaPeer>,
    state: NegotiationState,
    remote_description_set: bool,
    pending_ice: IceBuffer,
    has_video_track: bool,
    on_message: OnMessage,
    /// Held while applying remote candidates
    ice_order: Arc<tokio::sync::Mutex<()>>,
    /// Held while adding or removing the video track
    track_order: Arc<tokio::sync::Mutex<()>>,
}

impl PeerContext {
    fn new(peer: Arc<dyn MediaPeer>, on_message: OnMessage) -> Self {
        Self {
            peer,
            state: NegotiationState::Idle,
            remote_description_set: false,
            pending_ice: IceBuffer::new(),
            has_video_track: false,
            on_message,
            ice_order: Arc::new(tokio::sync::Mutex::new(())),
            track_order: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

struct ActiveTrack {
    track: VideoTrack,
    attached: HashSet<ClientId>,
}

#[derive(Default)]
struct EngineState {
    contexts: HashMap<ClientId, PeerContext>,
    active: Option<ActiveTrack>,
}

/// Per-client offer/answer state machines plus the shared track
pub struct NegotiationEngine {
    factory: Arc<dyn PeerFactory>,
    state: Mutex<EngineState>,
    this: Weak<NegotiationEngine>,
}

impl NegotiationEngine {
    pub fn new(factory: Arc<dyn PeerFactory>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            factory,
            state: Mutex::new(EngineState::default()),
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the peer for a newly joined client
    ///
    /// If a stream is running and the peer is stable, the track is attached
    /// and an offer sent right away.
    pub async fn create_peer(&self, client_id: ClientId, on_message: OnMessage) -> Result<()> {
        let events = self.peer_events(client_id);
        let peer = self.factory.create_peer(client_id, events).await?;

        let stream_active = {
            let mut state = self.lock();
            state
                .contexts
                .insert(client_id, PeerContext::new(peer, on_message));
            state.active.is_some()
        };

        tracing::debug!(client = %client_id, stream_active = stream_active, "Peer context created");

        if stream_active {
            self.attach_and_offer(client_id).await;
        }
        Ok(())
    }

    fn peer_events(&self, client_id: ClientId) -> PeerEvents {
        let ice_engine = self.this.clone();
        let state_engine = self.this.clone();

        PeerEvents {
            on_ice_candidate: Box::new(move |candidate| {
                if let Some(engine) = ice_engine.upgrade() {
                    engine.emit(client_id, ServerMessage::IceCandidate(candidate));
                }
            }),
            on_signaling_state_change: Box::new(move |signaling| {
                tracing::trace!(client = %client_id, state = ?signaling, "Signaling state changed");
                if signaling != SignalingState::Stable {
                    return;
                }
                let (Some(engine), Ok(runtime)) = (state_engine.upgrade(), Handle::try_current())
                else {
                    return;
                };
                runtime.spawn(async move {
                    engine.attach_and_offer(client_id).await;
                });
            }),
            on_data_channel_message: Box::new(move |text| {
                tracing::debug!(client = %client_id, message = %text, "Data channel message");
            }),
        }
    }

    /// Apply a remote offer and answer it
    ///
    /// The remote description is applied in a background task; the answer
    /// is sent from its completion.
    pub async fn handle_offer(&self, client_id: ClientId, sdp: String) {
        let description = match SessionDescription::parse(SdpKind::Offer, sdp) {
            Ok(description) => description,
            Err(e) => {
                tracing::warn!(client = %client_id, error = %e, "Rejected offer");
                return;
            }
        };

        let Some(peer) = self.peer(client_id) else {
            tracing::warn!(client = %client_id, "Offer for unknown peer");
            return;
        };

        self.attach_track(client_id, false).await;
        self.spawn_remote_description(client_id, peer, description);
    }

    /// Apply the browser's answer to a server offer
    pub async fn handle_answer(&self, client_id: ClientId, sdp: String) {
        let description = match SessionDescription::parse(SdpKind::Answer, sdp) {
            Ok(description) => description,
            Err(e) => {
                tracing::warn!(client = %client_id, error = %e, "Rejected answer");
                return;
            }
        };

        let peer_state = {
            let state = self.lock();
            state
                .contexts
                .get(&client_id)
                .map(|ctx| (Arc::clone(&ctx.peer), ctx.state))
        };
        let Some((peer, negotiation)) = peer_state else {
            tracing::warn!(client = %client_id, "Answer for unknown peer");
            return;
        };

        if negotiation != NegotiationState::AwaitingAnswer {
            tracing::debug!(client = %client_id, state = ?negotiation, "Answer without outstanding offer");
        }

        self.spawn_remote_description(client_id, peer, description);
    }

    /// Apply a remote ICE candidate, or buffer it until the remote
    /// description is set
    pub async fn handle_ice(&self, client_id: ClientId, candidate: IceCandidate) {
        let ice_order = {
            let state = self.lock();
            state
                .contexts
                .get(&client_id)
                .map(|ctx| Arc::clone(&ctx.ice_order))
        };
        let Some(ice_order) = ice_order else {
            tracing::debug!(client = %client_id, "ICE candidate for unknown peer");
            return;
        };

        let _ordered = ice_order.lock().await;

        let peer = {
            let mut state = self.lock();
            let Some(ctx) = state.contexts.get_mut(&client_id) else {
                return;
            };
            if !ctx.remote_description_set {
                ctx.pending_ice.push(candidate);
                tracing::trace!(client = %client_id, buffered = ctx.pending_ice.len(), "ICE candidate buffered");
                return;
            }
            Arc::clone(&ctx.peer)
        };

        apply_candidate(client_id, peer.as_ref(), candidate).await;
    }

    /// Tear down a client's peer
    ///
    /// The context is removed before anything is awaited, so completions
    /// still in flight for this client find nothing.
    pub async fn close_peer(&self, client_id: ClientId) {
        let context = {
            let mut state = self.lock();
            if let Some(active) = state.active.as_mut() {
                active.attached.remove(&client_id);
            }
            state.contexts.remove(&client_id)
        };
        let Some(mut context) = context else {
            return;
        };

        context.state = NegotiationState::Closed;
        context.pending_ice.clear();

        if context.has_video_track {
            if let Err(e) = context.peer.remove_track().await {
                tracing::debug!(client = %client_id, error = %e, "Track removal on close failed");
            }
        }
        if let Err(e) = context.peer.close().await {
            tracing::debug!(client = %client_id, error = %e, "Peer close failed");
        }

        tracing::debug!(client = %client_id, "Peer closed");
    }

    /// Make `track` the shared stream and offer it to every stable peer
    pub async fn start_global_stream(&self, track: VideoTrack) {
        if self.has_active_track() {
            self.stop_global_stream().await;
        }

        let clients: Vec<ClientId> = {
            let mut state = self.lock();
            state.active = Some(ActiveTrack {
                track,
                attached: HashSet::new(),
            });
            state.contexts.keys().copied().collect()
        };

        tracing::info!(peers = clients.len(), "Shared track active");

        for client_id in clients {
            self.attach_and_offer(client_id).await;
        }
    }

    /// Detach the shared track from every peer, keeping connections open
    pub async fn stop_global_stream(&self) {
        let peers: Vec<(ClientId, Arc<dyn MediaPeer>, Arc<tokio::sync::Mutex<()>>)> = {
            let mut state = self.lock();
            state.active = None;
            state
                .contexts
                .iter()
                .map(|(id, ctx)| (*id, Arc::clone(&ctx.peer), Arc::clone(&ctx.track_order)))
                .collect()
        };

        for (client_id, peer, track_order) in peers {
            let _ordered = track_order.lock().await;

            let attached = {
                let mut state = self.lock();
                match state.contexts.get_mut(&client_id) {
                    Some(ctx) => std::mem::replace(&mut ctx.has_video_track, false),
                    None => false,
                }
            };

            if attached {
                if let Err(e) = peer.remove_track().await {
                    tracing::warn!(client = %client_id, error = %e, "Track removal failed");
                }
            }
        }

        tracing::info!("Shared track detached");
    }

    /// Send the playback position on a client's sync data channel
    pub async fn send_sync(&self, client_id: ClientId, current_time: f64, is_playing: bool) -> bool {
        let message = ServerMessage::Sync(SyncPayload::now(current_time, is_playing));
        match message.encode() {
            Ok(text) => self.send_data(client_id, &text).await,
            Err(e) => {
                tracing::warn!(client = %client_id, error = %e, "Dropping sync message");
                false
            }
        }
    }

    /// Send a text message on a client's sync data channel
    ///
    /// Returns `false` when the channel is not open; nothing is queued.
    pub async fn send_data(&self, client_id: ClientId, payload: &str) -> bool {
        let Some(peer) = self.peer(client_id) else {
            return false;
        };
        if !peer.sync_channel_open() {
            return false;
        }
        match peer.send_sync(payload).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(client = %client_id, error = %e, "Sync send failed");
                false
            }
        }
    }

    pub fn peer_count(&self) -> usize {
        self.lock().contexts.len()
    }

    pub fn has_peer(&self, client_id: ClientId) -> bool {
        self.lock().contexts.contains_key(&client_id)
    }

    pub fn negotiation_state(&self, client_id: ClientId) -> Option<NegotiationState> {
        self.lock().contexts.get(&client_id).map(|ctx| ctx.state)
    }

    pub fn remote_description_set(&self, client_id: ClientId) -> bool {
        self.lock()
            .contexts
            .get(&client_id)
            .is_some_and(|ctx| ctx.remote_description_set)
    }

    pub fn pending_ice_len(&self, client_id: ClientId) -> usize {
        self.lock()
            .contexts
            .get(&client_id)
            .map_or(0, |ctx| ctx.pending_ice.len())
    }

    pub fn has_video_track(&self, client_id: ClientId) -> bool {
        self.lock()
            .contexts
            .get(&client_id)
            .is_some_and(|ctx| ctx.has_video_track)
    }

    pub fn has_active_track(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Clients currently receiving the shared track
    pub fn attached_clients(&self) -> Vec<ClientId> {
        let state = self.lock();
        let mut clients: Vec<ClientId> = state
            .active
            .as_ref()
            .map(|active| active.attached.iter().copied().collect())
            .unwrap_or_default();
        clients.sort();
        clients
    }

    fn peer(&self, client_id: ClientId) -> Option<Arc<dyn MediaPeer>> {
        self.lock()
            .contexts
            .get(&client_id)
            .map(|ctx| Arc::clone(&ctx.peer))
    }

    fn emit(&self, client_id: ClientId, message: ServerMessage) {
        let on_message = self
            .lock()
            .contexts
            .get(&client_id)
            .map(|ctx| Arc::clone(&ctx.on_message));
        let Some(on_message) = on_message else {
            return;
        };

        match message.encode() {
            Ok(text) => {
                tracing::debug!(client = %client_id, kind = message.kind(), "Signaling out");
                on_message(text);
            }
            Err(e) => tracing::warn!(client = %client_id, error = %e, "Dropping outbound message"),
        }
    }

    fn spawn_remote_description(
        &self,
        client_id: ClientId,
        peer: Arc<dyn MediaPeer>,
        description: SessionDescription,
    ) {
        let engine = self.this.clone();
        let kind = description.kind;

        tokio::spawn(async move {
            if let Err(e) = peer.set_remote_description(description).await {
                tracing::warn!(client = %client_id, kind = ?kind, error = %e, "Remote description rejected");
                return;
            }
            if let Some(engine) = engine.upgrade() {
                engine.complete_remote_description(client_id, kind).await;
            }
        });
    }

    async fn complete_remote_description(&self, client_id: ClientId, kind: SdpKind) {
        let handles = {
            let mut state = self.lock();
            state.contexts.get_mut(&client_id).map(|ctx| {
                if kind == SdpKind::Offer {
                    ctx.state = NegotiationState::RemoteOfferReceived;
                }
                (Arc::clone(&ctx.peer), Arc::clone(&ctx.ice_order))
            })
        };
        let Some((peer, ice_order)) = handles else {
            tracing::debug!(client = %client_id, "Remote description completed for departed client");
            return;
        };

        self.flush_pending_ice(client_id, peer.as_ref(), &ice_order)
            .await;

        match kind {
            SdpKind::Offer => self.send_answer(client_id, peer.as_ref()).await,
            SdpKind::Answer => {
                let still_open = match self.lock().contexts.get_mut(&client_id) {
                    Some(ctx) => {
                        ctx.state = NegotiationState::Stable;
                        true
                    }
                    None => false,
                };
                if still_open {
                    tracing::debug!(client = %client_id, "Negotiation complete");
                    self.attach_and_offer(client_id).await;
                }
            }
        }
    }

    async fn flush_pending_ice(
        &self,
        client_id: ClientId,
        peer: &dyn MediaPeer,
        ice_order: &tokio::sync::Mutex<()>,
    ) {
        let _ordered = ice_order.lock().await;

        let pending = {
            let mut state = self.lock();
            let Some(ctx) = state.contexts.get_mut(&client_id) else {
                return;
            };
            ctx.remote_description_set = true;
            ctx.pending_ice.drain()
        };

        if !pending.is_empty() {
            tracing::debug!(client = %client_id, count = pending.len(), "Flushing buffered ICE candidates");
        }
        for candidate in pending {
            apply_candidate(client_id, peer, candidate).await;
        }
    }

    async fn send_answer(&self, client_id: ClientId, peer: &dyn MediaPeer) {
        let sdp = match peer.create_answer().await {
            Ok(sdp) => sdp,
            Err(e) => {
                tracing::warn!(client = %client_id, error = %e, "Answer creation failed");
                return;
            }
        };

        let still_open = match self.lock().contexts.get_mut(&client_id) {
            Some(ctx) => {
                ctx.state = NegotiationState::Stable;
                true
            }
            None => false,
        };
        if still_open {
            self.emit(client_id, ServerMessage::Answer { sdp });
            // The stable signaling event fires before this point, so a
            // deferred attach is picked up here
            self.attach_and_offer(client_id).await;
        }
    }

    async fn attach_and_offer(&self, client_id: ClientId) {
        if self.attach_track(client_id, true).await {
            self.send_offer(client_id).await;
        }
    }

    /// Add the shared track to a peer that lacks it
    ///
    /// With `require_stable`, only peers whose negotiation can start a new
    /// exchange are touched. Returns whether the track was newly attached.
    async fn attach_track(&self, client_id: ClientId, require_stable: bool) -> bool {
        let track_order = {
            let state = self.lock();
            state
                .contexts
                .get(&client_id)
                .map(|ctx| Arc::clone(&ctx.track_order))
        };
        let Some(track_order) = track_order else {
            return false;
        };
        let _ordered = track_order.lock().await;

        let target = {
            let state = self.lock();
            let (Some(active), Some(ctx)) = (state.active.as_ref(), state.contexts.get(&client_id))
            else {
                return false;
            };
            if ctx.has_video_track {
                return false;
            }
            if require_stable
                && !(ctx.state.can_start_exchange()
                    && ctx.peer.signaling_state() == SignalingState::Stable)
            {
                tracing::debug!(client = %client_id, state = ?ctx.state, "Track attach deferred");
                return false;
            }
            (Arc::clone(&ctx.peer), active.track.clone())
        };
        let (peer, track) = target;

        if let Err(e) = peer.add_track(&track).await {
            tracing::warn!(client = %client_id, error = %e, "Track attach failed");
            return false;
        }

        let attached = {
            let mut state = self.lock();
            let EngineState { contexts, active } = &mut *state;
            match (active.as_mut(), contexts.get_mut(&client_id)) {
                (Some(active), Some(ctx)) if active.track.same_as(&track) => {
                    ctx.has_video_track = true;
                    active.attached.insert(client_id);
                    true
                }
                _ => false,
            }
        };

        if !attached {
            // Stream stopped or client left while the track was being added
            let _ = peer.remove_track().await;
            return false;
        }

        tracing::debug!(client = %client_id, "Shared track attached");
        true
    }

    async fn send_offer(&self, client_id: ClientId) {
        let target = {
            let mut state = self.lock();
            let Some(ctx) = state.contexts.get_mut(&client_id) else {
                return;
            };
            if !ctx.state.can_start_exchange() {
                return;
            }
            let previous = ctx.state;
            ctx.state = NegotiationState::LocalOfferSent;
            (Arc::clone(&ctx.peer), previous)
        };
        let (peer, previous) = target;

        match peer.create_offer().await {
            Ok(sdp) => {
                let still_open = match self.lock().contexts.get_mut(&client_id) {
                    Some(ctx) => {
                        ctx.state = NegotiationState::AwaitingAnswer;
                        true
                    }
                    None => false,
                };
                if still_open {
                    self.emit(client_id, ServerMessage::Offer { sdp });
                }
            }
            Err(e) => {
                tracing::warn!(client = %client_id, error = %e, "Offer creation failed");
                if let Some(ctx) = self.lock().contexts.get_mut(&client_id) {
                    ctx.state = previous;
                }
            }
        }
    }
}

async fn apply_candidate(client_id: ClientId, peer: &dyn MediaPeer, candidate: IceCandidate) {
    if let Err(e) = peer.add_ice_candidate(candidate).await {
        tracing::warn!(client = %client_id, error = %e, "ICE candidate rejected");
    }
}
