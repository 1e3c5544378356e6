//! Media peer seam
//!
//! The negotiation engine drives peers only through [`MediaPeer`] and
//! creates them through [`PeerFactory`]. Events flow back as plain closures
//! in [`PeerEvents`]; they capture a client id and a weak engine reference,
//! never the peer itself.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

use crate::error::{NegotiationError, Result};
use crate::media::VideoTrack;
use crate::protocol::IceCandidate;
use crate::registry::ClientId;

/// Label of the data channel carrying playback sync messages
pub const SYNC_CHANNEL_LABEL: &str = "sync";

/// Signaling state as reported by the peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
    Unknown,
}

impl From<RTCSignalingState> for SignalingState {
    fn from(state: RTCSignalingState) -> Self {
        match state {
            RTCSignalingState::Stable => SignalingState::Stable,
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Unknown,
        }
    }
}

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Remote SDP that passed parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    /// Validate SDP text before it is handed to a peer
    pub fn parse(kind: SdpKind, sdp: String) -> std::result::Result<Self, NegotiationError> {
        let mut reader = Cursor::new(sdp.as_bytes());
        webrtc::sdp::description::session::SessionDescription::unmarshal(&mut reader)
            .map_err(|e| NegotiationError::InvalidSdp(e.to_string()))?;
        Ok(Self { kind, sdp })
    }
}

/// Callbacks a peer fires back into the engine
pub struct PeerEvents {
    /// Local ICE candidate gathered
    pub on_ice_candidate: Box<dyn Fn(IceCandidate) + Send + Sync>,
    /// Signaling state changed
    pub on_signaling_state_change: Box<dyn Fn(SignalingState) + Send + Sync>,
    /// Text received on a data channel
    pub on_data_channel_message: Box<dyn Fn(String) + Send + Sync>,
}

impl PeerEvents {
    /// Events that go nowhere
    pub fn noop() -> Self {
        Self {
            on_ice_candidate: Box::new(|_| {}),
            on_signaling_state_change: Box::new(|_| {}),
            on_data_channel_message: Box::new(|_| {}),
        }
    }
}

/// One browser's peer connection, as seen by the engine
#[async_trait]
pub trait MediaPeer: Send + Sync {
    fn signaling_state(&self) -> SignalingState;

    /// Create a send-only offer, apply it locally and return its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Create an answer to the applied remote offer, apply it locally and
    /// return its SDP
    async fn create_answer(&self) -> Result<String>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Start sending `track` to this peer
    async fn add_track(&self, track: &VideoTrack) -> Result<()>;

    /// Stop sending the video track, keeping the connection up
    async fn remove_track(&self) -> Result<()>;

    /// Whether a sync data channel is open
    fn sync_channel_open(&self) -> bool;

    /// Send a text message on the sync data channel
    async fn send_sync(&self, payload: &str) -> Result<()>;

    /// Close data channels and the connection
    async fn close(&self) -> Result<()>;
}

/// Creates peers configured with the server's ICE servers
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create_peer(
        &self,
        client_id: ClientId,
        events: PeerEvents,
    ) -> Result<Arc<dyn MediaPeer>>;
}
