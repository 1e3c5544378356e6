//! WebRTC negotiation
//!
//! ```text
//!   signaling ──► NegotiationEngine ──► MediaPeer (webrtc-rs)
//!                 per-client state        SDP, ICE, track, "sync" channel
//!                 ICE buffering
//!                 shared track attach
//! ```

pub mod config;
pub mod engine;
pub mod peer;
pub mod state;
pub mod webrtc_peer;

pub use config::{IceServer, RtcConfig, DEFAULT_STUN_URL};
pub use engine::{NegotiationEngine, OnMessage};
pub use peer::{
    MediaPeer, PeerEvents, PeerFactory, SdpKind, SessionDescription, SignalingState,
    SYNC_CHANNEL_LABEL,
};
pub use state::{IceBuffer, NegotiationState};
pub use webrtc_peer::{WebRtcPeer, WebRtcPeerFactory};
