//! Signaling protocol
//!
//! JSON messages exchanged with browsers over the WebSocket channel.
//!
//! ```text
//!   browser                                  server
//!      │ ── start_stream {file_path} ─────────►  │
//!      │ ── offer {sdp} ──────────────────────►  │
//!      │ ── ice_candidate {candidate,...} ────►  │
//!      │ ◄─────────────────────── answer {sdp} ─ │
//!      │ ◄───────────── ice_candidate {...} ──── │
//!      │ ◄══ sync {currentTime,isPlaying} ═════  │  (data channel, every 100 ms)
//! ```

pub mod message;

pub use message::{ClientMessage, IceCandidate, PlaybackControl, ServerMessage, SyncPayload};
