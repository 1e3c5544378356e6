//! syncwatch: group watch server
//!
//! Browsers connect over a WebSocket, negotiate a WebRTC peer connection
//! with the server and all receive the same H.264 video track, decoded from
//! a server-side file and paced in real time. Playback position is pushed
//! to every viewer over a `sync` data channel; play/pause/seek messages are
//! relayed between viewers.
//!
//! ```text
//!   browser ──ws──► SyncServer ──► TransportSession ──► SessionRegistry
//!                                                        │        │
//!                                         NegotiationEngine    VideoSource
//!                                          (webrtc-rs peers)   (ffmpeg ──► openh264)
//!                                                        │        │
//!   browser ◄──────────── RTP (shared track) + "sync" ◄──┴────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use syncwatch::server::{ServerConfig, SyncServer};
//!
//! # async fn run() -> syncwatch::Result<()> {
//! let server = SyncServer::with_webrtc(ServerConfig::default())?;
//! server.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await
//! # }
//! ```

pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod rtc;
pub mod server;
pub mod stats;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};
pub use registry::{ClientId, SessionRegistry};
pub use server::{ServerConfig, SyncServer};
