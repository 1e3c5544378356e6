//! Client registry and shared stream
//!
//! The registry maps WebSocket connections to clients, forwards their
//! signaling to the negotiation engine and owns the one shared stream.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<SessionRegistry>
//!                   ┌──────────────────────────────┐
//!                   │ clients: transport ─► Client │
//!                   │ stream:  Option<GlobalStream>│
//!                   │ engine:  NegotiationEngine   │
//!                   └──────────────┬───────────────┘
//!                                  │
//!        ┌─────────────────────────┼──────────────────────────┐
//!        │                         │                          │
//!        ▼                         ▼                          ▼
//!   dispatch()              start_stream()             SyncBroadcaster
//!   offer/answer/ice        VideoSource ──► track      tick_sync() every
//!   ──► engine              ──► engine attach          interval ──► data channels
//! ```
//!
//! Outbound signaling goes back through a closure holding a weak reference
//! to the client's transport, so a departed client silently drops it.

pub mod broadcaster;
pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use broadcaster::SyncBroadcaster;
pub use config::{RegistryConfig, DEFAULT_SYNC_INTERVAL};
pub use entry::{ClientId, ClientSession, GlobalStream};
pub use error::RegistryError;
pub use store::SessionRegistry;
