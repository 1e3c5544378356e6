//! WebSocket transport sessions
//!
//! A [`TransportSession`] is the server's handle on one browser connection:
//! a bounded outbound queue, a one-shot close state and a one-shot departure
//! notification. [`connection::serve`] drives the actual socket.

pub mod connection;
pub mod queue;
pub mod session;

pub use connection::serve;
pub use queue::{OutboundQueue, DEFAULT_OUTBOUND_CAPACITY};
pub use session::{CloseReason, Outbound, TransportSession};
