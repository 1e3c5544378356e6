//! WebSocket signaling server

pub mod config;
pub mod listener;

pub use config::{ServerConfig, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PORT};
pub use listener::SyncServer;
