//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::media::VideoConfig;
use crate::registry::RegistryConfig;
use crate::rtc::RtcConfig;
use crate::transport::DEFAULT_OUTBOUND_CAPACITY;

/// Default signaling port
pub const DEFAULT_PORT: u16 = 8080;

/// Largest accepted inbound WebSocket message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Largest inbound WebSocket message in bytes
    pub max_message_size: usize,

    /// Outbound messages buffered per connection before it is closed
    pub outbound_queue_capacity: usize,

    /// ICE servers handed to every peer connection
    pub rtc: RtcConfig,

    /// Sync interval and shared stream settings
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            tcp_nodelay: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            outbound_queue_capacity: DEFAULT_OUTBOUND_CAPACITY,
            rtc: RtcConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Set the inbound message size limit
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Set the per-connection outbound queue bound (at least 1)
    pub fn outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity.max(1);
        self
    }

    /// Set the sync broadcast interval
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.registry = self.registry.sync_interval(interval);
        self
    }

    /// Set the ICE servers
    pub fn rtc(mut self, rtc: RtcConfig) -> Self {
        self.rtc = rtc;
        self
    }

    /// Set the shared stream settings
    pub fn video(mut self, video: VideoConfig) -> Self {
        self.registry = self.registry.video(video);
        self
    }
}
