//! Client and stream entries
//!
//! This module defines the per-client and per-stream state stored in the
//! registry.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::media::{SourceConfig, VideoSource, VideoTrack};
use crate::transport::TransportSession;

/// Registry-assigned client identifier
///
/// Allocated from a counter at join time and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Entry for a single connected client
pub struct ClientSession {
    pub id: ClientId,

    /// Owning connection; expired once the connection is gone
    pub transport: Weak<TransportSession>,

    /// When the client joined
    pub joined_at: Instant,
}

impl ClientSession {
    pub(super) fn new(id: ClientId, transport: &Arc<TransportSession>) -> Self {
        Self {
            id,
            transport: Arc::downgrade(transport),
            joined_at: Instant::now(),
        }
    }

    /// Live transport, if the connection still exists and is not closing
    pub fn transport(&self) -> Option<Arc<TransportSession>> {
        self.transport
            .upgrade()
            .filter(|transport| !transport.is_closing())
    }

    pub fn is_expired(&self) -> bool {
        self.transport().is_none()
    }
}

/// The one shared stream
pub struct GlobalStream {
    pub config: SourceConfig,
    pub source: VideoSource,
    pub track: VideoTrack,
    pub started_at: Instant,
}

impl GlobalStream {
    pub(super) fn new(config: SourceConfig, source: VideoSource, track: VideoTrack) -> Self {
        Self {
            config,
            source,
            track,
            started_at: Instant::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.source.is_running()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_client_id_display() {
        assert_eq!(ClientId::new(3).to_string(), "client-3");
        assert_eq!(ClientId::new(3).as_u64(), 3);
    }

    #[test]
    fn test_client_id_hash_and_order() {
        let ids: HashSet<ClientId> = [1, 2, 2, 3].into_iter().map(ClientId::new).collect();
        assert_eq!(ids.len(), 3);
        assert!(ClientId::new(1) < ClientId::new(2));
    }

    #[test]
    fn test_session_expires_with_transport() {
        let transport = Arc::new(TransportSession::new(
            1,
            "127.0.0.1:9000".parse().unwrap(),
            4,
            Weak::new(),
        ));
        let session = ClientSession::new(ClientId::new(1), &transport);
        assert!(!session.is_expired());

        drop(transport);
        assert!(session.is_expired());
    }
}
