//! Error types
//!
//! Every failure in the server falls into one of a handful of categories.
//! None of them are fatal to the process: protocol errors drop a message,
//! negotiation errors freeze one peer, resource errors abort a stream start
//! and backpressure closes one session.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket or filesystem I/O failure
    Io(io::Error),
    /// WebSocket transport failure
    WebSocket(tokio_tungstenite::tungstenite::Error),
    /// Malformed or unknown signaling message
    Protocol(ProtocolError),
    /// SDP or ICE negotiation failure
    Negotiation(NegotiationError),
    /// Media file or codec failure
    Resource(ResourceError),
    /// Outbound queue overflow
    Backpressure {
        /// Queue capacity that was exceeded
        capacity: usize,
    },
    /// Registry lookup failure
    Registry(RegistryError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Negotiation(e) => write!(f, "Negotiation error: {}", e),
            Error::Resource(e) => write!(f, "Resource error: {}", e),
            Error::Backpressure { capacity } => {
                write!(f, "Outbound queue full ({} messages)", capacity)
            }
            Error::Registry(e) => write!(f, "Registry error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::WebSocket(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Negotiation(e) => Some(e),
            Error::Resource(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::Backpressure { .. } => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<NegotiationError> for Error {
    fn from(e: NegotiationError) -> Self {
        Error::Negotiation(e)
    }
}

impl From<ResourceError> for Error {
    fn from(e: ResourceError) -> Self {
        Error::Resource(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

/// Signaling message errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not valid JSON, or fields of the wrong shape
    Malformed(String),
    /// JSON object without a string `type` field
    MissingType,
    /// `type` names a message kind the server does not handle
    UnknownType(String),
    /// Outbound message could not be serialized
    Encode(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Malformed(msg) => write!(f, "malformed message: {}", msg),
            ProtocolError::MissingType => write!(f, "message has no type"),
            ProtocolError::UnknownType(kind) => write!(f, "unknown message type: {}", kind),
            ProtocolError::Encode(msg) => write!(f, "failed to encode message: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Peer negotiation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// SDP text failed to parse
    InvalidSdp(String),
    /// Peer connection could not be created
    PeerCreation(String),
    /// Remote description was rejected
    RemoteDescription(String),
    /// Local offer or answer could not be created
    LocalDescription(String),
    /// ICE candidate was rejected
    IceCandidate(String),
    /// Track could not be added or removed
    Track(String),
    /// Data channel operation failed
    DataChannel(String),
    /// Peer is closed
    Closed,
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationError::InvalidSdp(msg) => write!(f, "invalid SDP: {}", msg),
            NegotiationError::PeerCreation(msg) => write!(f, "peer creation failed: {}", msg),
            NegotiationError::RemoteDescription(msg) => {
                write!(f, "remote description rejected: {}", msg)
            }
            NegotiationError::LocalDescription(msg) => {
                write!(f, "local description failed: {}", msg)
            }
            NegotiationError::IceCandidate(msg) => write!(f, "ICE candidate rejected: {}", msg),
            NegotiationError::Track(msg) => write!(f, "track operation failed: {}", msg),
            NegotiationError::DataChannel(msg) => write!(f, "data channel failed: {}", msg),
            NegotiationError::Closed => write!(f, "peer is closed"),
        }
    }
}

impl std::error::Error for NegotiationError {}

/// Media resource errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Input file does not exist
    FileNotFound(PathBuf),
    /// Container could not be probed
    Probe(String),
    /// Container has no video stream
    NoVideoStream(PathBuf),
    /// Decoder failed to start or produce frames
    Decoder(String),
    /// Encoder failed to initialize or encode
    Encoder(String),
    /// Background worker failed
    Worker(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::FileNotFound(path) => write!(f, "file not found: {}", path.display()),
            ResourceError::Probe(msg) => write!(f, "probe failed: {}", msg),
            ResourceError::NoVideoStream(path) => {
                write!(f, "no video stream in {}", path.display())
            }
            ResourceError::Decoder(msg) => write!(f, "decoder error: {}", msg),
            ResourceError::Encoder(msg) => write!(f, "encoder error: {}", msg),
            ResourceError::Worker(msg) => write!(f, "worker error: {}", msg),
        }
    }
}

impl std::error::Error for ResourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category() {
        let err = Error::from(ProtocolError::UnknownType("dance".into()));
        assert_eq!(
            err.to_string(),
            "Protocol error: unknown message type: dance"
        );

        let err = Error::Backpressure { capacity: 256 };
        assert_eq!(err.to_string(), "Outbound queue full (256 messages)");
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;

        let err = Error::from(ResourceError::FileNotFound(PathBuf::from("/tmp/x.mp4")));
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "file not found: /tmp/x.mp4");

        assert!(Error::Backpressure { capacity: 1 }.source().is_none());
    }
}
