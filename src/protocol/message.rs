//! Signaling wire messages
//!
//! Every WebSocket text frame carries one JSON object discriminated by its
//! `type` field. Field names follow the browser APIs (`sdpMid`,
//! `sdpMLineIndex`) so clients can forward `RTCIceCandidate` values as-is.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Message kinds relayed verbatim to the other viewers
pub const PLAYBACK_CONTROL_KINDS: &[&str] = &["play", "pause", "seek"];

/// ICE candidate as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    /// Index of the m-line the candidate belongs to
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Create a candidate bound to the first m-line
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }
}

/// Play/pause/seek message forwarded untouched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackControl {
    /// Message kind (`play`, `pause` or `seek`)
    pub kind: String,
    /// Raw JSON text as received
    pub raw: Arc<str>,
}

/// Message received from a browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Remote SDP offer
    Offer { sdp: String },
    /// Remote SDP answer to a server offer
    Answer { sdp: String },
    /// Trickled remote ICE candidate
    IceCandidate(IceCandidate),
    /// Start (or restart) the shared stream from a server-side file
    StartStream { file_path: String },
    /// Stop the shared stream
    StopStream,
    /// Ask for the current playback position
    SyncRequest,
    /// Group playback control
    Playback(PlaybackControl),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate(IceCandidate),
    StartStream { file_path: String },
    StopStream,
    SyncRequest,
}

const INBOUND_KINDS: &[&str] = &[
    "offer",
    "answer",
    "ice_candidate",
    "start_stream",
    "stop_stream",
    "sync_request",
];

impl ClientMessage {
    /// Parse one text frame
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_owned();

        if PLAYBACK_CONTROL_KINDS.contains(&kind.as_str()) {
            return Ok(ClientMessage::Playback(PlaybackControl {
                kind,
                raw: Arc::from(raw),
            }));
        }

        if !INBOUND_KINDS.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }

        let inbound: Inbound =
            serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        Ok(match inbound {
            Inbound::Offer { sdp } => ClientMessage::Offer { sdp },
            Inbound::Answer { sdp } => ClientMessage::Answer { sdp },
            Inbound::IceCandidate(candidate) => ClientMessage::IceCandidate(candidate),
            Inbound::StartStream { file_path } => ClientMessage::StartStream { file_path },
            Inbound::StopStream => ClientMessage::StopStream,
            Inbound::SyncRequest => ClientMessage::SyncRequest,
        })
    }

    /// Wire name of this message
    pub fn kind(&self) -> &str {
        match self {
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate(_) => "ice_candidate",
            ClientMessage::StartStream { .. } => "start_stream",
            ClientMessage::StopStream => "stop_stream",
            ClientMessage::SyncRequest => "sync_request",
            ClientMessage::Playback(control) => &control.kind,
        }
    }
}

/// Playback position snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    /// Position in seconds within the current loop cycle
    #[serde(rename = "currentTime")]
    pub current_time: f64,
    /// Whether the source is producing frames
    #[serde(rename = "isPlaying")]
    pub is_playing: bool,
    /// Wall clock at snapshot time, milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl SyncPayload {
    /// Snapshot stamped with the current wall clock
    pub fn now(current_time: f64, is_playing: bool) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            current_time,
            is_playing,
            timestamp,
        }
    }
}

/// Message sent to a browser
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Server-initiated SDP offer
    Offer { sdp: String },
    /// SDP answer to a client offer
    Answer { sdp: String },
    /// Local ICE candidate
    IceCandidate(IceCandidate),
    /// Playback position
    Sync(SyncPayload),
}

impl ServerMessage {
    /// Serialize to a shareable JSON payload
    pub fn encode(&self) -> Result<Arc<str>, ProtocolError> {
        serde_json::to_string(self)
            .map(Arc::from)
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Wire name of this message
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Offer { .. } => "offer",
            ServerMessage::Answer { .. } => "answer",
            ServerMessage::IceCandidate(_) => "ice_candidate",
            ServerMessage::Sync(_) => "sync",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offer() {
        let msg = ClientMessage::parse(r#"{"type":"offer","sdp":"v=0"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Offer { sdp: "v=0".into() });
        assert_eq!(msg.kind(), "offer");
    }

    #[test]
    fn test_parse_ice_candidate_browser_fields() {
        let raw = r#"{"type":"ice_candidate","candidate":"candidate:1 1 UDP 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        match ClientMessage::parse(raw).unwrap() {
            ClientMessage::IceCandidate(c) => {
                assert!(c.candidate.starts_with("candidate:1"));
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_ice_candidate_missing_optional_fields() {
        let raw = r#"{"type":"ice_candidate","candidate":"c","sdpMid":null}"#;
        match ClientMessage::parse(raw).unwrap() {
            ClientMessage::IceCandidate(c) => {
                assert_eq!(c.sdp_mid, None);
                assert_eq!(c.sdp_mline_index, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_stream_lifecycle() {
        let msg =
            ClientMessage::parse(r#"{"type":"start_stream","file_path":"/media/a.mp4"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::StartStream {
                file_path: "/media/a.mp4".into()
            }
        );

        let msg = ClientMessage::parse(r#"{"type":"stop_stream"}"#).unwrap();
        assert_eq!(msg, ClientMessage::StopStream);
    }

    #[test]
    fn test_parse_playback_keeps_raw_text() {
        let raw = r#"{"type":"seek","time":12.5}"#;
        match ClientMessage::parse(raw).unwrap() {
            ClientMessage::Playback(control) => {
                assert_eq!(control.kind, "seek");
                assert_eq!(&*control.raw, raw);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            ClientMessage::parse("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert_eq!(
            ClientMessage::parse(r#"{"sdp":"v=0"}"#),
            Err(ProtocolError::MissingType)
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"dance"}"#),
            Err(ProtocolError::UnknownType("dance".into()))
        );
        // Known type, missing required field
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"offer"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_encode_answer() {
        let json = ServerMessage::Answer { sdp: "v=0".into() }.encode().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "answer");
        assert_eq!(value["sdp"], "v=0");
    }

    #[test]
    fn test_encode_ice_candidate_uses_browser_names() {
        let json = ServerMessage::IceCandidate(IceCandidate::new("candidate:x"))
            .encode()
            .unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "ice_candidate");
        assert_eq!(value["candidate"], "candidate:x");
        assert_eq!(value["sdpMid"], "0");
        assert_eq!(value["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_encode_sync() {
        let payload = SyncPayload {
            current_time: 1.5,
            is_playing: true,
            timestamp: 42,
        };
        let json = ServerMessage::Sync(payload).encode().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "sync");
        assert_eq!(value["currentTime"], 1.5);
        assert_eq!(value["isPlaying"], true);
        assert_eq!(value["timestamp"], 42);
    }

    #[test]
    fn test_sync_payload_now_is_stamped() {
        let payload = SyncPayload::now(0.0, false);
        assert!(payload.timestamp > 0);
    }
}
