//! Shared outbound video track

use std::sync::Arc;

use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::{NegotiationError, Result};

/// Track id used for the shared stream
pub const VIDEO_TRACK_ID: &str = "video";

/// Media stream id used for the shared stream
pub const VIDEO_STREAM_ID: &str = "syncwatch";

const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// One H.264 sample track fanned out to every attached peer
///
/// Cloning shares the underlying track; every peer that adds it receives the
/// same samples.
#[derive(Clone)]
pub struct VideoTrack {
    inner: Arc<TrackLocalStaticSample>,
}

impl VideoTrack {
    /// Create an H.264 track
    pub fn h264(track_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_owned(),
            clock_rate: 90_000,
            channels: 0,
            sdp_fmtp_line: H264_FMTP.to_owned(),
            rtcp_feedback: vec![],
        };

        Self {
            inner: Arc::new(TrackLocalStaticSample::new(
                capability,
                track_id.into(),
                stream_id.into(),
            )),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    /// Whether both handles refer to the same underlying track
    pub fn same_as(&self, other: &VideoTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Track handle for `RTCPeerConnection::add_transceiver_from_track`
    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.inner) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Write one encoded access unit to every bound peer
    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        self.inner
            .write_sample(sample)
            .await
            .map_err(|e| NegotiationError::Track(e.to_string()).into())
    }
}

impl Default for VideoTrack {
    fn default() -> Self {
        Self::h264(VIDEO_TRACK_ID, VIDEO_STREAM_ID)
    }
}

impl std::fmt::Debug for VideoTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoTrack").field("id", &self.id()).finish()
    }
}
