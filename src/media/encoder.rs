//! H.264 encoding into the shared track
//!
//! The encoder is created on the first frame, once the picture size and
//! frame duration are known, and lives on the decode thread's side of the
//! sink. Samples are handed to webrtc-rs through the runtime handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use openh264::encoder::{
    BitRate, Encoder, EncoderConfig, FrameRate, IntraFramePeriod, RateControlMode,
    SpsPpsStrategy, UsageType,
};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;
use tokio::runtime::Handle;
use webrtc::media::Sample;

use super::config::VideoConfig;
use super::decoder::MediaOpener;
use super::ffmpeg::FfmpegOpener;
use super::frame::VideoFrame;
use super::source::FrameSink;
use super::track::VideoTrack;
use crate::error::{ResourceError, Result};

/// Builds the sink that feeds a freshly created track
pub trait SinkFactory: Send + Sync {
    fn sink_for(&self, track: &VideoTrack) -> Arc<dyn FrameSink>;
}

/// Decoder and encoder backends used by the shared stream
#[derive(Clone)]
pub struct MediaBackend {
    pub opener: Arc<dyn MediaOpener>,
    pub sinks: Arc<dyn SinkFactory>,
}

impl MediaBackend {
    pub fn new(opener: Arc<dyn MediaOpener>, sinks: Arc<dyn SinkFactory>) -> Self {
        Self { opener, sinks }
    }

    /// ffmpeg decoding and openh264 encoding
    ///
    /// Must be called from within a tokio runtime.
    pub fn ffmpeg(config: &VideoConfig) -> Result<Self> {
        let opener = FfmpegOpener::new(&config.ffmpeg_path, &config.ffprobe_path);
        let sinks = H264SinkFactory::new(config)?;
        Ok(Self::new(Arc::new(opener), Arc::new(sinks)))
    }
}

/// Creates [`H264TrackSink`]s
pub struct H264SinkFactory {
    bitrate_bps: u32,
    keyframe_interval: u32,
    runtime: Handle,
}

impl H264SinkFactory {
    pub fn new(config: &VideoConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| ResourceError::Worker(format!("no tokio runtime: {}", e)))?;
        Ok(Self {
            bitrate_bps: config.bitrate_bps,
            keyframe_interval: config.keyframe_interval,
            runtime,
        })
    }
}

impl SinkFactory for H264SinkFactory {
    fn sink_for(&self, track: &VideoTrack) -> Arc<dyn FrameSink> {
        Arc::new(H264TrackSink {
            track: track.clone(),
            bitrate_bps: self.bitrate_bps,
            keyframe_interval: self.keyframe_interval,
            encoder: Mutex::new(None),
            encoder_failed: AtomicBool::new(false),
            runtime: self.runtime.clone(),
        })
    }
}

/// Encodes frames and writes them as samples to a [`VideoTrack`]
pub struct H264TrackSink {
    track: VideoTrack,
    bitrate_bps: u32,
    keyframe_interval: u32,
    encoder: Mutex<Option<Encoder>>,
    encoder_failed: AtomicBool,
    runtime: Handle,
}

impl H264TrackSink {
    fn encode(&self, frame: &VideoFrame) -> Result<Vec<u8>> {
        let picture = &frame.picture;
        if picture.width % 2 != 0 || picture.height % 2 != 0 {
            return Err(ResourceError::Encoder(format!(
                "odd picture size {}x{}",
                picture.width, picture.height
            ))
            .into());
        }

        let mut slot = self.encoder.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            let fps = 1.0 / frame.duration.as_secs_f64().max(f64::EPSILON);
            *slot = Some(self.create_encoder(fps as f32)?);
        }
        let Some(encoder) = slot.as_mut() else {
            return Err(ResourceError::Encoder("encoder unavailable".into()).into());
        };

        let yuv = YUVBuffer::from_vec(
            picture.data.to_vec(),
            picture.width as usize,
            picture.height as usize,
        );
        let bitstream = encoder
            .encode(&yuv)
            .map_err(|e| ResourceError::Encoder(e.to_string()))?;

        Ok(bitstream.to_vec())
    }

    fn create_encoder(&self, fps: f32) -> Result<Encoder> {
        let config = EncoderConfig::new()
            .usage_type(UsageType::CameraVideoRealTime)
            .max_frame_rate(FrameRate::from_hz(fps))
            .bitrate(BitRate::from_bps(self.bitrate_bps))
            .rate_control_mode(RateControlMode::Bitrate)
            // openh264 writes SPS/PPS ahead of every IDR; fixed ids keep
            // them identical for viewers that join mid-stream
            .sps_pps_strategy(SpsPpsStrategy::ConstantId)
            .intra_frame_period(IntraFramePeriod::from_num_frames(self.keyframe_interval));

        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| ResourceError::Encoder(e.to_string()))?;

        tracing::debug!(fps = fps, bitrate = self.bitrate_bps, "H.264 encoder ready");
        Ok(encoder)
    }
}

impl FrameSink for H264TrackSink {
    fn on_frame(&self, frame: &VideoFrame) {
        if self.encoder_failed.load(Ordering::Relaxed) {
            return;
        }

        let data = match self.encode(frame) {
            Ok(data) if data.is_empty() => return,
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, frame = frame.index, "Encoding disabled for this stream");
                self.encoder_failed.store(true, Ordering::Relaxed);
                return;
            }
        };

        let sample = Sample {
            data: Bytes::from(data),
            duration: frame.duration,
            ..Default::default()
        };

        if let Err(e) = self.runtime.block_on(self.track.write_sample(&sample)) {
            tracing::trace!(error = %e, frame = frame.index, "Sample write failed");
        }
    }
}
