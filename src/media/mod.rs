//! Video source pipeline
//!
//! Turns a server-side file into one paced H.264 track shared by every
//! viewer.
//!
//! ```text
//!   MediaOpener ──► VideoDecoder ──► VideoSource (decode thread) ──► FrameSink
//!   (ffmpeg)        (I420 frames)     pacing + looping + clock       (openh264 ──► VideoTrack)
//! ```

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod ffmpeg;
pub mod frame;
pub mod pacing;
pub mod source;
pub mod track;

pub use config::VideoConfig;
pub use decoder::{MediaOpener, StreamInfo, VideoDecoder};
pub use encoder::{H264SinkFactory, H264TrackSink, MediaBackend, SinkFactory};
pub use ffmpeg::FfmpegOpener;
pub use frame::{I420Frame, VideoFrame};
pub use pacing::{effective_fps, sanitize_fps, PacingSchedule, DEFAULT_FPS, MAX_FPS, MIN_FPS};
pub use source::{FrameSink, PlaybackClock, SourceConfig, VideoSource};
pub use track::VideoTrack;
