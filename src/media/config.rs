//! Video pipeline configuration

use std::path::PathBuf;

use super::pacing::{sanitize_fps, DEFAULT_FPS};

/// Decode and encode settings for the shared stream
#[derive(Debug, Clone, PartialEq)]
pub struct VideoConfig {
    /// Frame rate used when the file reports none within range
    pub default_fps: f64,

    /// Restart files from the beginning at end of stream
    pub looping: bool,

    /// Target encoder bitrate in bits per second
    pub bitrate_bps: u32,

    /// Frames between forced keyframes (0 disables periodic keyframes)
    pub keyframe_interval: u32,

    /// `ffmpeg` executable
    pub ffmpeg_path: PathBuf,

    /// `ffprobe` executable
    pub ffprobe_path: PathBuf,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            default_fps: DEFAULT_FPS,
            looping: true,
            bitrate_bps: 2_000_000,
            keyframe_interval: 60, // 2s at 30fps
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

impl VideoConfig {
    /// Fallback frame rate, clamped to 1..=240 (invalid values mean 30)
    pub fn default_fps(mut self, fps: f64) -> Self {
        self.default_fps = sanitize_fps(fps);
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn bitrate(mut self, bps: u32) -> Self {
        self.bitrate_bps = bps;
        self
    }

    pub fn keyframe_interval(mut self, frames: u32) -> Self {
        self.keyframe_interval = frames;
        self
    }

    /// Use specific ffmpeg/ffprobe binaries instead of `$PATH` lookup
    pub fn ffmpeg(mut self, ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = ffmpeg.into();
        self.ffprobe_path = ffprobe.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VideoConfig::default();
        assert_eq!(config.default_fps, 30.0);
        assert!(config.looping);
        assert_eq!(config.keyframe_interval, 60);
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_builder() {
        let config = VideoConfig::default()
            .default_fps(24.0)
            .looping(false)
            .bitrate(500_000)
            .keyframe_interval(48)
            .ffmpeg("/opt/ff/ffmpeg", "/opt/ff/ffprobe");

        assert_eq!(config.default_fps, 24.0);
        assert!(!config.looping);
        assert_eq!(config.bitrate_bps, 500_000);
        assert_eq!(config.keyframe_interval, 48);
        assert_eq!(config.ffprobe_path, PathBuf::from("/opt/ff/ffprobe"));
    }

    #[test]
    fn test_default_fps_sanitized() {
        assert_eq!(VideoConfig::default().default_fps(0.0).default_fps, DEFAULT_FPS);
        assert_eq!(VideoConfig::default().default_fps(f64::NAN).default_fps, DEFAULT_FPS);
        assert_eq!(VideoConfig::default().default_fps(500.0).default_fps, 240.0);
    }
}
