//! Registry configuration

use std::time::Duration;

use crate::media::VideoConfig;

/// Default period of the sync broadcaster
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the session registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How often playback position is pushed over data channels
    pub sync_interval: Duration,

    /// Shared stream settings
    pub video: VideoConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            video: VideoConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Set the sync broadcast interval (at least 1ms)
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn video(mut self, video: VideoConfig) -> Self {
        self.video = video;
        self
    }
}
