//! Statistics snapshots for the registry, the shared stream and the server

use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Shared stream statistics
#[derive(Debug, Clone)]
pub struct StreamStats {
    /// File being streamed
    pub file_path: PathBuf,
    /// Decode thread still running
    pub running: bool,
    /// Playback flag published by the source
    pub is_playing: bool,
    /// Seconds into the current loop cycle
    pub current_time: f64,
    /// Frames delivered across all cycles
    pub frames_emitted: u64,
    /// Completed loop restarts
    pub loops: u64,
    /// Frame rate the source paces at
    pub fps: f64,
    /// When the stream was started
    pub started_at: Instant,
}

impl StreamStats {
    /// Get duration since the stream started
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Frames per second actually delivered since start
    pub fn delivered_fps(&self) -> f64 {
        let secs = self.uptime().as_secs_f64();
        if secs > 0.0 {
            self.frames_emitted as f64 / secs
        } else {
            0.0
        }
    }
}

/// Registry-wide statistics
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Joined clients
    pub clients: usize,
    /// Peer contexts held by the negotiation engine
    pub peers: usize,
    /// Peers currently receiving the shared track
    pub attached_peers: usize,
    /// Shared stream, if one is running
    pub stream: Option<StreamStats>,
}

impl RegistryStats {
    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Current active connections
    pub active_connections: u64,
    /// Connections refused by the connection limit
    pub rejected_connections: u64,
    /// Uptime
    pub uptime: Duration,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_stats(frames_emitted: u64, started_at: Instant) -> StreamStats {
        StreamStats {
            file_path: PathBuf::from("movie.mp4"),
            running: true,
            is_playing: true,
            current_time: 1.5,
            frames_emitted,
            loops: 0,
            fps: 30.0,
            started_at,
        }
    }

    #[test]
    fn test_registry_stats_default() {
        let stats = RegistryStats::default();
        assert_eq!(stats.clients, 0);
        assert_eq!(stats.peers, 0);
        assert_eq!(stats.attached_peers, 0);
        assert!(!stats.has_stream());
    }

    #[test]
    fn test_delivered_fps() {
        let started_at = Instant::now() - Duration::from_secs(10);
        let stats = stream_stats(300, started_at);

        let fps = stats.delivered_fps();
        assert!(fps > 29.0 && fps <= 30.0, "fps was {}", fps);
        assert!(stats.uptime() >= Duration::from_secs(10));
    }

    #[test]
    fn test_delivered_fps_without_frames() {
        let stats = stream_stats(0, Instant::now());
        assert_eq!(stats.delivered_fps(), 0.0);
    }

    #[test]
    fn test_server_stats_new() {
        let stats = ServerStats::new();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.rejected_connections, 0);
    }
}
