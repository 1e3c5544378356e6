//! Frame-rate selection and pacing schedule
//!
//! Frames are released against an absolute schedule anchored at the start of
//! each loop cycle. Decode jitter delays a frame but never shifts the ones
//! after it.

use std::time::{Duration, Instant};

/// Frame rate used when the container reports nothing usable
pub const DEFAULT_FPS: f64 = 30.0;

/// Lowest frame rate accepted from container metadata
pub const MIN_FPS: f64 = 1.0;

/// Highest frame rate accepted from container metadata
pub const MAX_FPS: f64 = 240.0;

fn in_range(fps: f64) -> bool {
    fps.is_finite() && (MIN_FPS..=MAX_FPS).contains(&fps)
}

/// Pick the frame rate to pace at
///
/// Prefers the average rate, then the nominal (real base) rate, then
/// `fallback`. Candidates outside `[MIN_FPS, MAX_FPS]` are ignored, and an
/// unusable fallback is replaced by [`sanitize_fps`].
pub fn effective_fps(avg_rate: Option<f64>, nominal_rate: Option<f64>, fallback: f64) -> f64 {
    [avg_rate, nominal_rate]
        .into_iter()
        .flatten()
        .find(|fps| in_range(*fps))
        .unwrap_or_else(|| sanitize_fps(fallback))
}

/// Clamp a configured frame rate into `[MIN_FPS, MAX_FPS]`
///
/// Zero, negative and non-finite values map to [`DEFAULT_FPS`].
pub fn sanitize_fps(fps: f64) -> f64 {
    if !fps.is_finite() || fps <= 0.0 {
        return DEFAULT_FPS;
    }
    fps.clamp(MIN_FPS, MAX_FPS)
}

/// Parse an ffmpeg-style rational (`"30000/1001"`, `"25"`)
///
/// Returns `None` for zero denominators and `"0/0"`.
pub fn parse_rate(text: &str) -> Option<f64> {
    let (num, den) = match text.split_once('/') {
        Some((num, den)) => (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?),
        None => (text.trim().parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

/// Absolute release schedule for one loop cycle
#[derive(Debug, Clone, Copy)]
pub struct PacingSchedule {
    start: Instant,
    fps: f64,
}

impl PacingSchedule {
    pub fn new(start: Instant, fps: f64) -> Self {
        Self { start, fps }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Duration of one frame
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }

    /// Media timestamp of frame `index`
    pub fn timestamp(&self, index: u64) -> Duration {
        Duration::from_secs_f64(index as f64 / self.fps)
    }

    /// Instant at which frame `index` is released
    pub fn target(&self, index: u64) -> Instant {
        self.start + self.timestamp(index)
    }

    /// Time left until frame `index` is due, zero if already late
    pub fn wait_for(&self, index: u64, now: Instant) -> Duration {
        self.target(index).saturating_duration_since(now)
    }
}
