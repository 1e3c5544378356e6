//! File-backed video source
//!
//! Runs the decode/pace loop on a dedicated OS thread:
//!
//! ```text
//!   read_frame() ─► stamp index/fps ─► sleep until start + index/fps ─► sink.on_frame()
//!        │                                                                   │
//!        └─ end of stream ─► (looping) seek_to_start + flush + reset ◄───────┘
//! ```
//!
//! The playback clock is published through atomics so the sync broadcaster
//! can read it without touching the decode thread.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::decoder::{MediaOpener, VideoDecoder};
use super::frame::VideoFrame;
use super::pacing::{effective_fps, sanitize_fps, PacingSchedule, DEFAULT_FPS};
use crate::error::{ResourceError, Result};

/// Receives paced frames on the decode thread
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &VideoFrame);
}

/// What to play
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub file_path: PathBuf,
    /// Restart from the beginning at end of stream
    pub looping: bool,
    /// Frame rate used when the container reports none
    pub default_fps: f64,
}

impl SourceConfig {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            looping: true,
            default_fps: DEFAULT_FPS,
        }
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn default_fps(mut self, fps: f64) -> Self {
        self.default_fps = sanitize_fps(fps);
        self
    }
}

/// Lock-free playback position shared with readers on other threads
#[derive(Debug, Default)]
pub struct PlaybackClock {
    current_time_bits: AtomicU64,
    playing: AtomicBool,
    frames_emitted: AtomicU64,
    loops: AtomicU64,
}

impl PlaybackClock {
    /// Seconds into the current loop cycle
    pub fn current_time(&self) -> f64 {
        f64::from_bits(self.current_time_bits.load(Ordering::Acquire))
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Total frames delivered across all cycles
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::Relaxed)
    }

    /// Completed loop restarts
    pub fn loops(&self) -> u64 {
        self.loops.load(Ordering::Relaxed)
    }

    fn set_time(&self, seconds: f64) {
        self.current_time_bits
            .store(seconds.to_bits(), Ordering::Release);
    }

    fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }
}

/// Decodes one file into paced frames until stopped
pub struct VideoSource {
    config: SourceConfig,
    fps: f64,
    clock: Arc<PlaybackClock>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl VideoSource {
    /// Open the file and start the decode thread
    ///
    /// Blocks while the file is opened. If opening fails nothing is started.
    pub fn start(
        config: SourceConfig,
        opener: &dyn MediaOpener,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Self> {
        Self::start_with_clock(config, opener, sink, Arc::new(PlaybackClock::default()))
    }

    /// Like [`VideoSource::start`], publishing into an existing clock
    pub fn start_with_clock(
        config: SourceConfig,
        opener: &dyn MediaOpener,
        sink: Arc<dyn FrameSink>,
        clock: Arc<PlaybackClock>,
    ) -> Result<Self> {
        let decoder = opener.open(&config.file_path)?;
        let info = decoder.info();
        let fps = effective_fps(info.avg_frame_rate, info.nominal_frame_rate, config.default_fps);

        tracing::info!(
            path = %config.file_path.display(),
            width = info.width,
            height = info.height,
            fps = fps,
            looping = config.looping,
            "Video source starting"
        );

        let running = Arc::new(AtomicBool::new(true));
        clock.set_time(0.0);
        clock.set_playing(true);

        let frame_loop = FrameLoop {
            decoder,
            sink,
            fps,
            looping: config.looping,
            clock: Arc::clone(&clock),
            running: Arc::clone(&running),
        };

        let worker = thread::Builder::new()
            .name("video-source".into())
            .spawn(move || frame_loop.run())
            .map_err(|e| ResourceError::Worker(e.to_string()))?;

        Ok(Self {
            config,
            fps,
            clock,
            running,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stop the decode thread and wait for it to exit
    ///
    /// No frame reaches the sink after this returns. Safe to call twice.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!(path = %self.config.file_path.display(), "Video source thread panicked");
            }
            tracing::info!(path = %self.config.file_path.display(), "Video source stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn current_time(&self) -> f64 {
        self.clock.current_time()
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }

    pub fn clock(&self) -> &Arc<PlaybackClock> {
        &self.clock
    }

    /// Frame rate the source paces at
    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        self.stop();
    }
}

struct FrameLoop {
    decoder: Box<dyn VideoDecoder>,
    sink: Arc<dyn FrameSink>,
    fps: f64,
    looping: bool,
    clock: Arc<PlaybackClock>,
    running: Arc<AtomicBool>,
}

/// Marks the source finished when the decode thread exits, panics included
struct Finished {
    running: Arc<AtomicBool>,
    clock: Arc<PlaybackClock>,
}

impl Drop for Finished {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.clock.set_playing(false);
    }
}

impl FrameLoop {
    fn run(mut self) {
        let _finished = Finished {
            running: Arc::clone(&self.running),
            clock: Arc::clone(&self.clock),
        };

        while self.is_running() {
            let delivered = self.play_cycle();

            if !self.is_running() || !self.looping {
                break;
            }
            if delivered == 0 {
                tracing::warn!("Cycle produced no frames, stopping video source");
                break;
            }

            if let Err(e) = self.decoder.seek_to_start() {
                tracing::warn!(error = %e, "Rewind failed, stopping video source");
                break;
            }
            self.decoder.flush();
            self.clock.set_time(0.0);
            self.clock.loops.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(loops = self.clock.loops(), "Video source looped");
        }
    }

    /// Deliver frames until end of stream or stop, returning how many went out
    fn play_cycle(&mut self) -> u64 {
        let schedule = PacingSchedule::new(Instant::now(), self.fps);
        let duration = schedule.interval();
        let mut index = 0u64;

        while self.is_running() {
            let picture = match self.decoder.read_frame() {
                Ok(Some(picture)) => picture,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, frame = index, "Decode failed, ending cycle");
                    break;
                }
            };

            let wait = schedule.wait_for(index, Instant::now());
            if !wait.is_zero() {
                sleep_while_running(wait, &self.running);
            }
            if !self.is_running() {
                break;
            }

            let frame = VideoFrame {
                index,
                timestamp: schedule.timestamp(index),
                duration,
                picture,
            };
            self.sink.on_frame(&frame);

            self.clock.set_time(frame.timestamp.as_secs_f64());
            self.clock.frames_emitted.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(frame = index, "Frame delivered");
            index += 1;
        }

        index
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Sleep in short slices so a stop request is noticed promptly
fn sleep_while_running(total: Duration, running: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(20);

    let deadline = Instant::now() + total;
    loop {
        let now = Instant::now();
        if now >= deadline || !running.load(Ordering::Acquire) {
            return;
        }
        thread::sleep((deadline - now).min(SLICE));
    }
}
