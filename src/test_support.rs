//! In-process doubles shared by unit tests
//!
//! A scripted peer factory stands in for webrtc-rs and a scripted decoder
//! stands in for ffmpeg, so negotiation and pacing run without network or
//! external binaries.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::error::{NegotiationError, ResourceError, Result};
use crate::media::{
    FrameSink, I420Frame, MediaOpener, PlaybackClock, SinkFactory, StreamInfo, VideoDecoder,
    VideoFrame, VideoTrack,
};
use crate::protocol::IceCandidate;
use crate::registry::{ClientId, SessionRegistry};
use crate::rtc::{
    MediaPeer, OnMessage, PeerEvents, PeerFactory, SdpKind, SessionDescription, SignalingState,
};
use crate::transport::{Outbound, TransportSession};

/// Smallest SDP the parser accepts
pub const TEST_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

/// Poll `condition` until it holds or `timeout` passes
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// `on_message` callback collecting parsed JSON
pub fn collector() -> (OnMessage, Arc<Mutex<Vec<serde_json::Value>>>) {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    let on_message: OnMessage = Arc::new(move |text: Arc<str>| {
        let value = serde_json::from_str(&text).unwrap();
        sink.lock().unwrap().push(value);
    });
    (on_message, messages)
}

/// Transport session reporting departures to `registry`
pub fn transport_for(registry: &Arc<SessionRegistry>, id: u64) -> Arc<TransportSession> {
    let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    Arc::new(TransportSession::new(id, addr, 64, Arc::downgrade(registry)))
}

/// Drain and parse every queued outbound message
pub async fn outbound_messages(transport: &TransportSession) -> Vec<serde_json::Value> {
    let mut messages = Vec::new();
    while transport.queued() > 0 {
        match transport.next_outbound().await {
            Outbound::Message(text) => {
                messages.push(serde_json::from_str(&text).unwrap());
                transport.complete_write();
            }
            Outbound::Close(_) => break,
        }
    }
    messages
}

/// Call recorded by [`MockPeer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    CreateOffer,
    CreateAnswer,
    SetRemote(SdpKind),
    AddIce(String),
    AddTrack,
    RemoveTrack,
    SendSync(String),
    Close,
}

/// Scripted peer that records every call
pub struct MockPeer {
    events: PeerEvents,
    signaling: Mutex<SignalingState>,
    calls: Mutex<Vec<PeerCall>>,
    remote_gate: Option<Arc<Semaphore>>,
    fail_remote: bool,
    answer_delay: Duration,
    sync_open: AtomicBool,
}

impl MockPeer {
    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Candidates applied through `add_ice_candidate`, in order
    pub fn applied_ice(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PeerCall::AddIce(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }

    pub fn set_sync_open(&self, open: bool) {
        self.sync_open.store(open, Ordering::SeqCst);
    }

    /// Fire a local ICE candidate event
    pub fn emit_ice(&self, candidate: &str) {
        (self.events.on_ice_candidate)(IceCandidate::new(candidate));
    }

    /// Change the signaling state without firing the event
    pub fn force_signaling(&self, state: SignalingState) {
        *self.signaling.lock().unwrap() = state;
    }

    /// Change the signaling state and fire the event
    pub fn set_signaling(&self, state: SignalingState) {
        self.force_signaling(state);
        (self.events.on_signaling_state_change)(state);
    }

    fn record(&self, call: PeerCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MediaPeer for MockPeer {
    fn signaling_state(&self) -> SignalingState {
        *self.signaling.lock().unwrap()
    }

    async fn create_offer(&self) -> Result<String> {
        self.record(PeerCall::CreateOffer);
        self.set_signaling(SignalingState::HaveLocalOffer);
        Ok(TEST_SDP.to_string())
    }

    async fn create_answer(&self) -> Result<String> {
        self.record(PeerCall::CreateAnswer);
        self.set_signaling(SignalingState::Stable);
        // webrtc-rs keeps working after firing the stable event
        if !self.answer_delay.is_zero() {
            tokio::time::sleep(self.answer_delay).await;
        }
        Ok(TEST_SDP.to_string())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if let Some(gate) = &self.remote_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.fail_remote {
            return Err(NegotiationError::RemoteDescription("scripted failure".into()).into());
        }
        self.record(PeerCall::SetRemote(description.kind));
        match description.kind {
            SdpKind::Offer => self.set_signaling(SignalingState::HaveRemoteOffer),
            SdpKind::Answer => self.set_signaling(SignalingState::Stable),
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(PeerCall::AddIce(candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, _track: &VideoTrack) -> Result<()> {
        self.record(PeerCall::AddTrack);
        Ok(())
    }

    async fn remove_track(&self) -> Result<()> {
        self.record(PeerCall::RemoveTrack);
        Ok(())
    }

    fn sync_channel_open(&self) -> bool {
        self.sync_open.load(Ordering::SeqCst)
    }

    async fn send_sync(&self, payload: &str) -> Result<()> {
        self.record(PeerCall::SendSync(payload.to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(PeerCall::Close);
        self.force_signaling(SignalingState::Closed);
        Ok(())
    }
}

/// Factory handing out [`MockPeer`]s
#[derive(Default)]
pub struct MockPeerFactory {
    peers: Mutex<Vec<(ClientId, Arc<MockPeer>)>>,
    remote_gate: Option<Arc<Semaphore>>,
    fail_remote: bool,
    answer_delay: Duration,
    fail_next: AtomicBool,
}

impl MockPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote descriptions block until a permit is added to the returned gate
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let factory = Self {
            remote_gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (factory, gate)
    }

    /// Every remote description is rejected
    pub fn failing_remote_descriptions(mut self) -> Self {
        self.fail_remote = true;
        self
    }

    /// `create_answer` returns `delay` after reporting the stable state
    pub fn with_answer_delay(mut self, delay: Duration) -> Self {
        self.answer_delay = delay;
        self
    }

    pub fn fail_next_create(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn peer(&self, client_id: ClientId) -> Option<Arc<MockPeer>> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| *id == client_id)
            .map(|(_, peer)| Arc::clone(peer))
    }
}

#[async_trait]
impl PeerFactory for MockPeerFactory {
    async fn create_peer(
        &self,
        client_id: ClientId,
        events: PeerEvents,
    ) -> Result<Arc<dyn MediaPeer>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(NegotiationError::PeerCreation("scripted failure".into()).into());
        }

        let peer = Arc::new(MockPeer {
            events,
            signaling: Mutex::new(SignalingState::Stable),
            calls: Mutex::new(Vec::new()),
            remote_gate: self.remote_gate.clone(),
            fail_remote: self.fail_remote,
            answer_delay: self.answer_delay,
            sync_open: AtomicBool::new(false),
        });
        self.peers
            .lock()
            .unwrap()
            .push((client_id, Arc::clone(&peer)));
        Ok(peer)
    }
}

/// Opener producing [`FakeDecoder`]s with a fixed number of tiny frames
pub struct FakeOpener {
    frames_per_cycle: u64,
    fps: Option<f64>,
    jitter: Vec<Duration>,
    open_delay: Duration,
    missing: bool,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    opens: AtomicUsize,
    seeks: Arc<AtomicU64>,
}

impl FakeOpener {
    pub fn new(frames_per_cycle: u64, fps: Option<f64>) -> Self {
        Self {
            frames_per_cycle,
            fps,
            jitter: Vec::new(),
            open_delay: Duration::ZERO,
            missing: false,
            live: Arc::new(AtomicUsize::new(0)),
            max_live: Arc::new(AtomicUsize::new(0)),
            opens: AtomicUsize::new(0),
            seeks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Every open fails with `FileNotFound`
    pub fn missing() -> Self {
        Self {
            missing: true,
            ..Self::new(0, None)
        }
    }

    /// Decode times cycled through per frame
    pub fn with_jitter(mut self, jitter: Vec<Duration>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Decoders currently alive
    pub fn live_decoders(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Most decoders ever alive at once
    pub fn max_live_decoders(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn seeks(&self) -> u64 {
        self.seeks.load(Ordering::SeqCst)
    }
}

impl MediaOpener for FakeOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoDecoder>> {
        if self.missing {
            return Err(ResourceError::FileNotFound(path.to_path_buf()).into());
        }
        std::thread::sleep(self.open_delay);

        self.opens.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(FakeDecoder {
            info: StreamInfo {
                width: 4,
                height: 2,
                avg_frame_rate: self.fps,
                nominal_frame_rate: None,
                codec: Some("fake".into()),
            },
            frames_per_cycle: self.frames_per_cycle,
            remaining: self.frames_per_cycle,
            jitter: self.jitter.clone(),
            reads: 0,
            live: Arc::clone(&self.live),
            seeks: Arc::clone(&self.seeks),
        }))
    }
}

/// Decoder yielding blank 4x2 pictures
pub struct FakeDecoder {
    info: StreamInfo,
    frames_per_cycle: u64,
    remaining: u64,
    jitter: Vec<Duration>,
    reads: usize,
    live: Arc<AtomicUsize>,
    seeks: Arc<AtomicU64>,
}

impl VideoDecoder for FakeDecoder {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_frame(&mut self) -> Result<Option<I420Frame>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        if !self.jitter.is_empty() {
            std::thread::sleep(self.jitter[self.reads % self.jitter.len()]);
        }
        self.reads += 1;
        self.remaining -= 1;

        let size = I420Frame::buffer_size(self.info.width, self.info.height);
        Ok(Some(I420Frame {
            width: self.info.width,
            height: self.info.height,
            data: Bytes::from(vec![0u8; size]),
        }))
    }

    fn seek_to_start(&mut self) -> Result<()> {
        self.remaining = self.frames_per_cycle;
        self.seeks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn flush(&mut self) {}
}

impl Drop for FakeDecoder {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One delivery observed by [`RecordingSink`]
#[derive(Debug, Clone)]
pub struct RecordedFrame {
    pub index: u64,
    pub timestamp: Duration,
    pub delivered_at: Instant,
    /// Clock reading at delivery, before the source updated it
    pub clock_before: f64,
}

/// Frame sink remembering every delivery
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<RecordedFrame>>,
    arrived: Condvar,
    clock: Option<Arc<PlaybackClock>>,
}

impl RecordingSink {
    pub fn with_clock(clock: Arc<PlaybackClock>) -> Self {
        Self {
            clock: Some(clock),
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.frames.lock().unwrap().clone()
    }

    /// Block until `count` frames arrived or `timeout` passed
    pub fn wait_for_frames(&self, count: usize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut frames = self.frames.lock().unwrap();
        while frames.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            frames = self.arrived.wait_timeout(frames, deadline - now).unwrap().0;
        }
    }
}

impl FrameSink for RecordingSink {
    fn on_frame(&self, frame: &VideoFrame) {
        let clock_before = self.clock.as_ref().map_or(0.0, |clock| clock.current_time());
        self.frames.lock().unwrap().push(RecordedFrame {
            index: frame.index,
            timestamp: frame.timestamp,
            delivered_at: Instant::now(),
            clock_before,
        });
        self.arrived.notify_all();
    }
}

/// Sink factory handing out fresh [`RecordingSink`]s
#[derive(Default)]
pub struct RecordingSinkFactory;

impl SinkFactory for RecordingSinkFactory {
    fn sink_for(&self, _track: &VideoTrack) -> Arc<dyn FrameSink> {
        Arc::new(RecordingSink::default())
    }
}
