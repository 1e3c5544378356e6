//! webrtc-rs backed peers

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use super::config::RtcConfig;
use super::peer::{
    MediaPeer, PeerEvents, PeerFactory, SdpKind, SessionDescription, SignalingState,
    SYNC_CHANNEL_LABEL,
};
use crate::error::{NegotiationError, Result};
use crate::media::VideoTrack;
use crate::protocol::IceCandidate;
use crate::registry::ClientId;

/// Creates webrtc-rs peer connections
pub struct WebRtcPeerFactory {
    api: API,
    config: RtcConfig,
}

impl WebRtcPeerFactory {
    /// Build the API with default codecs and interceptors
    pub fn new(config: RtcConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| NegotiationError::PeerCreation(e.to_string()))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| NegotiationError::PeerCreation(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, config })
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create_peer(
        &self,
        client_id: ClientId,
        events: PeerEvents,
    ) -> Result<Arc<dyn MediaPeer>> {
        let configuration = RTCConfiguration {
            ice_servers: self.config.rtc_ice_servers(),
            ..Default::default()
        };

        let pc = Arc::new(
            self.api
                .new_peer_connection(configuration)
                .await
                .map_err(|e| NegotiationError::PeerCreation(e.to_string()))?,
        );
        let events = Arc::new(events);

        let ice_events = Arc::clone(&events);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = Arc::clone(&ice_events);
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => (events.on_ice_candidate)(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                    }),
                    Err(e) => {
                        tracing::warn!(client = %client_id, error = %e, "Unserializable ICE candidate")
                    }
                }
            })
        }));

        let state_events = Arc::clone(&events);
        pc.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
            let events = Arc::clone(&state_events);
            Box::pin(async move {
                (events.on_signaling_state_change)(SignalingState::from(state));
            })
        }));

        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let channel = pc
            .create_data_channel(SYNC_CHANNEL_LABEL, Some(init))
            .await
            .map_err(|e| NegotiationError::DataChannel(e.to_string()))?;
        watch_channel(client_id, &channel, &events);

        let peer = Arc::new(WebRtcPeer {
            client_id,
            pc: Arc::clone(&pc),
            channels: Mutex::new(vec![channel]),
            video_sender: tokio::sync::Mutex::new(None),
        });

        // Browsers may open their own sync channel as well
        let remote_peer: Weak<WebRtcPeer> = Arc::downgrade(&peer);
        let channel_events = Arc::clone(&events);
        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let peer = remote_peer.clone();
            let events = Arc::clone(&channel_events);
            Box::pin(async move {
                if channel.label() != SYNC_CHANNEL_LABEL {
                    tracing::debug!(client = %client_id, label = channel.label(), "Ignoring data channel");
                    return;
                }
                if let Some(peer) = peer.upgrade() {
                    watch_channel(client_id, &channel, &events);
                    peer.lock_channels().push(channel);
                }
            })
        }));

        tracing::debug!(client = %client_id, "Peer connection created");
        Ok(peer)
    }
}

fn watch_channel(client_id: ClientId, channel: &Arc<RTCDataChannel>, events: &Arc<PeerEvents>) {
    channel.on_open(Box::new(move || {
        Box::pin(async move {
            tracing::debug!(client = %client_id, "Sync channel open");
        })
    }));

    let events = Arc::clone(events);
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let text = String::from_utf8_lossy(&msg.data).into_owned();
        (events.on_data_channel_message)(text);
        Box::pin(async {})
    }));
}

/// Peer backed by an `RTCPeerConnection`
pub struct WebRtcPeer {
    client_id: ClientId,
    pc: Arc<RTCPeerConnection>,
    channels: Mutex<Vec<Arc<RTCDataChannel>>>,
    video_sender: tokio::sync::Mutex<Option<Arc<RTCRtpSender>>>,
}

impl WebRtcPeer {
    fn lock_channels(&self) -> std::sync::MutexGuard<'_, Vec<Arc<RTCDataChannel>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_channel(&self) -> Option<Arc<RTCDataChannel>> {
        self.lock_channels()
            .iter()
            .find(|c| c.ready_state() == RTCDataChannelState::Open)
            .cloned()
    }
}

#[async_trait]
impl MediaPeer for WebRtcPeer {
    fn signaling_state(&self) -> SignalingState {
        SignalingState::from(self.pc.signaling_state())
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| NegotiationError::LocalDescription(e.to_string()))?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| NegotiationError::LocalDescription(e.to_string()))?;
        Ok(sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| NegotiationError::LocalDescription(e.to_string()))?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| NegotiationError::LocalDescription(e.to_string()))?;
        Ok(sdp)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| NegotiationError::InvalidSdp(e.to_string()))?;

        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| NegotiationError::RemoteDescription(e.to_string()).into())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| NegotiationError::IceCandidate(e.to_string()).into())
    }

    async fn add_track(&self, track: &VideoTrack) -> Result<()> {
        let mut slot = self.video_sender.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let transceiver = self
            .pc
            .add_transceiver_from_track(
                track.as_track_local(),
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| NegotiationError::Track(e.to_string()))?;
        let sender = transceiver.sender().await;

        // RTCP has to be read for interceptors (NACK, reports) to work
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        *slot = Some(sender);
        tracing::debug!(client = %self.client_id, track = track.id(), "Video track added");
        Ok(())
    }

    async fn remove_track(&self) -> Result<()> {
        let sender = self.video_sender.lock().await.take();
        if let Some(sender) = sender {
            self.pc
                .remove_track(&sender)
                .await
                .map_err(|e| NegotiationError::Track(e.to_string()))?;
            tracing::debug!(client = %self.client_id, "Video track removed");
        }
        Ok(())
    }

    fn sync_channel_open(&self) -> bool {
        self.open_channel().is_some()
    }

    async fn send_sync(&self, payload: &str) -> Result<()> {
        let channel = self.open_channel().ok_or(NegotiationError::DataChannel(
            "sync channel not open".into(),
        ))?;
        channel
            .send_text(payload.to_owned())
            .await
            .map_err(|e| NegotiationError::DataChannel(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let channels: Vec<_> = self.lock_channels().drain(..).collect();
        for channel in channels {
            let _ = channel.close().await;
        }
        self.pc
            .close()
            .await
            .map_err(|e| NegotiationError::PeerCreation(e.to_string()).into())
    }
}
