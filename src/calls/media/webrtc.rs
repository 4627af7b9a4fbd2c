//! Peer session object backed by the `webrtc` crate.
//!
//! [`WebRtcPeerFactory`] builds one `RTCPeerConnection` per call and wires its
//! candidate, track and connection-state callbacks into the call's
//! [`PeerEventSink`]. Capture stays with the platform layer: every local
//! track gets an outbound sample track of its kind, reachable through
//! [`WebRtcPeer::outbound_track`], into which the platform writes encoded
//! frames.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use peercall_core::types::{CandidateInit, SdpKind, SessionDescription, SessionId};
use tokio::sync::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::peer::{
    IceServer, PeerConnectionState, PeerError, PeerEventSink, PeerSession, PeerSessionConfig,
    PeerSessionFactory,
};
use super::track::{LocalTrack, RemoteTrack, TrackKind};

impl From<webrtc::Error> for PeerError {
    fn from(e: webrtc::Error) -> Self {
        PeerError::Other(e.to_string())
    }
}

/// Creates [`WebRtcPeer`]s that share one codec and interceptor setup.
pub struct WebRtcPeerFactory {
    api: API,
}

impl WebRtcPeerFactory {
    /// Registers the default codecs (opus, VP8, ...) and interceptors.
    pub fn new() -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.set_ice_multicast_dns_mode(webrtc::ice::mdns::MulticastDnsMode::Disabled);

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();
        Ok(Self { api })
    }
}

#[async_trait]
impl PeerSessionFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        config: PeerSessionConfig,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerSession>, PeerError> {
        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.iter().map(rtc_ice_server).collect(),
            ..Default::default()
        };
        let connection = Arc::new(self.api.new_peer_connection(rtc_config).await?);
        wire_callbacks(&connection, &config.session_id, events);

        info!(
            "Created peer connection for call {} ({})",
            config.session_id, config.local_id
        );
        Ok(Arc::new(WebRtcPeer {
            connection,
            stream_id: format!("peercall-{}", config.session_id),
            outbound: Mutex::new(HashMap::new()),
        }))
    }
}

fn wire_callbacks(connection: &RTCPeerConnection, session_id: &SessionId, events: PeerEventSink) {
    let sink = events.clone();
    let sid = session_id.clone();
    connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = sink.clone();
        let sid = sid.clone();
        Box::pin(async move {
            // None marks the end of gathering.
            let Some(candidate) = candidate else {
                debug!("Candidate gathering finished for call {}", sid);
                return;
            };
            match candidate.to_json() {
                Ok(init) => sink.on_local_candidate(candidate_init(init)),
                Err(e) => warn!("Dropping unserializable candidate of call {}: {}", sid, e),
            }
        })
    }));

    let sink = events.clone();
    let sid = session_id.clone();
    connection.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let sink = sink.clone();
            let sid = sid.clone();
            Box::pin(async move {
                let Some(kind) = track_kind(track.kind()) else {
                    warn!("Ignoring remote track of unknown kind on call {}", sid);
                    return;
                };
                sink.on_remote_track(RemoteTrack {
                    id: track.id(),
                    kind,
                    stream_id: track.stream_id(),
                });
            })
        },
    ));

    let sink = events;
    let sid = session_id.clone();
    connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let sink = sink.clone();
        let sid = sid.clone();
        Box::pin(async move {
            debug!("Peer connection state for call {}: {}", sid, state);
            if let Some(state) = connection_state(state) {
                sink.on_connection_state_change(state);
            }
        })
    }));
}

struct Outbound {
    sender: Arc<RTCRtpSender>,
    track: Arc<TrackLocalStaticSample>,
}

/// One `RTCPeerConnection` plus the sample tracks feeding its senders.
pub struct WebRtcPeer {
    connection: Arc<RTCPeerConnection>,
    stream_id: String,
    outbound: Mutex<HashMap<TrackKind, Outbound>>,
}

impl WebRtcPeer {
    pub fn connection(&self) -> &Arc<RTCPeerConnection> {
        &self.connection
    }

    /// Sample track the platform writes `kind` frames into.
    pub async fn outbound_track(&self, kind: TrackKind) -> Option<Arc<TrackLocalStaticSample>> {
        self.outbound
            .lock()
            .await
            .get(&kind)
            .map(|outbound| Arc::clone(&outbound.track))
    }

    fn sample_track(&self, track: &LocalTrack) -> Arc<TrackLocalStaticSample> {
        Arc::new(TrackLocalStaticSample::new(
            codec_capability(track.kind()),
            track.id().to_string(),
            self.stream_id.clone(),
        ))
    }
}

#[async_trait]
impl PeerSession for WebRtcPeer {
    async fn add_track(&self, track: LocalTrack) -> Result<(), PeerError> {
        let sample = self.sample_track(&track);
        let sender = self
            .connection
            .add_track(Arc::clone(&sample) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        self.outbound.lock().await.insert(
            track.kind(),
            Outbound {
                sender,
                track: sample,
            },
        );
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let offer = self.connection.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self.connection.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.connection
            .set_local_description(rtc_description(desc)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.connection
            .set_remote_description(rtc_description(desc)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), PeerError> {
        self.connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| PeerError::InvalidCandidate(e.to_string()))
    }

    async fn replace_track(&self, kind: TrackKind, track: LocalTrack) -> Result<(), PeerError> {
        let mut outbound = self.outbound.lock().await;
        let current = outbound.get_mut(&kind).ok_or(PeerError::NoSender(kind))?;
        let sample = self.sample_track(&track);
        current
            .sender
            .replace_track(Some(
                Arc::clone(&sample) as Arc<dyn TrackLocal + Send + Sync>
            ))
            .await?;
        current.track = sample;
        debug!("Replaced outbound {} track with {}", kind, track.id());
        Ok(())
    }

    async fn close(&self) {
        self.outbound.lock().await.clear();
        if let Err(e) = self.connection.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
    }
}

fn rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, PeerError> {
    let converted = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    converted.map_err(|e| PeerError::InvalidDescription(e.to_string()))
}

fn candidate_init(init: RTCIceCandidateInit) -> CandidateInit {
    CandidateInit {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
    }
}

fn codec_capability(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

fn track_kind(kind: RTPCodecType) -> Option<TrackKind> {
    match kind {
        RTPCodecType::Audio => Some(TrackKind::Audio),
        RTPCodecType::Video => Some(TrackKind::Video),
        _ => None,
    }
}

fn connection_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}
