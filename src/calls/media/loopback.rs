//! In-process capture devices and peer sessions.
//!
//! Two [`LoopbackPeer`]s never exchange packets. Each one considers itself
//! connected once it holds a local description, a remote description and at
//! least one applied remote candidate, which is exactly the point where a
//! real transport would start connectivity checks. That is enough to drive
//! the whole signaling flow end to end inside one process.

use async_trait::async_trait;
use log::debug;
use peercall_core::types::{CandidateInit, SdpKind, SessionDescription};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::devices::{MediaConstraints, MediaDevices, MediaError, VideoDeviceInfo};
use super::peer::{
    PeerConnectionState, PeerError, PeerEventSink, PeerSession, PeerSessionConfig,
    PeerSessionFactory,
};
use super::track::{LocalTrack, MediaStream, MediaTrack, RemoteTrack, TrackKind};

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_PORT: AtomicU64 = AtomicU64::new(50_000);

#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    device_id: Option<String>,
    enabled: AtomicBool,
    live: AtomicBool,
}

impl FakeTrack {
    pub fn new(kind: TrackKind, device_id: Option<String>) -> Self {
        Self {
            id: format!("{}-{}", kind, NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            device_id,
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
        }
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        self.live.store(false, Ordering::Relaxed);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }
}

/// Capture devices backed by [`FakeTrack`]s.
///
/// Every track handed out is remembered so callers can check that capture
/// was released.
#[derive(Debug, Default)]
pub struct LoopbackDevices {
    cameras: Mutex<Vec<VideoDeviceInfo>>,
    deny_permission: AtomicBool,
    unavailable: Mutex<HashSet<String>>,
    acquire_delay: Mutex<Option<Duration>>,
    issued: Mutex<Vec<Arc<FakeTrack>>>,
}

impl LoopbackDevices {
    pub fn new(cameras: Vec<VideoDeviceInfo>) -> Self {
        Self {
            cameras: Mutex::new(cameras),
            ..Default::default()
        }
    }

    /// `count` cameras named `cam-0`, `cam-1`, ...
    pub fn with_cameras(count: usize) -> Self {
        Self::new(
            (0..count)
                .map(|i| VideoDeviceInfo::new(format!("cam-{}", i), format!("Camera {}", i)))
                .collect(),
        )
    }

    pub fn set_permission_denied(&self, denied: bool) {
        self.deny_permission.store(denied, Ordering::Relaxed);
    }

    pub fn set_unavailable(&self, device_id: &str) {
        self.unavailable
            .lock()
            .unwrap()
            .insert(device_id.to_string());
    }

    pub fn set_acquire_delay(&self, delay: Option<Duration>) {
        *self.acquire_delay.lock().unwrap() = delay;
    }

    pub fn issued_tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.issued.lock().unwrap().clone()
    }

    pub fn live_tracks(&self) -> usize {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_live())
            .count()
    }

    fn issue(&self, kind: TrackKind, device_id: Option<String>) -> LocalTrack {
        let track = Arc::new(FakeTrack::new(kind, device_id));
        self.issued.lock().unwrap().push(Arc::clone(&track));
        track
    }
}

#[async_trait]
impl MediaDevices for LoopbackDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, MediaError> {
        let delay = *self.acquire_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.deny_permission.load(Ordering::Relaxed) {
            return Err(MediaError::PermissionDenied(
                "capture blocked by user".to_string(),
            ));
        }

        let camera = if constraints.video {
            let cameras = self.cameras.lock().unwrap();
            let camera = match &constraints.video_device_id {
                Some(id) => cameras.iter().find(|c| &c.device_id == id).cloned(),
                None => cameras.first().cloned(),
            };
            let camera = camera.ok_or_else(|| MediaError::NoDevice("no camera".to_string()))?;
            if self.unavailable.lock().unwrap().contains(&camera.device_id) {
                return Err(MediaError::DeviceUnavailable(camera.device_id));
            }
            Some(camera)
        } else {
            None
        };

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(self.issue(TrackKind::Audio, Some("mic-0".to_string())));
        }
        if let Some(camera) = camera {
            tracks.push(self.issue(TrackKind::Video, Some(camera.device_id)));
        }
        Ok(MediaStream::new(tracks))
    }

    async fn enumerate_video_devices(&self) -> Result<Vec<VideoDeviceInfo>, MediaError> {
        Ok(self.cameras.lock().unwrap().clone())
    }
}

#[derive(Debug)]
struct PeerState {
    tracks: Vec<LocalTrack>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_sets: usize,
    applied: Vec<CandidateInit>,
    replaced: Vec<(TrackKind, String)>,
    connection: PeerConnectionState,
    gathered: bool,
    closed: bool,
}

/// In-process peer session. See the module docs for when it connects.
pub struct LoopbackPeer {
    config: PeerSessionConfig,
    events: PeerEventSink,
    auto_connect: bool,
    state: Mutex<PeerState>,
}

impl LoopbackPeer {
    fn new(config: PeerSessionConfig, events: PeerEventSink, auto_connect: bool) -> Self {
        Self {
            config,
            events,
            auto_connect,
            state: Mutex::new(PeerState {
                tracks: Vec::new(),
                local: None,
                remote: None,
                remote_sets: 0,
                applied: Vec::new(),
                replaced: Vec::new(),
                connection: PeerConnectionState::New,
                gathered: false,
                closed: false,
            }),
        }
    }

    pub fn config(&self) -> &PeerSessionConfig {
        &self.config
    }

    /// Forces a connection-state change, as a flaky network would.
    pub fn set_connection_state(&self, state: PeerConnectionState) {
        self.state.lock().unwrap().connection = state;
        self.events.on_connection_state_change(state);
    }

    pub fn connection_state(&self) -> PeerConnectionState {
        self.state.lock().unwrap().connection
    }

    /// How many times a remote description was accepted.
    pub fn remote_description_sets(&self) -> usize {
        self.state.lock().unwrap().remote_sets
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().remote.clone()
    }

    pub fn applied_candidates(&self) -> Vec<CandidateInit> {
        self.state.lock().unwrap().applied.clone()
    }

    /// `(kind, new track id)` for every track replacement.
    pub fn replaced_tracks(&self) -> Vec<(TrackKind, String)> {
        self.state.lock().unwrap().replaced.clone()
    }

    pub fn sending_track(&self, kind: TrackKind) -> Option<LocalTrack> {
        self.state
            .lock()
            .unwrap()
            .tracks
            .iter()
            .find(|t| t.kind() == kind)
            .cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn describe(&self, state: &PeerState, kind: SdpKind) -> SessionDescription {
        let mut sdp = format!(
            "v=0\r\no={} 1 1 IN IP4 127.0.0.1\r\ns={}\r\nt=0 0\r\n",
            self.config.local_id, self.config.session_id
        );
        for track in &state.tracks {
            let payload = match track.kind() {
                TrackKind::Audio => 111,
                TrackKind::Video => 96,
            };
            sdp.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF {}\r\na=msid:{} {}\r\n",
                track.kind(),
                payload,
                self.config.local_id,
                track.id()
            ));
        }
        SessionDescription { kind, sdp }
    }

    fn ensure_open(state: &PeerState) -> Result<(), PeerError> {
        if state.closed {
            Err(PeerError::Closed)
        } else {
            Ok(())
        }
    }

    fn maybe_connect(&self) {
        if !self.auto_connect {
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            let ready = !state.closed
                && state.local.is_some()
                && state.remote.is_some()
                && !state.applied.is_empty();
            if !ready || state.connection == PeerConnectionState::Connected {
                return;
            }
            state.connection = PeerConnectionState::Connected;
        }
        debug!("Loopback peer {} connected", self.config.local_id);
        self.events
            .on_connection_state_change(PeerConnectionState::Connecting);
        self.events
            .on_connection_state_change(PeerConnectionState::Connected);
    }
}

fn remote_tracks(desc: &SessionDescription) -> Vec<RemoteTrack> {
    let owner = desc
        .sdp
        .lines()
        .find_map(|l| l.strip_prefix("o="))
        .and_then(|o| o.split_whitespace().next())
        .unwrap_or("remote")
        .to_string();
    desc.sdp
        .lines()
        .filter_map(|line| {
            let kind = if line.starts_with("m=audio") {
                TrackKind::Audio
            } else if line.starts_with("m=video") {
                TrackKind::Video
            } else {
                return None;
            };
            Some(RemoteTrack {
                id: format!("{}-{}", owner, kind),
                kind,
                stream_id: owner.clone(),
            })
        })
        .collect()
}

#[async_trait]
impl PeerSession for LoopbackPeer {
    async fn add_track(&self, track: LocalTrack) -> Result<(), PeerError> {
        let mut state = self.state.lock().unwrap();
        Self::ensure_open(&state)?;
        state.tracks.push(track);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let state = self.state.lock().unwrap();
        Self::ensure_open(&state)?;
        Ok(self.describe(&state, SdpKind::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let state = self.state.lock().unwrap();
        Self::ensure_open(&state)?;
        match &state.remote {
            Some(remote) if remote.kind == SdpKind::Offer => {
                Ok(self.describe(&state, SdpKind::Answer))
            }
            _ => Err(PeerError::InvalidDescription(
                "cannot answer without a remote offer".to_string(),
            )),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let gather = {
            let mut state = self.state.lock().unwrap();
            Self::ensure_open(&state)?;
            state.local = Some(desc);
            if state.connection == PeerConnectionState::New {
                state.connection = PeerConnectionState::Connecting;
            }
            !std::mem::replace(&mut state.gathered, true)
        };

        if gather {
            // Trickle: candidates show up after the local description is set.
            for component in 1..=2u64 {
                let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
                self.events.on_local_candidate(CandidateInit {
                    candidate: format!(
                        "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
                        component, port
                    ),
                    sdp_mid: Some("0".to_string()),
                    sdp_mline_index: Some(0),
                });
            }
        }
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        if !desc.sdp.starts_with("v=0") {
            return Err(PeerError::InvalidDescription(
                "missing version line".to_string(),
            ));
        }
        {
            let mut state = self.state.lock().unwrap();
            Self::ensure_open(&state)?;
            if let Some(local) = &state.local {
                if local.kind == desc.kind {
                    return Err(PeerError::InvalidDescription(format!(
                        "remote {} after local {}",
                        desc.kind, local.kind
                    )));
                }
            }
            state.remote_sets += 1;
            state.remote = Some(desc.clone());
        }

        for track in remote_tracks(&desc) {
            self.events.on_remote_track(track);
        }
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), PeerError> {
        {
            let mut state = self.state.lock().unwrap();
            Self::ensure_open(&state)?;
            if state.remote.is_none() {
                return Err(PeerError::InvalidCandidate(
                    "no remote description".to_string(),
                ));
            }
            if !candidate.candidate.starts_with("candidate:") {
                return Err(PeerError::InvalidCandidate(candidate.candidate));
            }
            state.applied.push(candidate);
        }
        self.maybe_connect();
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: LocalTrack) -> Result<(), PeerError> {
        let mut state = self.state.lock().unwrap();
        Self::ensure_open(&state)?;
        let new_id = track.id().to_string();
        let slot = state
            .tracks
            .iter_mut()
            .find(|t| t.kind() == kind)
            .ok_or(PeerError::NoSender(kind))?;
        *slot = track;
        state.replaced.push((kind, new_id));
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.connection = PeerConnectionState::Closed;
    }
}

/// Creates [`LoopbackPeer`]s and keeps them around for inspection.
#[derive(Default)]
pub struct LoopbackPeerFactory {
    manual: bool,
    peers: Mutex<Vec<Arc<LoopbackPeer>>>,
}

impl LoopbackPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peers that never report a connection on their own; drive them with
    /// [`LoopbackPeer::set_connection_state`].
    pub fn manual() -> Self {
        Self {
            manual: true,
            ..Default::default()
        }
    }

    pub fn peers(&self) -> Vec<Arc<LoopbackPeer>> {
        self.peers.lock().unwrap().clone()
    }

    /// The session object `local_id` created for `session_id`.
    pub fn peer(&self, session_id: &str, local_id: &str) -> Option<Arc<LoopbackPeer>> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .find(|p| {
                p.config.session_id.as_str() == session_id && p.config.local_id == local_id
            })
            .cloned()
    }
}

#[async_trait]
impl PeerSessionFactory for LoopbackPeerFactory {
    async fn create(
        &self,
        config: PeerSessionConfig,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerSession>, PeerError> {
        debug!(
            "Creating loopback peer for {} in {} ({} ice servers)",
            config.local_id,
            config.session_id,
            config.ice_servers.len()
        );
        let peer = Arc::new(LoopbackPeer::new(config, events, !self.manual));
        self.peers.lock().unwrap().push(Arc::clone(&peer));
        Ok(peer)
    }
}
