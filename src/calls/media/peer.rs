use async_trait::async_trait;
use peercall_core::types::{CandidateInit, SessionDescription, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::track::{LocalTrack, RemoteTrack, TrackKind};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error("no sender for {0} track")]
    NoSender(TrackKind),

    #[error("peer session closed")]
    Closed,

    #[error("peer session error: {0}")]
    Other(String),
}

/// Reachability-hint (STUN-class) server handed to the session object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerSessionConfig {
    pub session_id: SessionId,
    /// Id of the local participant owning this session object.
    pub local_id: String,
    pub ice_servers: Vec<IceServer>,
}

/// Connection state as reported by the session object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// Failed and disconnected both count as the remote going away.
    pub fn is_lost(self) -> bool {
        matches!(
            self,
            PeerConnectionState::Failed | PeerConnectionState::Disconnected
        )
    }
}

/// Notifications raised by the session object.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    RemoteTrack(RemoteTrack),
    LocalCandidate(CandidateInit),
    ConnectionStateChanged(PeerConnectionState),
}

/// The three callbacks registered on a session object at construction.
///
/// Every callback lands in the owning call's event queue, so implementations
/// may invoke them from any thread and from inside their own methods.
#[derive(Clone)]
pub struct PeerEventSink {
    deliver: Arc<dyn Fn(PeerEvent) + Send + Sync>,
}

impl fmt::Debug for PeerEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerEventSink").finish_non_exhaustive()
    }
}

impl PeerEventSink {
    pub fn new(deliver: impl Fn(PeerEvent) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn on_remote_track(&self, track: RemoteTrack) {
        (self.deliver)(PeerEvent::RemoteTrack(track));
    }

    pub fn on_local_candidate(&self, candidate: CandidateInit) {
        (self.deliver)(PeerEvent::LocalCandidate(candidate));
    }

    pub fn on_connection_state_change(&self, state: PeerConnectionState) {
        (self.deliver)(PeerEvent::ConnectionStateChanged(state));
    }
}

/// The underlying peer session object.
#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn add_track(&self, track: LocalTrack) -> Result<(), PeerError>;
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;
    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), PeerError>;
    /// Swaps the outbound track of the sender carrying `kind` media without
    /// renegotiating.
    async fn replace_track(&self, kind: TrackKind, track: LocalTrack) -> Result<(), PeerError>;
    async fn close(&self);
}

#[async_trait]
pub trait PeerSessionFactory: Send + Sync {
    async fn create(
        &self,
        config: PeerSessionConfig,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerSession>, PeerError>;
}
