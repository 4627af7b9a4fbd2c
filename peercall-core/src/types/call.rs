use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one call attempt.
///
/// Derived from the caller id and the creation timestamp so the responder can
/// recompute store keys from the invitation alone, while every attempt by the
/// same caller still gets a fresh id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn derive(caller_id: &str, created_at: DateTime<Utc>) -> Self {
        Self(format!("{}_{}", caller_id, created_at.timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A participant as known to the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            photo_url: None,
        }
    }

    pub fn with_photo(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }
}

/// Which side of the offer/answer exchange this party plays. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallRole {
    Initiator,
    Responder,
}

impl CallRole {
    pub fn is_initiator(self) -> bool {
        self == CallRole::Initiator
    }

    /// Kind of description this role produces locally.
    pub fn local_kind(self) -> SdpKind {
        match self {
            CallRole::Initiator => SdpKind::Offer,
            CallRole::Responder => SdpKind::Answer,
        }
    }

    /// Kind of description this role expects from the remote party.
    pub fn remote_kind(self) -> SdpKind {
        match self {
            CallRole::Initiator => SdpKind::Answer,
            CallRole::Responder => SdpKind::Offer,
        }
    }
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndCallReason {
    /// `end()` called locally.
    LocalHangup,
    /// The remote party wrote `ended` to the status key.
    RemoteHangup,
    /// The transport reported failed or disconnected.
    ConnectionLost,
    /// The responder declined the invitation.
    Rejected,
    /// No answer arrived before the ring timeout.
    NoAnswer,
    /// Local capture could not be acquired.
    MediaUnavailable,
    /// A store write was rejected.
    SignalingFailed,
    /// The underlying session object refused a description.
    NegotiationFailed,
}

impl fmt::Display for EndCallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndCallReason::LocalHangup => "local hangup",
            EndCallReason::RemoteHangup => "remote hangup",
            EndCallReason::ConnectionLost => "connection lost",
            EndCallReason::Rejected => "rejected",
            EndCallReason::NoAnswer => "no answer",
            EndCallReason::MediaUnavailable => "media unavailable",
            EndCallReason::SignalingFailed => "signaling failed",
            EndCallReason::NegotiationFailed => "negotiation failed",
        };
        f.write_str(s)
    }
}

/// Value of the shared `calls/{sid}/status` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// Offer or answer. The payload is opaque to this subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Candidate data as produced and consumed by the underlying session object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

impl CandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// One entry of the append-only `calls/{sid}/candidates/{owner}` collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub session_id: SessionId,
    pub owner_id: String,
    #[serde(flatten)]
    pub data: CandidateInit,
}

impl IceCandidate {
    pub fn new(session_id: SessionId, owner_id: impl Into<String>, data: CandidateInit) -> Self {
        Self {
            session_id,
            owner_id: owner_id.into(),
            data,
        }
    }
}

/// Payload placed in the responder's inbox slot to ring it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInvitation {
    pub session_id: SessionId,
    pub caller_id: String,
    pub caller_display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_photo: Option<String>,
    pub is_video: bool,
    pub offer: SessionDescription,
}

impl CallInvitation {
    pub fn new(
        session_id: SessionId,
        caller: &Identity,
        is_video: bool,
        offer: SessionDescription,
    ) -> Self {
        Self {
            session_id,
            caller_id: caller.id.clone(),
            caller_display_name: caller.display_name.clone(),
            caller_photo: caller.photo_url.clone(),
            is_video,
            offer,
        }
    }

    /// The caller as an identity reference, for the responder's `remoteParty`.
    pub fn caller(&self) -> Identity {
        Identity {
            id: self.caller_id.clone(),
            display_name: self.caller_display_name.clone(),
            photo_url: self.caller_photo.clone(),
        }
    }
}
