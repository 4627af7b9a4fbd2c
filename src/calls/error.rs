//! Call-related error types.

use peercall_core::store::StoreError;
use peercall_core::types::EndCallReason;
use thiserror::Error;

use super::media::{MediaError, PeerError};

#[derive(Debug, Error)]
pub enum CallError {
    #[error("media acquisition failed: {0}")]
    MediaAcquisitionFailed(#[from] MediaError),

    #[error("remote description already applied")]
    AlreadyApplied,

    /// The other side wrote the `ended` status.
    #[error("remote party hung up")]
    RemoteHangup,

    /// The session object reported failed or disconnected.
    #[error("connection lost")]
    ConnectionLost,

    #[error("no alternate camera available")]
    NoAlternateDevice,

    #[error("camera switch failed: {0}")]
    DeviceSwitchFailed(String),

    #[error("signaling write to {key} failed: {source}")]
    SignalingWriteFailed {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("signaling store error: {0}")]
    Store(#[from] StoreError),

    #[error("peer session error: {0}")]
    Peer(#[from] PeerError),

    #[error("negotiation error: {0}")]
    Negotiation(String),

    #[error("invalid invitation: {0}")]
    InvalidInvitation(String),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("call already ended")]
    Ended,
}

impl CallError {
    /// Reason recorded on the session when this error terminates a call.
    pub fn end_reason(&self) -> EndCallReason {
        match self {
            CallError::MediaAcquisitionFailed(_) => EndCallReason::MediaUnavailable,
            CallError::RemoteHangup => EndCallReason::RemoteHangup,
            CallError::ConnectionLost => EndCallReason::ConnectionLost,
            CallError::SignalingWriteFailed { .. } | CallError::Store(_) => {
                EndCallReason::SignalingFailed
            }
            _ => EndCallReason::NegotiationFailed,
        }
    }
}
