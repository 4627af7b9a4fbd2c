//! Call state machine implementation.

use chrono::{DateTime, Utc};
use peercall_core::types::{CallInvitation, CallRole, EndCallReason, Identity, SessionId};
use serde::Serialize;

use super::media::{MediaStream, RemoteTrack};

/// Lifecycle of one call attempt.
///
/// `Negotiating -> Active` is the only forward step; `Ended` is terminal and
/// reachable from every other state. `Failed` keeps a setup failure on screen
/// until the call is torn down.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub enum CallStatus {
    /// Capture, descriptions and candidates are being exchanged.
    #[default]
    Negotiating,
    /// The transport reported a connection.
    Active { connected_at: DateTime<Utc> },
    /// Setup failed; the call was never established.
    Failed {
        reason: EndCallReason,
        message: String,
        failed_at: DateTime<Utc>,
    },
    Ended {
        reason: EndCallReason,
        ended_at: DateTime<Utc>,
        duration_secs: Option<i64>,
    },
}

impl CallStatus {
    pub fn is_negotiating(&self) -> bool {
        matches!(self, Self::Negotiating)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended { .. })
    }

    pub fn end_reason(&self) -> Option<EndCallReason> {
        match self {
            Self::Ended { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// State transitions for calls.
#[derive(Debug, Clone)]
pub enum CallTransition {
    Connected,
    Failed {
        reason: EndCallReason,
        message: String,
    },
    Terminated {
        reason: EndCallReason,
    },
}

/// One call attempt as seen by the local party.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CallSession {
    pub session_id: SessionId,
    pub role: CallRole,
    pub remote_party: Identity,
    pub is_video: bool,
    pub status: CallStatus,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new_outgoing(
        session_id: SessionId,
        remote_party: Identity,
        is_video: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            role: CallRole::Initiator,
            remote_party,
            is_video,
            status: CallStatus::Negotiating,
            created_at,
        }
    }

    pub fn new_incoming(invitation: &CallInvitation) -> Self {
        Self {
            session_id: invitation.session_id.clone(),
            role: CallRole::Responder,
            remote_party: invitation.caller(),
            is_video: invitation.is_video,
            status: CallStatus::Negotiating,
            created_at: Utc::now(),
        }
    }

    pub fn is_initiator(&self) -> bool {
        self.role.is_initiator()
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(
        &mut self,
        transition: CallTransition,
    ) -> Result<(), InvalidTransition> {
        let new_status = match (&self.status, transition) {
            (CallStatus::Negotiating, CallTransition::Connected) => CallStatus::Active {
                connected_at: Utc::now(),
            },
            (CallStatus::Negotiating, CallTransition::Failed { reason, message }) => {
                CallStatus::Failed {
                    reason,
                    message,
                    failed_at: Utc::now(),
                }
            }
            (CallStatus::Active { connected_at }, CallTransition::Terminated { reason }) => {
                let ended_at = Utc::now();
                CallStatus::Ended {
                    reason,
                    ended_at,
                    duration_secs: Some(ended_at.signed_duration_since(*connected_at).num_seconds()),
                }
            }
            (
                CallStatus::Negotiating | CallStatus::Failed { .. },
                CallTransition::Terminated { reason },
            ) => CallStatus::Ended {
                reason,
                ended_at: Utc::now(),
                duration_secs: None,
            },
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        self.status = new_status;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// Everything the UI layer renders for one call.
#[derive(Debug, Clone)]
pub struct CallView {
    pub session: CallSession,
    pub is_muted: bool,
    pub is_camera_off: bool,
    pub has_alternate_device: bool,
    /// Local capture, once acquired.
    pub local_preview: Option<MediaStream>,
    pub remote_tracks: Vec<RemoteTrack>,
    /// Last non-fatal device error, e.g. a failed camera switch.
    pub device_error: Option<String>,
}

impl CallView {
    pub fn new(session: CallSession) -> Self {
        let is_camera_off = !session.is_video;
        Self {
            session,
            is_muted: false,
            is_camera_off,
            has_alternate_device: false,
            local_preview: None,
            remote_tracks: Vec::new(),
            device_error: None,
        }
    }

    pub fn status(&self) -> &CallStatus {
        &self.session.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peercall_core::types::SessionDescription;

    fn make_outgoing_call() -> CallSession {
        CallSession::new_outgoing(
            SessionId::new("alice_1700000000000"),
            Identity::new("bob", "Bob"),
            true,
            Utc::now(),
        )
    }

    fn make_incoming_call() -> CallSession {
        let invitation = CallInvitation::new(
            SessionId::new("alice_1700000000000"),
            &Identity::new("alice", "Alice"),
            false,
            SessionDescription::offer("v=0"),
        );
        CallSession::new_incoming(&invitation)
    }

    /// Negotiating → Active → Ended
    #[test]
    fn test_connected_call_flow() {
        let mut call = make_outgoing_call();
        assert!(call.status.is_negotiating());
        assert!(call.is_initiator());

        call.apply_transition(CallTransition::Connected).unwrap();
        assert!(call.status.is_active());

        call.apply_transition(CallTransition::Terminated {
            reason: EndCallReason::LocalHangup,
        })
        .unwrap();
        match call.status {
            CallStatus::Ended {
                reason,
                duration_secs,
                ..
            } => {
                assert_eq!(reason, EndCallReason::LocalHangup);
                assert!(duration_secs.is_some());
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_incoming_call_learns_remote_from_invitation() {
        let call = make_incoming_call();
        assert_eq!(call.role, CallRole::Responder);
        assert_eq!(call.remote_party.id, "alice");
        assert!(!call.is_video);
        assert_eq!(call.session_id.as_str(), "alice_1700000000000");
    }

    #[test]
    fn test_end_before_connect_has_no_duration() {
        let mut call = make_incoming_call();
        call.apply_transition(CallTransition::Terminated {
            reason: EndCallReason::RemoteHangup,
        })
        .unwrap();
        assert!(matches!(
            call.status,
            CallStatus::Ended {
                duration_secs: None,
                ..
            }
        ));
        assert_eq!(call.status.end_reason(), Some(EndCallReason::RemoteHangup));
    }

    #[test]
    fn test_failed_then_ended() {
        let mut call = make_outgoing_call();
        call.apply_transition(CallTransition::Failed {
            reason: EndCallReason::MediaUnavailable,
            message: "permission denied".into(),
        })
        .unwrap();
        assert!(call.status.is_failed());

        // A late connection report cannot revive a failed call.
        assert!(call.apply_transition(CallTransition::Connected).is_err());

        call.apply_transition(CallTransition::Terminated {
            reason: EndCallReason::MediaUnavailable,
        })
        .unwrap();
        assert!(call.status.is_ended());
    }

    #[test]
    fn test_ended_is_terminal() {
        let mut call = make_outgoing_call();
        call.apply_transition(CallTransition::Terminated {
            reason: EndCallReason::LocalHangup,
        })
        .unwrap();

        let err = call
            .apply_transition(CallTransition::Terminated {
                reason: EndCallReason::RemoteHangup,
            })
            .unwrap_err();
        assert!(err.current_state.contains("Ended"));
        assert!(call.apply_transition(CallTransition::Connected).is_err());
        assert_eq!(call.status.end_reason(), Some(EndCallReason::LocalHangup));
    }

    #[test]
    fn test_active_cannot_fail() {
        let mut call = make_outgoing_call();
        call.apply_transition(CallTransition::Connected).unwrap();
        assert!(
            call.apply_transition(CallTransition::Failed {
                reason: EndCallReason::SignalingFailed,
                message: "x".into(),
            })
            .is_err()
        );
        assert!(call.apply_transition(CallTransition::Connected).is_err());
    }

    #[test]
    fn test_view_defaults_follow_media_type() {
        let video = CallView::new(make_outgoing_call());
        assert!(!video.is_camera_off);
        let audio = CallView::new(make_incoming_call());
        assert!(audio.is_camera_off);
        assert!(!audio.is_muted);
    }
}
