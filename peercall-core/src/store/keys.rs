//! Key layout of the signaling store.

use crate::types::SessionId;

/// `users/{userId}/incomingCall`
pub fn incoming_call(user_id: &str) -> String {
    format!("users/{}/incomingCall", user_id)
}

/// All keys belonging to one call attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    session_id: SessionId,
}

impl SessionKeys {
    pub fn new(session_id: SessionId) -> Self {
        Self { session_id }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// `calls/{sessionId}/status`
    pub fn status(&self) -> String {
        format!("calls/{}/status", self.session_id)
    }

    /// `calls/{sessionId}/answer`
    pub fn answer(&self) -> String {
        format!("calls/{}/answer", self.session_id)
    }

    /// `calls/{sessionId}/candidates/{ownerId}`
    pub fn candidates(&self, owner_id: &str) -> String {
        format!("calls/{}/candidates/{}", self.session_id, owner_id)
    }
}
