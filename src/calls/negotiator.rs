//! Offer/answer sequencing over one peer session object.

use log::debug;
use peercall_core::types::{CallRole, SdpKind, SessionDescription};
use std::sync::Arc;

use super::error::CallError;
use super::media::PeerSession;

/// Which descriptions have been set on the session object so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiationState {
    pub local: Option<SdpKind>,
    pub remote_applied: bool,
}

/// Drives the offer/answer exchange for one role.
///
/// Each session produces exactly one local description (an offer for the
/// initiator, an answer for the responder) and accepts exactly one remote
/// description. Repeated deliveries of the remote description are refused
/// with [`CallError::AlreadyApplied`] before they reach the session object.
pub struct SessionNegotiator {
    role: CallRole,
    peer: Arc<dyn PeerSession>,
    state: NegotiationState,
}

impl SessionNegotiator {
    pub fn new(role: CallRole, peer: Arc<dyn PeerSession>) -> Self {
        Self {
            role,
            peer,
            state: NegotiationState::default(),
        }
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn peer(&self) -> &Arc<dyn PeerSession> {
        &self.peer
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_remote_applied(&self) -> bool {
        self.state.remote_applied
    }

    pub async fn create_offer(&mut self) -> Result<SessionDescription, CallError> {
        if !self.role.is_initiator() {
            return Err(CallError::Negotiation(
                "responder cannot create an offer".to_string(),
            ));
        }
        self.ensure_no_local()?;

        let offer = self.peer.create_offer().await?;
        self.peer.set_local_description(offer.clone()).await?;
        self.state.local = Some(SdpKind::Offer);
        debug!("Local offer set ({} bytes)", offer.sdp.len());
        Ok(offer)
    }

    /// Applies `offer` as the remote description, then creates and sets the
    /// local answer. The answer is only produced once the offer is in place.
    pub async fn create_answer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, CallError> {
        if self.role.is_initiator() {
            return Err(CallError::Negotiation(
                "initiator cannot create an answer".to_string(),
            ));
        }
        self.ensure_no_local()?;

        match self.apply_remote_description(offer).await {
            Ok(()) | Err(CallError::AlreadyApplied) => {}
            Err(e) => return Err(e),
        }

        let answer = self.peer.create_answer().await?;
        self.peer.set_local_description(answer.clone()).await?;
        self.state.local = Some(SdpKind::Answer);
        debug!("Local answer set ({} bytes)", answer.sdp.len());
        Ok(answer)
    }

    pub async fn apply_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), CallError> {
        if self.state.remote_applied {
            return Err(CallError::AlreadyApplied);
        }

        let expected = self.role.remote_kind();
        if desc.kind != expected {
            return Err(CallError::Negotiation(format!(
                "expected remote {}, got {}",
                expected, desc.kind
            )));
        }
        if self.role.is_initiator() && self.state.local.is_none() {
            return Err(CallError::Negotiation(
                "answer received before the offer was created".to_string(),
            ));
        }

        self.peer.set_remote_description(desc).await?;
        self.state.remote_applied = true;
        debug!("Remote {} applied", expected);
        Ok(())
    }

    fn ensure_no_local(&self) -> Result<(), CallError> {
        match self.state.local {
            Some(kind) => Err(CallError::Negotiation(format!(
                "local {} already created",
                kind
            ))),
            None => Ok(()),
        }
    }
}
