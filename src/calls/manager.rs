//! Call manager for orchestrating call lifecycle.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::stream::BoxStream;
use log::{debug, info};
use peercall_core::store::codec::encode;
use peercall_core::store::{SessionKeys, keys};
use peercall_core::types::{CallInvitation, Identity, SdpKind, SessionId, SignalStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use super::controller::{CallEnvironment, CallHandle, CallSessionController, CallSetup};
use super::error::CallError;
use super::inbox;
use super::relay::bounded;
use super::state::CallSession;
use crate::config::CallConfig;

/// Entry point for one local user: starts, accepts, rejects and ends calls.
///
/// Each call runs independently; the manager only keeps their handles.
pub struct CallManager {
    local: Identity,
    env: CallEnvironment,
    config: Arc<CallConfig>,
    calls: DashMap<SessionId, CallHandle>,
    /// Millisecond timestamp of the last session id handed out.
    last_created_ms: AtomicI64,
}

impl CallManager {
    pub fn new(local: Identity, env: CallEnvironment, config: CallConfig) -> Self {
        Self {
            local,
            env,
            config: Arc::new(config),
            calls: DashMap::new(),
            last_created_ms: AtomicI64::new(0),
        }
    }

    pub fn local_identity(&self) -> &Identity {
        &self.local
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Creation time for a new session, at least 1 ms after the previous
    /// one so that derived ids never collide.
    fn next_created_at(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        let previous = match self.last_created_ms.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |last| Some(now.max(last + 1)),
        ) {
            Ok(previous) | Err(previous) => previous,
        };
        let millis = now.max(previous + 1);
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    /// Calls `remote`.
    pub fn start(&self, remote: Identity, is_video: bool) -> Result<CallHandle, CallError> {
        if remote.id == self.local.id {
            return Err(CallError::InvalidInvitation(
                "cannot call yourself".to_string(),
            ));
        }

        let created_at = self.next_created_at();
        let session_id = SessionId::derive(&self.local.id, created_at);
        let session = CallSession::new_outgoing(session_id.clone(), remote, is_video, created_at);
        let handle = CallSessionController::spawn(
            session,
            CallSetup::Outgoing,
            self.local.clone(),
            self.env.clone(),
            Arc::clone(&self.config),
        );
        self.calls.insert(session_id.clone(), handle.clone());
        info!("Started call {}", session_id);
        Ok(handle)
    }

    /// Answers an incoming invitation. Accepting the same invitation again
    /// returns the existing handle while that call is running.
    pub fn accept(&self, invitation: CallInvitation) -> Result<CallHandle, CallError> {
        validate(&invitation, &self.local)?;

        if let Some(existing) = self.get_call(&invitation.session_id) {
            if !existing.is_ended() {
                debug!("Call {} already accepted", invitation.session_id);
                return Ok(existing);
            }
            return Err(CallError::Ended);
        }

        let session_id = invitation.session_id.clone();
        let session = CallSession::new_incoming(&invitation);
        let handle = CallSessionController::spawn(
            session,
            CallSetup::Incoming(invitation),
            self.local.clone(),
            self.env.clone(),
            Arc::clone(&self.config),
        );
        self.calls.insert(session_id.clone(), handle.clone());
        info!("Accepted call {}", session_id);
        Ok(handle)
    }

    /// Declines an invitation without acquiring any media. The caller sees
    /// the call end as a remote hangup.
    pub async fn reject(&self, invitation: &CallInvitation) -> Result<(), CallError> {
        let limit = self.config.store_timeout();
        let store = self.env.store.as_ref();
        let status_key = SessionKeys::new(invitation.session_id.clone()).status();
        let ended = encode(&SignalStatus::Ended)?;
        bounded(limit, &status_key, store.set(&status_key, ended)).await?;

        let inbox_key = keys::incoming_call(&self.local.id);
        bounded(
            limit,
            &inbox_key,
            inbox::clear_invitation(store, &self.local.id, &invitation.session_id),
        )
        .await?;
        info!(
            "Rejected call {} from {}",
            invitation.session_id, invitation.caller_id
        );
        Ok(())
    }

    /// Ends the call if it is known and still running.
    pub async fn end(&self, session_id: &SessionId) {
        match self.get_call(session_id) {
            Some(handle) if !handle.is_ended() => {
                handle.end().await;
            }
            _ => debug!("end({}) ignored: no running call", session_id),
        }
    }

    pub fn get_call(&self, session_id: &SessionId) -> Option<CallHandle> {
        self.calls.get(session_id).map(|entry| entry.value().clone())
    }

    pub fn active_calls(&self) -> Vec<CallHandle> {
        self.calls
            .iter()
            .filter(|entry| !entry.value().is_ended())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Forgets ended calls and returns how many were dropped.
    pub fn cleanup_ended_calls(&self) -> usize {
        let before = self.calls.len();
        self.calls.retain(|_, handle| !handle.is_ended());
        let removed = before - self.calls.len();
        if removed > 0 {
            debug!("Cleaned up {} ended call(s)", removed);
        }
        removed
    }

    /// Invitations delivered to the local user's inbox slot, once each.
    pub async fn incoming_calls(&self) -> Result<BoxStream<'static, CallInvitation>, CallError> {
        let key = keys::incoming_call(&self.local.id);
        bounded(
            self.config.store_timeout(),
            &key,
            inbox::incoming_invitations(self.env.store.as_ref(), &self.local.id),
        )
        .await
    }
}

fn validate(invitation: &CallInvitation, local: &Identity) -> Result<(), CallError> {
    if invitation.offer.kind != SdpKind::Offer {
        return Err(CallError::InvalidInvitation(format!(
            "carries an {} instead of an offer",
            invitation.offer.kind
        )));
    }
    if invitation.caller_id == local.id {
        return Err(CallError::InvalidInvitation(
            "invitation from ourselves".to_string(),
        ));
    }
    Ok(())
}
