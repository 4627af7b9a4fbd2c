//! The per-user inbox slot that rings the responder.

use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};
use log::{debug, warn};
use peercall_core::store::codec::decode;
use peercall_core::store::{Result, SignalingStore, keys};
use peercall_core::types::{CallInvitation, SessionId};
use serde_json::Value;
use std::collections::HashSet;

/// Every distinct invitation that lands in `user_id`'s slot, once each.
pub async fn incoming_invitations(
    store: &dyn SignalingStore,
    user_id: &str,
) -> Result<BoxStream<'static, CallInvitation>> {
    let snapshots = store.watch(&keys::incoming_call(user_id)).await?;
    let mut seen: HashSet<SessionId> = HashSet::new();
    Ok(snapshots
        .filter_map(move |snapshot| {
            let invitation = match snapshot.map(decode::<CallInvitation>) {
                Some(Ok(invitation)) if seen.insert(invitation.session_id.clone()) => {
                    debug!(
                        "Incoming call {} from {}",
                        invitation.session_id, invitation.caller_id
                    );
                    Some(invitation)
                }
                Some(Ok(_)) | None => None,
                Some(Err(e)) => {
                    warn!("Ignoring malformed invitation: {}", e);
                    None
                }
            };
            future::ready(invitation)
        })
        .boxed())
}

/// Deletes `user_id`'s inbox slot if it still holds `session_id`'s invitation.
///
/// A newer invitation from another call is left alone. Returns whether a
/// delete was issued.
pub async fn clear_invitation(
    store: &dyn SignalingStore,
    user_id: &str,
    session_id: &SessionId,
) -> Result<bool> {
    let key = keys::incoming_call(user_id);
    let current = store.get(&key).await?;
    let holds_session = current
        .as_ref()
        .and_then(|v| v.get("sessionId"))
        .and_then(Value::as_str)
        == Some(session_id.as_str());
    if holds_session {
        store.delete(&key).await?;
    }
    Ok(holds_session)
}
