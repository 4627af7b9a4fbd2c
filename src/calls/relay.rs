//! Trickle exchange of reachability candidates through the signaling store.

use futures_util::stream::{self, BoxStream, StreamExt};
use log::{debug, warn};
use peercall_core::store::codec::{decode_collection, encode};
use peercall_core::store::{SessionKeys, SignalingStore, StoreError};
use peercall_core::types::{CandidateInit, IceCandidate};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};

use super::error::CallError;
use super::media::PeerSession;

/// Remembers which candidates were already handed out.
///
/// Watches deliver the whole collection on every change, so each snapshot is
/// reduced to the entries not seen before, in snapshot order.
#[derive(Debug, Default)]
pub struct CandidateLedger {
    seen: HashSet<IceCandidate>,
}

impl CandidateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delta(&mut self, snapshot: Vec<IceCandidate>) -> Vec<IceCandidate> {
        snapshot
            .into_iter()
            .filter(|c| self.seen.insert(c.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Bounds a store operation by `limit` and tags failures with the key.
pub(crate) async fn bounded<T>(
    limit: Duration,
    key: &str,
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, CallError> {
    let result = match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    };
    result.map_err(|source| CallError::SignalingWriteFailed {
        key: key.to_string(),
        source,
    })
}

/// Publishes local candidates and consumes the remote party's.
pub struct CandidateRelay {
    store: Arc<dyn SignalingStore>,
    keys: SessionKeys,
    local_id: String,
    remote_id: String,
    store_timeout: Duration,
}

impl CandidateRelay {
    pub fn new(
        store: Arc<dyn SignalingStore>,
        keys: SessionKeys,
        local_id: impl Into<String>,
        remote_id: impl Into<String>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            local_id: local_id.into(),
            remote_id: remote_id.into(),
            store_timeout,
        }
    }

    /// Key of this party's own candidate set.
    pub fn local_key(&self) -> String {
        self.keys.candidates(&self.local_id)
    }

    pub async fn publish_local(&self, candidate: CandidateInit) -> Result<(), CallError> {
        let key = self.local_key();
        let entry = IceCandidate::new(self.keys.session_id().clone(), &self.local_id, candidate);
        let value = encode(&entry)?;
        bounded(self.store_timeout, &key, self.store.append(&key, value)).await?;
        debug!("Published local candidate to {}", key);
        Ok(())
    }

    /// Lazily yields each new remote candidate once, for as long as the
    /// stream is polled.
    pub async fn consume_remote(&self) -> Result<BoxStream<'static, IceCandidate>, CallError> {
        let key = self.keys.candidates(&self.remote_id);
        let snapshots = bounded(self.store_timeout, &key, self.store.watch(&key)).await?;

        let session_id = self.keys.session_id().clone();
        let mut ledger = CandidateLedger::new();
        Ok(snapshots
            .flat_map(move |snapshot| {
                let entries: Vec<IceCandidate> = decode_collection::<IceCandidate>(snapshot)
                    .into_iter()
                    .filter(|c| {
                        if c.session_id != session_id {
                            warn!("Ignoring candidate for foreign session {}", c.session_id);
                            return false;
                        }
                        true
                    })
                    .collect();
                stream::iter(ledger.delta(entries))
            })
            .boxed())
    }

    /// Feeds remote candidates into `peer`, one at a time and in arrival
    /// order, once [`RemoteCandidates::mark_remote_ready`] has been called.
    pub async fn attach(&self, peer: Arc<dyn PeerSession>) -> Result<RemoteCandidates, CallError> {
        let mut candidates = self.consume_remote().await?;
        let (queue, mut pending) = mpsc::unbounded_channel::<IceCandidate>();
        let (ready, mut ready_rx) = watch::channel(false);
        let applied = Arc::new(AtomicUsize::new(0));

        let consumer = tokio::spawn(async move {
            while let Some(candidate) = candidates.next().await {
                if queue.send(candidate).is_err() {
                    break;
                }
            }
        });

        let applied_count = Arc::clone(&applied);
        let applier = tokio::spawn(async move {
            if ready_rx.wait_for(|ready| *ready).await.is_err() {
                return;
            }
            while let Some(candidate) = pending.recv().await {
                match peer.add_ice_candidate(candidate.data).await {
                    Ok(()) => {
                        applied_count.fetch_add(1, Ordering::Relaxed);
                        debug!("Applied remote candidate from {}", candidate.owner_id);
                    }
                    Err(e) => warn!("Failed to apply remote candidate: {}", e),
                }
            }
        });

        Ok(RemoteCandidates {
            ready,
            applied,
            consumer,
            applier,
        })
    }

    /// Deletes this party's candidate set.
    pub async fn remove_local(&self) -> Result<(), CallError> {
        let key = self.local_key();
        bounded(self.store_timeout, &key, self.store.delete(&key)).await
    }
}

/// Background consumption of the remote candidate set. Dropping it stops both
/// tasks.
pub struct RemoteCandidates {
    ready: watch::Sender<bool>,
    applied: Arc<AtomicUsize>,
    consumer: JoinHandle<()>,
    applier: JoinHandle<()>,
}

impl RemoteCandidates {
    /// Opens the gate: the remote description is in place.
    pub fn mark_remote_ready(&self) {
        self.ready.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn abort_handles(&self) -> [AbortHandle; 2] {
        [self.consumer.abort_handle(), self.applier.abort_handle()]
    }
}

impl Drop for RemoteCandidates {
    fn drop(&mut self) {
        self.consumer.abort();
        self.applier.abort();
    }
}
