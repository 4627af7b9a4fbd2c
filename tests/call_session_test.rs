use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::future;
use peercall::calls::media::loopback::{LoopbackDevices, LoopbackPeer, LoopbackPeerFactory};
use peercall::calls::media::{
    PeerConnectionState, PeerError, PeerEventSink, PeerSession, PeerSessionConfig,
    PeerSessionFactory, TrackKind,
};
use peercall::store::{
    InMemorySignalingStore, Result as StoreResult, SignalingStore, WatchStream,
};
use peercall::types::{CallInvitation, EndCallReason, Identity, SdpKind, SessionId};
use peercall::{CallConfig, CallEnvironment, CallError, CallHandle, CallManager, CallStatus, CallView};
use serde_json::json;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};

/// Upper bound for any single wait. Generous so paused-clock tests can jump
/// over the ring timeout without hitting it.
const WAIT: Duration = Duration::from_secs(60);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_config() -> CallConfig {
    CallConfig {
        ring_timeout_secs: 0,
        failure_display_ms: 50,
        ..Default::default()
    }
}

struct Fixture {
    store: Arc<InMemorySignalingStore>,
    peers: Arc<LoopbackPeerFactory>,
    alice_media: Arc<LoopbackDevices>,
    bob_media: Arc<LoopbackDevices>,
    alice: CallManager,
    bob: CallManager,
}

impl Fixture {
    fn new() -> Self {
        Self::with(LoopbackPeerFactory::new(), test_config())
    }

    fn with(peers: LoopbackPeerFactory, config: CallConfig) -> Self {
        init_logger();
        let store = Arc::new(InMemorySignalingStore::new());
        let peers = Arc::new(peers);
        let alice_media = Arc::new(LoopbackDevices::with_cameras(2));
        let bob_media = Arc::new(LoopbackDevices::with_cameras(1));

        let alice = CallManager::new(
            Identity::new("alice", "Alice"),
            CallEnvironment {
                store: store.clone(),
                media: alice_media.clone(),
                peers: peers.clone(),
            },
            config.clone(),
        );
        let bob = CallManager::new(
            Identity::new("bob", "Bob").with_photo("https://example.com/bob.png"),
            CallEnvironment {
                store: store.clone(),
                media: bob_media.clone(),
                peers: peers.clone(),
            },
            config,
        );

        Self {
            store,
            peers,
            alice_media,
            bob_media,
            alice,
            bob,
        }
    }

    /// Alice calls Bob; returns Alice's handle and the invitation Bob saw.
    async fn ring_bob(&self, is_video: bool) -> (CallHandle, CallInvitation) {
        let mut feed = self.bob.incoming_calls().await.unwrap();
        let handle = self
            .alice
            .start(Identity::new("bob", "Bob"), is_video)
            .unwrap();
        let invitation = timeout(WAIT, feed.next())
            .await
            .expect("invitation never arrived")
            .expect("feed closed");
        (handle, invitation)
    }

    async fn connect(&self, is_video: bool) -> (CallHandle, CallHandle) {
        let (outgoing, invitation) = self.ring_bob(is_video).await;
        let incoming = self.bob.accept(invitation).unwrap();
        wait(&outgoing, |v| v.session.status.is_active()).await;
        wait(&incoming, |v| v.session.status.is_active()).await;
        (outgoing, incoming)
    }

    async fn peer_of(&self, session_id: &SessionId, user: &str) -> Arc<LoopbackPeer> {
        let peers = self.peers.clone();
        let (sid, owner) = (session_id.clone(), user.to_string());
        eventually(move || peers.peer(sid.as_str(), &owner).is_some()).await;
        self.peers.peer(session_id.as_str(), user).unwrap()
    }

    async fn get(&self, key: String) -> Option<serde_json::Value> {
        self.store.get(&key).await.unwrap()
    }
}

/// Store whose writes under `prefix` never complete.
struct HangingStore {
    inner: Arc<InMemorySignalingStore>,
    prefix: &'static str,
    stalled: AtomicUsize,
}

impl HangingStore {
    fn new(inner: Arc<InMemorySignalingStore>, prefix: &'static str) -> Self {
        Self {
            inner,
            prefix,
            stalled: AtomicUsize::new(0),
        }
    }

    fn stalled(&self) -> usize {
        self.stalled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingStore for HangingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        if key.starts_with(self.prefix) {
            self.stalled.fetch_add(1, Ordering::SeqCst);
            future::pending::<()>().await;
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }

    async fn append(&self, key: &str, entry: Value) -> StoreResult<()> {
        self.inner.append(key, entry).await
    }

    async fn watch(&self, key: &str) -> StoreResult<WatchStream> {
        self.inner.watch(key).await
    }
}

/// Peer factory that blows up inside the call task.
struct PanickingPeers;

#[async_trait]
impl PeerSessionFactory for PanickingPeers {
    async fn create(
        &self,
        _config: PeerSessionConfig,
        _events: PeerEventSink,
    ) -> Result<Arc<dyn PeerSession>, PeerError> {
        panic!("peer session backend crashed");
    }
}

/// Alice alone, wired to `store` and `peers`.
fn caller(
    store: Arc<dyn SignalingStore>,
    peers: Arc<dyn PeerSessionFactory>,
    config: CallConfig,
) -> (CallManager, Arc<LoopbackDevices>) {
    init_logger();
    let media = Arc::new(LoopbackDevices::with_cameras(1));
    let manager = CallManager::new(
        Identity::new("alice", "Alice"),
        CallEnvironment {
            store,
            media: media.clone(),
            peers,
        },
        config,
    );
    (manager, media)
}

async fn wait(handle: &CallHandle, predicate: impl FnMut(&CallView) -> bool) -> CallView {
    timeout(WAIT, handle.wait_until(predicate))
        .await
        .expect("timed out waiting for call state")
        .expect("call finished first")
}

async fn wait_ended(handle: &CallHandle) -> CallView {
    wait(handle, |v| v.session.status.is_ended()).await
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

fn end_reason(view: &CallView) -> EndCallReason {
    view.session
        .status
        .end_reason()
        .expect("call has not ended")
}

fn status_key(sid: &SessionId) -> String {
    format!("calls/{}/status", sid)
}

#[tokio::test]
async fn test_video_call_end_to_end() {
    let fx = Fixture::new();
    let (outgoing, invitation) = fx.ring_bob(true).await;
    let sid = outgoing.session_id().clone();

    assert_eq!(invitation.session_id, sid);
    assert_eq!(invitation.caller_id, "alice");
    assert_eq!(invitation.caller_display_name, "Alice");
    assert!(invitation.is_video);
    assert_eq!(invitation.offer.kind, SdpKind::Offer);
    assert_eq!(fx.get(status_key(&sid)).await, Some(json!("active")));

    let incoming = fx.bob.accept(invitation.clone()).unwrap();
    assert_eq!(incoming.session().remote_party.id, "alice");

    let alice_view = wait(&outgoing, |v| v.session.status.is_active()).await;
    let bob_view = wait(&incoming, |v| v.session.status.is_active()).await;

    // Accepting again while the call runs hands back the same call.
    let again = fx.bob.accept(invitation).unwrap();
    assert_eq!(again.session_id(), incoming.session_id());

    let mut kinds: Vec<TrackKind> = alice_view.remote_tracks.iter().map(|t| t.kind).collect();
    kinds.sort_by_key(|k| *k == TrackKind::Video);
    assert_eq!(kinds, vec![TrackKind::Audio, TrackKind::Video]);
    assert_eq!(bob_view.remote_tracks.len(), 2);
    assert!(alice_view.local_preview.is_some());
    assert!(alice_view.has_alternate_device);
    assert!(!bob_view.has_alternate_device);
    assert!(fx.get(format!("calls/{}/answer", sid)).await.is_some());

    let alice_peer = fx.peers.peer(sid.as_str(), "alice").unwrap();
    let bob_peer = fx.peers.peer(sid.as_str(), "bob").unwrap();
    assert_eq!(alice_peer.remote_description_sets(), 1);
    assert_eq!(bob_peer.remote_description_sets(), 1);
    assert!(!alice_peer.applied_candidates().is_empty());
    assert!(!bob_peer.applied_candidates().is_empty());

    let alice_end = outgoing.end().await;
    assert_eq!(end_reason(&alice_end), EndCallReason::LocalHangup);
    assert!(matches!(
        alice_end.session.status,
        CallStatus::Ended {
            duration_secs: Some(_),
            ..
        }
    ));
    let bob_end = wait_ended(&incoming).await;
    assert_eq!(end_reason(&bob_end), EndCallReason::RemoteHangup);

    assert_eq!(fx.store.live_keys(), vec![status_key(&sid)]);
    assert_eq!(fx.get(status_key(&sid)).await, Some(json!("ended")));
    assert_eq!(fx.alice_media.live_tracks(), 0);
    assert_eq!(fx.bob_media.live_tracks(), 0);
    assert!(alice_peer.is_closed());
    assert!(bob_peer.is_closed());
}

#[tokio::test]
async fn test_end_is_idempotent() {
    let fx = Fixture::new();
    let (outgoing, incoming) = fx.connect(false).await;
    let sid = outgoing.session_id().clone();

    let first = outgoing.end().await;
    let keys_after_first = {
        wait_ended(&incoming).await;
        fx.store.live_keys()
    };

    for _ in 0..3 {
        let again = outgoing.end().await;
        assert_eq!(again.session.status, first.session.status);
    }
    fx.alice.end(&sid).await;
    fx.alice.end(&sid).await;
    let bob_again = incoming.end().await;
    assert_eq!(end_reason(&bob_again), EndCallReason::RemoteHangup);

    assert_eq!(outgoing.status(), first.session.status);
    assert_eq!(fx.store.live_keys(), keys_after_first);
    assert_eq!(fx.alice_media.live_tracks(), 0);
}

#[tokio::test]
async fn test_active_only_after_connected_callback() {
    let fx = Fixture::with(LoopbackPeerFactory::manual(), test_config());
    let (outgoing, invitation) = fx.ring_bob(false).await;
    let sid = outgoing.session_id().clone();
    let incoming = fx.bob.accept(invitation).unwrap();

    let alice_peer = fx.peer_of(&sid, "alice").await;
    let bob_peer = fx.peer_of(&sid, "bob").await;
    {
        let (alice_peer, bob_peer) = (alice_peer.clone(), bob_peer.clone());
        eventually(move || {
            alice_peer.remote_description_sets() == 1
                && !alice_peer.applied_candidates().is_empty()
                && !bob_peer.applied_candidates().is_empty()
        })
        .await;
    }

    // Descriptions and candidates are all in place, but nobody reported a
    // connection yet.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(outgoing.status(), CallStatus::Negotiating);
    assert_eq!(incoming.status(), CallStatus::Negotiating);

    bob_peer.set_connection_state(PeerConnectionState::Connecting);
    sleep(Duration::from_millis(20)).await;
    assert_eq!(incoming.status(), CallStatus::Negotiating);

    bob_peer.set_connection_state(PeerConnectionState::Connected);
    wait(&incoming, |v| v.session.status.is_active()).await;
    assert_eq!(outgoing.status(), CallStatus::Negotiating);

    alice_peer.set_connection_state(PeerConnectionState::Connected);
    wait(&outgoing, |v| v.session.status.is_active()).await;

    outgoing.end().await;
    wait_ended(&incoming).await;
}

#[tokio::test]
async fn test_unanswered_call_releases_everything_on_end() {
    let fx = Fixture::new();
    let (outgoing, _invitation) = fx.ring_bob(false).await;
    let sid = outgoing.session_id().clone();
    assert!(fx.get("users/bob/incomingCall".to_string()).await.is_some());
    {
        let media = fx.alice_media.clone();
        eventually(move || media.live_tracks() == 1).await;
    }

    let view = outgoing.end().await;
    assert_eq!(end_reason(&view), EndCallReason::LocalHangup);
    assert!(matches!(
        view.session.status,
        CallStatus::Ended {
            duration_secs: None,
            ..
        }
    ));

    assert_eq!(fx.alice_media.live_tracks(), 0);
    assert!(fx.get("users/bob/incomingCall".to_string()).await.is_none());
    assert!(fx.get(format!("calls/{}/candidates/alice", sid)).await.is_none());
    assert_eq!(fx.get(status_key(&sid)).await, Some(json!("ended")));
    assert!(fx.peers.peer(sid.as_str(), "alice").unwrap().is_closed());
    assert!(fx.bob_media.issued_tracks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_media_failure_shows_failed_then_ends() {
    let fx = Fixture::with(
        LoopbackPeerFactory::new(),
        CallConfig {
            ring_timeout_secs: 0,
            failure_display_ms: 3000,
            ..Default::default()
        },
    );
    fx.alice_media.set_permission_denied(true);

    let started = Instant::now();
    let outgoing = fx.alice.start(Identity::new("bob", "Bob"), true).unwrap();
    let failed = wait(&outgoing, |v| v.session.status.is_failed()).await;
    match &failed.session.status {
        CallStatus::Failed {
            reason, message, ..
        } => {
            assert_eq!(*reason, EndCallReason::MediaUnavailable);
            assert!(message.contains("permission denied"));
        }
        other => panic!("unexpected status {:?}", other),
    }

    sleep(Duration::from_millis(2900)).await;
    assert!(outgoing.status().is_failed());

    let ended = wait_ended(&outgoing).await;
    assert_eq!(end_reason(&ended), EndCallReason::MediaUnavailable);
    assert!(started.elapsed() >= Duration::from_millis(3000));

    // The call never got far enough to ring anybody.
    assert!(fx.get("users/bob/incomingCall".to_string()).await.is_none());
    assert!(fx.peers.peers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_end_during_failure_display_is_immediate() {
    let fx = Fixture::with(
        LoopbackPeerFactory::new(),
        CallConfig {
            ring_timeout_secs: 0,
            failure_display_ms: 3000,
            ..Default::default()
        },
    );
    fx.alice_media.set_unavailable("cam-0");

    let outgoing = fx.alice.start(Identity::new("bob", "Bob"), true).unwrap();
    wait(&outgoing, |v| v.session.status.is_failed()).await;

    let started = Instant::now();
    let ended = outgoing.end().await;
    assert!(started.elapsed() < Duration::from_millis(3000));
    assert_eq!(end_reason(&ended), EndCallReason::MediaUnavailable);
}

#[tokio::test(start_paused = true)]
async fn test_end_during_media_acquisition() {
    let fx = Fixture::new();
    fx.alice_media.set_acquire_delay(Some(Duration::from_secs(5)));

    let outgoing = fx.alice.start(Identity::new("bob", "Bob"), false).unwrap();
    sleep(Duration::from_millis(10)).await;

    let started = Instant::now();
    let ended = outgoing.end().await;
    assert_eq!(end_reason(&ended), EndCallReason::LocalHangup);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(fx.peers.peers().is_empty());
    assert!(fx.get("users/bob/incomingCall".to_string()).await.is_none());

    // Capture that resolves after end() is released straight away.
    sleep(Duration::from_secs(6)).await;
    assert_eq!(fx.alice_media.issued_tracks().len(), 1);
    assert_eq!(fx.alice_media.live_tracks(), 0);
}

#[tokio::test]
async fn test_duplicate_answer_is_applied_once() {
    let fx = Fixture::new();
    let (outgoing, incoming) = fx.connect(false).await;
    let sid = outgoing.session_id().clone();
    let answer_key = format!("calls/{}/answer", sid);
    let alice_peer = fx.peers.peer(sid.as_str(), "alice").unwrap();

    let answer = fx.get(answer_key.clone()).await.unwrap();
    fx.store.set(&answer_key, answer.clone()).await.unwrap();
    fx.store
        .set(
            &answer_key,
            json!({"type": "answer", "sdp": "v=0\r\no=mallory 9 9 IN IP4 127.0.0.1\r\n"}),
        )
        .await
        .unwrap();
    fx.store.set(&answer_key, answer).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(alice_peer.remote_description_sets(), 1);
    assert!(outgoing.status().is_active());
    assert!(incoming.status().is_active());

    outgoing.end().await;
}

#[tokio::test]
async fn test_connection_failure_ends_call() {
    let fx = Fixture::new();
    let (outgoing, incoming) = fx.connect(true).await;
    let sid = outgoing.session_id().clone();

    fx.peers
        .peer(sid.as_str(), "alice")
        .unwrap()
        .set_connection_state(PeerConnectionState::Failed);

    let alice_view = wait_ended(&outgoing).await;
    assert_eq!(end_reason(&alice_view), EndCallReason::ConnectionLost);
    let bob_view = wait_ended(&incoming).await;
    assert_eq!(end_reason(&bob_view), EndCallReason::RemoteHangup);
    assert_eq!(fx.alice_media.live_tracks(), 0);
    assert_eq!(fx.bob_media.live_tracks(), 0);
}

#[tokio::test]
async fn test_disconnected_is_treated_as_lost() {
    let fx = Fixture::new();
    let (outgoing, incoming) = fx.connect(false).await;
    let sid = outgoing.session_id().clone();

    fx.peers
        .peer(sid.as_str(), "bob")
        .unwrap()
        .set_connection_state(PeerConnectionState::Disconnected);

    let bob_view = wait_ended(&incoming).await;
    assert_eq!(end_reason(&bob_view), EndCallReason::ConnectionLost);
    let alice_view = wait_ended(&outgoing).await;
    assert_eq!(end_reason(&alice_view), EndCallReason::RemoteHangup);
}

#[tokio::test]
async fn test_remote_hangup_cleans_both_sides() {
    let fx = Fixture::new();
    let (outgoing, incoming) = fx.connect(false).await;
    let sid = outgoing.session_id().clone();

    let bob_view = incoming.end().await;
    assert_eq!(end_reason(&bob_view), EndCallReason::LocalHangup);
    let alice_view = wait_ended(&outgoing).await;
    assert_eq!(end_reason(&alice_view), EndCallReason::RemoteHangup);

    assert_eq!(fx.store.live_keys(), vec![status_key(&sid)]);

    assert!(fx.alice.active_calls().is_empty());
    assert_eq!(fx.alice.cleanup_ended_calls(), 1);
    assert!(fx.alice.get_call(&sid).is_none());
    fx.alice.end(&sid).await;
    assert_eq!(fx.bob.cleanup_ended_calls(), 1);
}

#[tokio::test]
async fn test_reject_ends_caller_without_media() {
    let fx = Fixture::new();
    let (outgoing, invitation) = fx.ring_bob(true).await;

    fx.bob.reject(&invitation).await.unwrap();

    let view = wait_ended(&outgoing).await;
    assert_eq!(end_reason(&view), EndCallReason::RemoteHangup);
    assert!(fx.get("users/bob/incomingCall".to_string()).await.is_none());
    assert!(fx.bob_media.issued_tracks().is_empty());
    assert_eq!(fx.alice_media.live_tracks(), 0);
    assert!(fx.bob.active_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_times_out() {
    let fx = Fixture::with(
        LoopbackPeerFactory::new(),
        CallConfig {
            ring_timeout_secs: 45,
            failure_display_ms: 50,
            ..Default::default()
        },
    );
    let started = Instant::now();
    let (outgoing, _invitation) = fx.ring_bob(false).await;

    let view = wait_ended(&outgoing).await;
    assert_eq!(end_reason(&view), EndCallReason::NoAnswer);
    assert!(started.elapsed() >= Duration::from_secs(45));
    assert!(fx.get("users/bob/incomingCall".to_string()).await.is_none());
    assert_eq!(fx.alice_media.live_tracks(), 0);
}

#[tokio::test]
async fn test_signaling_write_failure_surfaces_as_failure() {
    let fx = Fixture::new();
    fx.store.reject_writes("users/");

    let outgoing = fx.alice.start(Identity::new("bob", "Bob"), false).unwrap();
    let failed = wait(&outgoing, |v| v.session.status.is_failed()).await;
    match &failed.session.status {
        CallStatus::Failed {
            reason, message, ..
        } => {
            assert_eq!(*reason, EndCallReason::SignalingFailed);
            assert!(message.contains("users/bob/incomingCall"));
        }
        other => panic!("unexpected status {:?}", other),
    }

    let ended = wait_ended(&outgoing).await;
    assert_eq!(end_reason(&ended), EndCallReason::SignalingFailed);
    assert_eq!(fx.alice_media.live_tracks(), 0);
}

#[tokio::test]
async fn test_mute_camera_off_and_switch() {
    let fx = Fixture::new();
    let (outgoing, incoming) = fx.connect(true).await;
    let sid = outgoing.session_id().clone();

    outgoing.set_muted(true).unwrap();
    let view = wait(&outgoing, |v| v.is_muted).await;
    let preview = view.local_preview.unwrap();
    assert!(preview.audio_tracks().all(|t| !t.is_enabled()));
    assert!(preview.video_track().unwrap().is_enabled());

    outgoing.set_camera_off(true).unwrap();
    let view = wait(&outgoing, |v| v.is_camera_off).await;
    assert!(!view.local_preview.unwrap().video_track().unwrap().is_enabled());

    outgoing.switch_camera().await.unwrap();
    let view = outgoing.view();
    let video = view.local_preview.unwrap().video_track().cloned().unwrap();
    assert_eq!(video.device_id(), Some("cam-1"));
    assert!(!video.is_enabled());
    assert_eq!(
        fx.peers
            .peer(sid.as_str(), "alice")
            .unwrap()
            .replaced_tracks()
            .len(),
        1
    );
    // Audio, plus the camera currently in use.
    assert_eq!(fx.alice_media.live_tracks(), 2);

    let err = incoming.switch_camera().await.unwrap_err();
    assert!(matches!(err, CallError::NoAlternateDevice));
    assert!(incoming.view().device_error.is_some());
    assert!(incoming.status().is_active());

    outgoing.set_muted(false).unwrap();
    wait(&outgoing, |v| !v.is_muted).await;

    outgoing.end().await;
    assert!(outgoing.set_muted(true).is_err() || outgoing.is_ended());
    assert!(matches!(
        outgoing.switch_camera().await,
        Err(CallError::Ended)
    ));
}

#[tokio::test]
async fn test_concurrent_calls_are_isolated() {
    let fx = Fixture::new();
    let carol_media = Arc::new(LoopbackDevices::with_cameras(1));
    let carol = CallManager::new(
        Identity::new("carol", "Carol"),
        CallEnvironment {
            store: fx.store.clone(),
            media: carol_media.clone(),
            peers: fx.peers.clone(),
        },
        test_config(),
    );

    let (to_bob, bob_side) = fx.connect(false).await;

    let mut carol_feed = carol.incoming_calls().await.unwrap();
    let to_carol = fx
        .alice
        .start(Identity::new("carol", "Carol"), false)
        .unwrap();
    assert_ne!(to_bob.session_id(), to_carol.session_id());
    let invitation = timeout(WAIT, carol_feed.next()).await.unwrap().unwrap();
    let carol_side = carol.accept(invitation).unwrap();
    wait(&to_carol, |v| v.session.status.is_active()).await;
    wait(&carol_side, |v| v.session.status.is_active()).await;
    assert_eq!(fx.alice.active_calls().len(), 2);

    to_bob.end().await;
    wait_ended(&bob_side).await;
    sleep(Duration::from_millis(20)).await;
    assert!(to_carol.status().is_active());
    assert!(carol_side.status().is_active());
    assert_eq!(carol_media.live_tracks(), 1);

    carol_side.end().await;
    let view = wait_ended(&to_carol).await;
    assert_eq!(end_reason(&view), EndCallReason::RemoteHangup);
    assert_eq!(fx.alice_media.live_tracks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_media_acquisition_times_out() {
    let fx = Fixture::with(
        LoopbackPeerFactory::new(),
        CallConfig {
            ring_timeout_secs: 0,
            failure_display_ms: 50,
            media_timeout_secs: 20,
            ..Default::default()
        },
    );
    fx.alice_media.set_acquire_delay(Some(Duration::from_secs(1000)));

    let started = Instant::now();
    let outgoing = fx.alice.start(Identity::new("bob", "Bob"), true).unwrap();
    let failed = wait(&outgoing, |v| v.session.status.is_failed()).await;
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert!(started.elapsed() < Duration::from_secs(1000));
    match &failed.session.status {
        CallStatus::Failed {
            reason, message, ..
        } => {
            assert_eq!(*reason, EndCallReason::MediaUnavailable);
            assert!(message.contains("timed out"));
        }
        other => panic!("unexpected status {:?}", other),
    }

    let ended = wait_ended(&outgoing).await;
    assert_eq!(end_reason(&ended), EndCallReason::MediaUnavailable);
    assert_eq!(fx.alice_media.live_tracks(), 0);
    assert!(fx.peers.peers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hung_store_write_times_out() {
    let backing = Arc::new(InMemorySignalingStore::new());
    let store = Arc::new(HangingStore::new(backing.clone(), "users/"));
    let peers = Arc::new(LoopbackPeerFactory::new());
    let (alice, media) = caller(
        store.clone(),
        peers.clone(),
        CallConfig {
            ring_timeout_secs: 0,
            failure_display_ms: 50,
            store_timeout_secs: 10,
            ..Default::default()
        },
    );

    let started = Instant::now();
    let outgoing = alice.start(Identity::new("bob", "Bob"), false).unwrap();
    let failed = wait(&outgoing, |v| v.session.status.is_failed()).await;
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(store.stalled(), 1);
    match &failed.session.status {
        CallStatus::Failed {
            reason, message, ..
        } => {
            assert_eq!(*reason, EndCallReason::SignalingFailed);
            assert!(message.contains("users/bob/incomingCall"));
            assert!(message.contains("timed out after 10s"));
        }
        other => panic!("unexpected status {:?}", other),
    }

    let ended = wait_ended(&outgoing).await;
    assert_eq!(end_reason(&ended), EndCallReason::SignalingFailed);
    assert_eq!(media.live_tracks(), 0);
    assert!(peers.peers().iter().all(|p| p.is_closed()));
    assert_eq!(
        backing.get(&status_key(outgoing.session_id())).await.unwrap(),
        Some(json!("ended"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_end_during_hung_store_write() {
    let backing = Arc::new(InMemorySignalingStore::new());
    let store = Arc::new(HangingStore::new(backing, "users/"));
    let (alice, media) = caller(
        store.clone(),
        Arc::new(LoopbackPeerFactory::new()),
        CallConfig {
            ring_timeout_secs: 0,
            failure_display_ms: 50,
            store_timeout_secs: 10,
            ..Default::default()
        },
    );

    let outgoing = alice.start(Identity::new("bob", "Bob"), false).unwrap();
    let watched = store.clone();
    eventually(move || watched.stalled() > 0).await;

    let started = Instant::now();
    let ended = outgoing.end().await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(end_reason(&ended), EndCallReason::LocalHangup);
    assert_eq!(media.live_tracks(), 0);
}

#[tokio::test]
async fn test_panic_in_call_task_still_releases() {
    let store = Arc::new(InMemorySignalingStore::new());
    let (alice, media) = caller(store.clone(), Arc::new(PanickingPeers), test_config());

    let outgoing = alice.start(Identity::new("bob", "Bob"), true).unwrap();
    let key = status_key(outgoing.session_id());

    let tracks = media.clone();
    eventually(move || !tracks.issued_tracks().is_empty() && tracks.live_tracks() == 0).await;
    timeout(WAIT, async {
        while store.get(&key).await.unwrap() != Some(json!("ended")) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("status never marked ended");
    assert!(store.get("users/bob/incomingCall").await.unwrap().is_none());
}
