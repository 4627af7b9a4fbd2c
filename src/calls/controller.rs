//! Per-call coordination loop.
//!
//! Every call runs as one spawned task that owns the session object, the
//! capture stream and all store watches of that call. Peer callbacks, store
//! notifications and UI commands are funnelled into the task through
//! channels, so session state is only ever mutated from one place.
//!
//! Teardown lives in [`SessionResources::release`]. It runs exactly once: on
//! the normal exit path, or from a scope guard if the task unwinds or is
//! aborted.

use futures_util::StreamExt;
use futures_util::future;
use log::{debug, error, info, warn};
use peercall_core::store::codec::{decode, encode};
use peercall_core::store::{SessionKeys, SignalingStore, keys};
use peercall_core::types::{
    CallInvitation, CallRole, EndCallReason, Identity, SessionDescription, SessionId,
    SignalStatus,
};
use scopeguard::ScopeGuard;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::device::DeviceSwitcher;
use super::error::CallError;
use super::inbox;
use super::media::{
    MediaConstraints, MediaDevices, MediaError, MediaStream, PeerConnectionState, PeerEvent,
    PeerEventSink, PeerSession, PeerSessionConfig, PeerSessionFactory, TrackKind,
};
use super::negotiator::SessionNegotiator;
use super::relay::{CandidateRelay, RemoteCandidates, bounded};
use super::state::{CallSession, CallStatus, CallTransition, CallView, InvalidTransition};
use crate::config::CallConfig;

/// Collaborators shared by every call of one user.
#[derive(Clone)]
pub struct CallEnvironment {
    pub store: Arc<dyn SignalingStore>,
    pub media: Arc<dyn MediaDevices>,
    pub peers: Arc<dyn PeerSessionFactory>,
}

pub(crate) enum CallCommand {
    End,
    SetMuted(bool),
    SetCameraOff(bool),
    SwitchCamera(oneshot::Sender<Result<(), CallError>>),
}

enum CallEvent {
    Peer(PeerEvent),
    Answer(Option<Value>),
    Status(Option<Value>),
}

/// Why the coordination loop stopped.
enum Exit {
    /// Ended from this side: `end()` or the ring timeout.
    Hangup(EndCallReason),
    /// The other side went away, by status or by connection loss.
    Remote(CallError),
    Failed(CallError),
}

impl From<CallError> for Exit {
    fn from(e: CallError) -> Self {
        Exit::Failed(e)
    }
}

/// UI-facing handle to one call. Cheap to clone.
#[derive(Clone)]
pub struct CallHandle {
    session_id: SessionId,
    commands: mpsc::UnboundedSender<CallCommand>,
    view: watch::Receiver<CallView>,
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("session_id", &self.session_id)
            .field("status", &self.status())
            .finish()
    }
}

impl CallHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn view(&self) -> CallView {
        self.view.borrow().clone()
    }

    pub fn session(&self) -> CallSession {
        self.view.borrow().session.clone()
    }

    pub fn status(&self) -> CallStatus {
        self.view.borrow().session.status.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.view.borrow().session.status.is_ended()
    }

    /// Change notifications for the observable state.
    pub fn subscribe(&self) -> watch::Receiver<CallView> {
        self.view.clone()
    }

    /// Waits until the view satisfies `predicate`.
    ///
    /// Fails with [`CallError::Ended`] if the call finished without ever
    /// satisfying it.
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&CallView) -> bool,
    ) -> Result<CallView, CallError> {
        let mut rx = self.view.clone();
        match rx.wait_for(predicate).await {
            Ok(view) => Ok(view.clone()),
            Err(_) => Err(CallError::Ended),
        }
    }

    /// Terminates the call and waits for teardown. Safe to call any number
    /// of times, in any state.
    pub async fn end(&self) -> CallView {
        let _ = self.commands.send(CallCommand::End);
        match self.wait_until(|view| view.session.status.is_ended()).await {
            Ok(view) => view,
            Err(_) => self.view(),
        }
    }

    pub fn set_muted(&self, muted: bool) -> Result<(), CallError> {
        self.commands
            .send(CallCommand::SetMuted(muted))
            .map_err(|_| CallError::Ended)
    }

    pub fn set_camera_off(&self, off: bool) -> Result<(), CallError> {
        self.commands
            .send(CallCommand::SetCameraOff(off))
            .map_err(|_| CallError::Ended)
    }

    /// Moves to the next camera. A failure leaves the call on its current
    /// track.
    pub async fn switch_camera(&self) -> Result<(), CallError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(CallCommand::SwitchCamera(tx))
            .map_err(|_| CallError::Ended)?;
        rx.await.map_err(|_| CallError::Ended)?
    }
}

/// UI commands as seen by the coordination task.
///
/// While setup is in flight only `End` is acted on; everything else is held
/// back until the event loop starts.
struct CommandInbox {
    rx: mpsc::UnboundedReceiver<CallCommand>,
    deferred: VecDeque<CallCommand>,
    closed: bool,
}

impl CommandInbox {
    /// Runs `fut` unless `End` arrives first.
    async fn race<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                output = &mut fut => return Some(output),
                command = self.rx.recv(), if !self.closed => match command {
                    Some(CallCommand::End) => return None,
                    Some(other) => self.deferred.push_back(other),
                    None => self.closed = true,
                },
            }
        }
    }

    async fn guard<T>(
        &mut self,
        fut: impl Future<Output = Result<T, CallError>>,
    ) -> Result<T, Exit> {
        match self.race(fut).await {
            Some(result) => result.map_err(Exit::Failed),
            None => Err(Exit::Hangup(EndCallReason::LocalHangup)),
        }
    }

    async fn next(&mut self) -> CallCommand {
        if let Some(command) = self.deferred.pop_front() {
            return command;
        }
        loop {
            if self.closed {
                future::pending::<()>().await;
            }
            match self.rx.recv().await {
                Some(command) => return command,
                None => self.closed = true,
            }
        }
    }
}

/// Store-side artifact this party created and removes on teardown.
#[derive(Debug)]
enum Artifact {
    Key(String),
    /// The inbox slot of `user_id`, removed only while it still holds this
    /// session's invitation.
    Invitation { user_id: String },
}

/// Everything one call acquired, released exactly once.
pub(crate) struct SessionResources {
    store: Arc<dyn SignalingStore>,
    keys: SessionKeys,
    store_timeout: Duration,
    media: Mutex<Option<MediaStream>>,
    peer: Mutex<Option<Arc<dyn PeerSession>>>,
    tasks: Mutex<Vec<AbortHandle>>,
    artifacts: Mutex<Vec<Artifact>>,
    released: AtomicBool,
}

impl SessionResources {
    fn new(store: Arc<dyn SignalingStore>, keys: SessionKeys, store_timeout: Duration) -> Self {
        Self {
            store,
            keys,
            store_timeout,
            media: Mutex::new(None),
            peer: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            artifacts: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        }
    }

    async fn own(&self, artifact: Artifact) {
        self.artifacts.lock().await.push(artifact);
    }

    async fn track(&self, task: AbortHandle) {
        self.tasks.lock().await.push(task);
    }

    /// Stops watches, capture and the session object, writes the `ended`
    /// tombstone and deletes owned artifacts. Store failures are logged and
    /// skipped.
    pub(crate) async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let session_id = self.keys.session_id();
        debug!("Releasing resources of call {}", session_id);

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        if let Some(stream) = self.media.lock().await.take() {
            stream.stop_all();
            debug!("Stopped {} local track(s)", stream.tracks().len());
        }

        let peer = self.peer.lock().await.take();
        if let Some(peer) = peer {
            peer.close().await;
        }

        let status_key = self.keys.status();
        let written = match encode(&SignalStatus::Ended) {
            Ok(value) => {
                bounded(
                    self.store_timeout,
                    &status_key,
                    self.store.set(&status_key, value),
                )
                .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            warn!("Failed to mark call {} ended: {}", session_id, e);
        }

        let artifacts = std::mem::take(&mut *self.artifacts.lock().await);
        for artifact in artifacts {
            let result = match &artifact {
                Artifact::Key(key) => {
                    bounded(self.store_timeout, key, self.store.delete(key)).await
                }
                Artifact::Invitation { user_id } => {
                    let key = keys::incoming_call(user_id);
                    bounded(
                        self.store_timeout,
                        &key,
                        inbox::clear_invitation(self.store.as_ref(), user_id, session_id),
                    )
                    .await
                    .map(|_| ())
                }
            };
            if let Err(e) = result {
                warn!("Failed to remove {:?} of call {}: {}", artifact, session_id, e);
            }
        }
    }
}

pub(crate) enum CallSetup {
    Outgoing,
    Incoming(CallInvitation),
}

/// What a successful setup leaves for the event loop.
struct Established {
    negotiator: SessionNegotiator,
    candidates: RemoteCandidates,
    ring_deadline: Option<Instant>,
}

pub(crate) struct CallSessionController {
    local: Identity,
    env: CallEnvironment,
    config: Arc<CallConfig>,
    keys: SessionKeys,
    view: watch::Sender<CallView>,
    inbox: CommandInbox,
    events_tx: mpsc::UnboundedSender<CallEvent>,
    events: mpsc::UnboundedReceiver<CallEvent>,
    resources: Arc<SessionResources>,
    relay: CandidateRelay,
    devices: DeviceSwitcher,
}

impl CallSessionController {
    /// Spawns the coordination task for `session` and returns its handle.
    pub(crate) fn spawn(
        session: CallSession,
        setup: CallSetup,
        local: Identity,
        env: CallEnvironment,
        config: Arc<CallConfig>,
    ) -> CallHandle {
        let session_id = session.session_id.clone();
        let keys = SessionKeys::new(session_id.clone());
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let relay = CandidateRelay::new(
            Arc::clone(&env.store),
            keys.clone(),
            local.id.clone(),
            session.remote_party.id.clone(),
            config.store_timeout(),
        );
        let resources = Arc::new(SessionResources::new(
            Arc::clone(&env.store),
            keys.clone(),
            config.store_timeout(),
        ));
        let (view, view_rx) = watch::channel(CallView::new(session));

        let controller = Self {
            local,
            devices: DeviceSwitcher::new(Arc::clone(&env.media)),
            env,
            config,
            keys,
            view,
            inbox: CommandInbox {
                rx: commands_rx,
                deferred: VecDeque::new(),
                closed: false,
            },
            events_tx,
            events,
            resources,
            relay,
        };
        tokio::spawn(controller.run(setup));

        CallHandle {
            session_id,
            commands,
            view: view_rx,
        }
    }

    async fn run(mut self, setup: CallSetup) {
        let guard = scopeguard::guard(Arc::clone(&self.resources), |resources| {
            // No runtime means the process is shutting down anyway.
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    resources.release().await;
                });
            }
        });

        let exit = self.drive(setup).await;
        let _ = ScopeGuard::into_inner(guard);
        self.finish(exit).await;
    }

    async fn drive(&mut self, setup: CallSetup) -> Exit {
        let established = match setup {
            CallSetup::Outgoing => self.setup_outgoing().await,
            CallSetup::Incoming(invitation) => self.setup_incoming(invitation).await,
        };
        match established {
            Ok(established) => self.event_loop(established).await,
            Err(exit) => exit,
        }
    }

    fn session(&self) -> CallSession {
        self.view.borrow().session.clone()
    }

    fn transition(&self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let mut outcome = Ok(());
        self.view
            .send_if_modified(|view| match view.session.apply_transition(transition) {
                Ok(()) => true,
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            });
        outcome
    }

    async fn setup_outgoing(&mut self) -> Result<Established, Exit> {
        let session = self.session();
        info!(
            "Starting {} call {} to {}",
            media_kind(session.is_video),
            session.session_id,
            session.remote_party.id
        );
        let store = Arc::clone(&self.env.store);
        let limit = self.config.store_timeout();

        self.acquire_media(session.is_video).await?;
        let mut negotiator = self.open_peer(CallRole::Initiator).await?;
        self.resources
            .own(Artifact::Key(self.relay.local_key()))
            .await;

        let status_key = self.keys.status();
        let active = encode(&SignalStatus::Active).map_err(CallError::from)?;
        self.inbox
            .guard(bounded(limit, &status_key, store.set(&status_key, active)))
            .await?;

        let offer = self.inbox.guard(negotiator.create_offer()).await?;

        let invitation = CallInvitation::new(
            session.session_id.clone(),
            &self.local,
            session.is_video,
            offer,
        );
        let inbox_key = keys::incoming_call(&session.remote_party.id);
        self.resources
            .own(Artifact::Invitation {
                user_id: session.remote_party.id.clone(),
            })
            .await;
        let value = encode(&invitation).map_err(CallError::from)?;
        self.inbox
            .guard(bounded(limit, &inbox_key, store.set(&inbox_key, value)))
            .await?;
        info!("Invitation for {} written to {}", session.session_id, inbox_key);

        self.watch(self.keys.answer(), CallEvent::Answer).await?;
        self.watch(self.keys.status(), CallEvent::Status).await?;
        let candidates = self.attach_candidates(&negotiator).await?;

        Ok(Established {
            negotiator,
            candidates,
            ring_deadline: self.config.ring_timeout().map(|d| Instant::now() + d),
        })
    }

    async fn setup_incoming(&mut self, invitation: CallInvitation) -> Result<Established, Exit> {
        info!(
            "Accepting {} call {} from {}",
            media_kind(invitation.is_video),
            invitation.session_id,
            invitation.caller_id
        );
        let store = Arc::clone(&self.env.store);
        let limit = self.config.store_timeout();

        self.resources
            .own(Artifact::Invitation {
                user_id: self.local.id.clone(),
            })
            .await;
        self.resources
            .own(Artifact::Key(self.relay.local_key()))
            .await;

        self.acquire_media(invitation.is_video).await?;
        let mut negotiator = self.open_peer(CallRole::Responder).await?;
        let candidates = self.attach_candidates(&negotiator).await?;

        let answer = self
            .inbox
            .guard(negotiator.create_answer(invitation.offer))
            .await?;
        candidates.mark_remote_ready();

        let answer_key = self.keys.answer();
        self.resources.own(Artifact::Key(answer_key.clone())).await;
        let value = encode(&answer).map_err(CallError::from)?;
        self.inbox
            .guard(bounded(limit, &answer_key, store.set(&answer_key, value)))
            .await?;
        info!("Answer for {} written", invitation.session_id);

        self.watch(self.keys.status(), CallEvent::Status).await?;

        Ok(Established {
            negotiator,
            candidates,
            ring_deadline: None,
        })
    }

    async fn acquire_media(&mut self, is_video: bool) -> Result<(), Exit> {
        let media = Arc::clone(&self.env.media);
        let limit = self.config.media_timeout();
        let constraints = MediaConstraints::for_call(is_video);
        let mut acquire = Box::pin(async move {
            match tokio::time::timeout(limit, media.get_user_media(&constraints)).await {
                Ok(result) => result,
                Err(_) => Err(MediaError::Timeout),
            }
        });

        let raced = self.inbox.race(&mut acquire).await;
        let stream = match raced {
            Some(result) => result.map_err(CallError::from)?,
            None => {
                // Release the capture as soon as it resolves.
                tokio::spawn(async move {
                    if let Ok(stream) = acquire.await {
                        stream.stop_all();
                        debug!("Released capture acquired after end()");
                    }
                });
                return Err(Exit::Hangup(EndCallReason::LocalHangup));
            }
        };
        info!("Acquired {} local track(s)", stream.tracks().len());

        let has_alternate = is_video && self.devices.has_alternate_device().await;
        *self.resources.media.lock().await = Some(stream.clone());
        self.view.send_modify(|view| {
            view.local_preview = Some(stream);
            view.has_alternate_device = has_alternate;
        });
        Ok(())
    }

    async fn open_peer(&mut self, role: CallRole) -> Result<SessionNegotiator, Exit> {
        let events = self.events_tx.clone();
        let sink = PeerEventSink::new(move |event| {
            let _ = events.send(CallEvent::Peer(event));
        });
        let config = PeerSessionConfig {
            session_id: self.keys.session_id().clone(),
            local_id: self.local.id.clone(),
            ice_servers: self.config.ice_servers.clone(),
        };
        let peers = Arc::clone(&self.env.peers);
        let peer = self
            .inbox
            .guard(async move { peers.create(config, sink).await.map_err(CallError::from) })
            .await?;
        *self.resources.peer.lock().await = Some(Arc::clone(&peer));

        let tracks = self
            .resources
            .media
            .lock()
            .await
            .as_ref()
            .map(|stream| stream.tracks().to_vec())
            .unwrap_or_default();
        for track in tracks {
            let peer = Arc::clone(&peer);
            self.inbox
                .guard(async move { peer.add_track(track).await.map_err(CallError::from) })
                .await?;
        }
        Ok(SessionNegotiator::new(role, peer))
    }

    async fn attach_candidates(
        &mut self,
        negotiator: &SessionNegotiator,
    ) -> Result<RemoteCandidates, Exit> {
        let peer = Arc::clone(negotiator.peer());
        let candidates = self.inbox.guard(self.relay.attach(peer)).await?;
        for task in candidates.abort_handles() {
            self.resources.track(task).await;
        }
        Ok(candidates)
    }

    async fn watch(
        &mut self,
        key: String,
        wrap: fn(Option<Value>) -> CallEvent,
    ) -> Result<(), Exit> {
        let store = Arc::clone(&self.env.store);
        let limit = self.config.store_timeout();
        let mut snapshots = self
            .inbox
            .guard(bounded(limit, &key, store.watch(&key)))
            .await?;

        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(snapshot) = snapshots.next().await {
                if events.send(wrap(snapshot)).is_err() {
                    break;
                }
            }
        });
        self.resources.track(task.abort_handle()).await;
        debug!("Watching {}", key);
        Ok(())
    }

    async fn event_loop(&mut self, mut est: Established) -> Exit {
        loop {
            let deadline = est.ring_deadline;
            let ring = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = self.inbox.next() => {
                    if let Err(exit) = self.handle_command(command, &est).await {
                        return exit;
                    }
                }
                Some(event) = self.events.recv() => {
                    if let Err(exit) = self.handle_event(event, &mut est).await {
                        return exit;
                    }
                }
                _ = ring => {
                    warn!("Call {} was not answered in time", self.keys.session_id());
                    return Exit::Hangup(EndCallReason::NoAnswer);
                }
            }
        }
    }

    async fn handle_command(&mut self, command: CallCommand, est: &Established) -> Result<(), Exit> {
        match command {
            CallCommand::End => return Err(Exit::Hangup(EndCallReason::LocalHangup)),
            CallCommand::SetMuted(muted) => {
                self.set_track_enabled(TrackKind::Audio, !muted).await;
                self.view.send_modify(|view| view.is_muted = muted);
                debug!("Muted: {}", muted);
            }
            CallCommand::SetCameraOff(off) => {
                self.set_track_enabled(TrackKind::Video, !off).await;
                self.view.send_modify(|view| view.is_camera_off = off);
                debug!("Camera off: {}", off);
            }
            CallCommand::SwitchCamera(reply) => {
                let result = self.switch_camera(&est.negotiator).await;
                let _ = reply.send(result);
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: CallEvent, est: &mut Established) -> Result<(), Exit> {
        match event {
            CallEvent::Peer(PeerEvent::LocalCandidate(candidate)) => {
                self.relay.publish_local(candidate).await?;
            }
            CallEvent::Peer(PeerEvent::RemoteTrack(track)) => {
                info!("Remote {} track {} received", track.kind, track.id);
                self.view.send_if_modified(|view| {
                    if view.remote_tracks.iter().any(|t| t.id == track.id) {
                        return false;
                    }
                    view.remote_tracks.push(track);
                    true
                });
            }
            CallEvent::Peer(PeerEvent::ConnectionStateChanged(state)) => {
                if state.is_lost() {
                    warn!(
                        "Connection of call {} reported {:?}",
                        self.keys.session_id(),
                        state
                    );
                    return Err(Exit::Remote(CallError::ConnectionLost));
                }
                let negotiating = self.view.borrow().session.status.is_negotiating();
                if state == PeerConnectionState::Connected && negotiating {
                    self.transition(CallTransition::Connected)
                        .map_err(CallError::from)?;
                    info!("Call {} is active", self.keys.session_id());
                } else {
                    debug!("Connection state {:?}", state);
                }
            }
            CallEvent::Answer(Some(value)) => {
                let answer: SessionDescription = match decode(value) {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!("Ignoring malformed answer: {}", e);
                        return Ok(());
                    }
                };
                match est.negotiator.apply_remote_description(answer).await {
                    Ok(()) => {
                        est.candidates.mark_remote_ready();
                        est.ring_deadline = None;
                        info!("Answer applied for call {}", self.keys.session_id());
                    }
                    Err(CallError::AlreadyApplied) => {
                        debug!("Duplicate answer delivery ignored");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            CallEvent::Status(Some(value)) => match decode::<SignalStatus>(value) {
                Ok(SignalStatus::Ended) => {
                    info!("Remote party ended call {}", self.keys.session_id());
                    return Err(Exit::Remote(CallError::RemoteHangup));
                }
                Ok(SignalStatus::Active) => {}
                Err(e) => warn!("Ignoring malformed status: {}", e),
            },
            CallEvent::Answer(None) | CallEvent::Status(None) => {}
        }
        Ok(())
    }

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        if let Some(stream) = self.resources.media.lock().await.as_ref() {
            stream.set_kind_enabled(kind, enabled);
        }
    }

    async fn switch_camera(&self, negotiator: &SessionNegotiator) -> Result<(), CallError> {
        if !self.view.borrow().session.is_video {
            return Err(CallError::DeviceSwitchFailed(
                "audio-only call".to_string(),
            ));
        }
        let mut media = self.resources.media.lock().await;
        let Some(stream) = media.as_mut() else {
            return Err(CallError::Ended);
        };

        match self
            .devices
            .switch_camera(negotiator.peer().as_ref(), stream)
            .await
        {
            Ok(_) => {
                let preview = stream.clone();
                self.view.send_modify(|view| {
                    view.local_preview = Some(preview);
                    view.device_error = None;
                });
                Ok(())
            }
            Err(e) => {
                warn!("Camera switch failed, keeping current track: {}", e);
                let message = e.to_string();
                self.view
                    .send_modify(|view| view.device_error = Some(message));
                Err(e)
            }
        }
    }

    async fn finish(mut self, exit: Exit) {
        let session_id = self.keys.session_id().clone();
        let reason = match exit {
            Exit::Hangup(reason) => reason,
            Exit::Remote(err) => {
                info!("Call {} closed by remote side: {}", session_id, err);
                err.end_reason()
            }
            Exit::Failed(err) => {
                let reason = err.end_reason();
                error!("Call {} failed: {}", session_id, err);
                let shown = self.transition(CallTransition::Failed {
                    reason,
                    message: err.to_string(),
                });
                if shown.is_ok() {
                    let delay = tokio::time::sleep(self.config.failure_display());
                    if self.inbox.race(delay).await.is_none() {
                        debug!("Failure display of {} cut short", session_id);
                    }
                }
                reason
            }
        };

        self.resources.release().await;
        if let Err(e) = self.transition(CallTransition::Terminated { reason }) {
            debug!("Call {} already terminal: {}", session_id, e);
        }
        info!("Call {} ended: {}", session_id, reason);
    }
}

fn media_kind(is_video: bool) -> &'static str {
    if is_video { "video" } else { "audio" }
}
