//! Call signaling and peer-session negotiation.
//!
//! Two clients that cannot reach each other directly establish a media
//! session by exchanging session descriptions and reachability candidates
//! through a shared, watched key-value store.
//!
//! # Architecture
//!
//! - [`CallManager`]: per-user entry point (start, accept, reject, end) and
//!   the incoming-call feed
//! - [`CallHandle`]: UI-facing handle to one running call and its [`CallView`]
//! - [`CallSession`] & [`CallStatus`]: call state machine for tracking the
//!   lifecycle of one attempt
//! - [`SessionNegotiator`]: offer/answer sequencing with the "apply the
//!   remote description once" guard
//! - [`CandidateRelay`]: trickle exchange of candidates, applied in arrival
//!   order once the remote description is in place
//! - [`DeviceSwitcher`]: mid-call camera replacement without renegotiation
//! - [`media`]: collaborator seams for capture and the peer session object
//!
//! # Protocol Overview
//!
//! The initiator writes `active` to `calls/{sid}/status`, creates an offer and
//! places a [`CallInvitation`](peercall_core::types::CallInvitation) in the
//! responder's `users/{uid}/incomingCall` slot. The responder applies the
//! offer, writes its answer to `calls/{sid}/answer` and both sides append
//! candidates to `calls/{sid}/candidates/{owner}`. Either side ends the call
//! by writing `ended` to the status key.

mod controller;
mod device;
mod error;
mod inbox;
mod manager;
pub mod media;
mod negotiator;
mod relay;
mod state;

pub use controller::{CallEnvironment, CallHandle};
pub use device::DeviceSwitcher;
pub use error::CallError;
pub use inbox::incoming_invitations;
pub use manager::CallManager;
pub use negotiator::{NegotiationState, SessionNegotiator};
pub use relay::{CandidateLedger, CandidateRelay, RemoteCandidates};
pub use state::{CallSession, CallStatus, CallTransition, CallView, InvalidTransition};
