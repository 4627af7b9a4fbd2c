pub mod call;

pub use call::{
    CallInvitation, CallRole, CandidateInit, EndCallReason, IceCandidate, Identity, SdpKind,
    SessionDescription, SessionId, SignalStatus,
};
