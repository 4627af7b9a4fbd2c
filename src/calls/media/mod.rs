//! Collaborator seams for local capture and the underlying peer session.
//!
//! The subsystem never talks to a camera or a network stack directly. It
//! drives these traits, which a platform layer implements.
//!
//! # Architecture
//!
//! - [`MediaDevices`]: capture acquisition and video device enumeration
//! - [`MediaTrack`], [`MediaStream`]: handles to live local capture
//! - [`PeerSessionFactory`], [`PeerSession`]: the peer session object
//! - [`PeerEventSink`]: where the session object reports remote tracks,
//!   local candidates and connection-state changes
//! - [`loopback`]: in-process implementations of all of the above
//! - `webrtc` (cargo feature `webrtc`): a [`PeerSessionFactory`] backed by
//!   a real `RTCPeerConnection`

mod devices;
pub mod loopback;
mod peer;
mod track;
#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use devices::{MediaConstraints, MediaDevices, MediaError, VideoDeviceInfo};
pub use peer::{
    IceServer, PeerConnectionState, PeerError, PeerEvent, PeerEventSink, PeerSession,
    PeerSessionConfig, PeerSessionFactory,
};
pub use track::{LocalTrack, MediaStream, MediaTrack, RemoteTrack, TrackKind};
#[cfg(feature = "webrtc")]
pub use self::webrtc::{WebRtcPeer, WebRtcPeerFactory};
