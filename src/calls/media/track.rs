use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// A live local capture track.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    /// Capture device backing this track, if known.
    fn device_id(&self) -> Option<&str>;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Releases the device. Stopping twice is a no-op.
    fn stop(&self);
    fn is_live(&self) -> bool;
}

pub type LocalTrack = Arc<dyn MediaTrack>;

/// Local capture: one audio track and, for video calls, one video track.
#[derive(Debug, Clone, Default)]
pub struct MediaStream {
    tracks: Vec<LocalTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn video_track(&self) -> Option<&LocalTrack> {
        self.video_tracks().next()
    }

    /// Swaps the video track in place and returns the one it replaced.
    pub fn replace_video_track(&mut self, track: LocalTrack) -> Option<LocalTrack> {
        match self
            .tracks
            .iter_mut()
            .find(|t| t.kind() == TrackKind::Video)
        {
            Some(slot) => Some(std::mem::replace(slot, track)),
            None => {
                self.tracks.push(track);
                None
            }
        }
    }

    pub fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// A track received from the remote party, handed to the UI for playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub stream_id: String,
}
