//! Mid-call camera switching.

use log::{info, warn};
use std::sync::Arc;

use super::error::CallError;
use super::media::{
    LocalTrack, MediaConstraints, MediaDevices, MediaStream, PeerSession, TrackKind,
};

/// Replaces the outbound video track without renegotiating.
pub struct DeviceSwitcher {
    media: Arc<dyn MediaDevices>,
}

impl DeviceSwitcher {
    pub fn new(media: Arc<dyn MediaDevices>) -> Self {
        Self { media }
    }

    pub async fn has_alternate_device(&self) -> bool {
        match self.media.enumerate_video_devices().await {
            Ok(devices) => devices.len() >= 2,
            Err(e) => {
                warn!("Failed to enumerate video devices: {}", e);
                false
            }
        }
    }

    /// Moves to the next camera in enumeration order.
    ///
    /// On success `stream` holds the new track and the old one is stopped. On
    /// any failure `stream` and the sender are left untouched.
    pub async fn switch_camera(
        &self,
        peer: &dyn PeerSession,
        stream: &mut MediaStream,
    ) -> Result<LocalTrack, CallError> {
        let devices = self
            .media
            .enumerate_video_devices()
            .await
            .map_err(|e| CallError::DeviceSwitchFailed(e.to_string()))?;
        if devices.len() < 2 {
            return Err(CallError::NoAlternateDevice);
        }

        let current = stream.video_track().and_then(|t| t.device_id());
        let index = current
            .and_then(|id| devices.iter().position(|d| d.device_id == id))
            .unwrap_or(0);
        let next = &devices[(index + 1) % devices.len()];

        let acquired = self
            .media
            .get_user_media(&MediaConstraints::video_device(&next.device_id))
            .await
            .map_err(|e| CallError::DeviceSwitchFailed(e.to_string()))?;
        let Some(track) = acquired.video_track().cloned() else {
            acquired.stop_all();
            return Err(CallError::DeviceSwitchFailed(format!(
                "{} produced no video track",
                next.device_id
            )));
        };

        if let Err(e) = peer.replace_track(TrackKind::Video, Arc::clone(&track)).await {
            acquired.stop_all();
            return Err(CallError::DeviceSwitchFailed(e.to_string()));
        }

        let enabled = stream.video_track().is_none_or(|t| t.is_enabled());
        track.set_enabled(enabled);
        if let Some(old) = stream.replace_video_track(Arc::clone(&track)) {
            old.stop();
        }
        info!("Switched camera to {} ({})", next.label, next.device_id);
        Ok(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::media::loopback::{LoopbackDevices, LoopbackPeerFactory};
    use crate::calls::media::{PeerEventSink, PeerSessionConfig, PeerSessionFactory};
    use peercall_core::types::SessionId;

    async fn setup(
        cameras: usize,
    ) -> (
        Arc<LoopbackDevices>,
        LoopbackPeerFactory,
        Arc<dyn PeerSession>,
        MediaStream,
    ) {
        let devices = Arc::new(LoopbackDevices::with_cameras(cameras));
        let factory = LoopbackPeerFactory::manual();
        let peer = factory
            .create(
                PeerSessionConfig {
                    session_id: SessionId::new("alice_1"),
                    local_id: "alice".into(),
                    ice_servers: Vec::new(),
                },
                PeerEventSink::new(|_| {}),
            )
            .await
            .unwrap();
        let stream = devices
            .get_user_media(&MediaConstraints::for_call(true))
            .await
            .unwrap();
        for track in stream.tracks() {
            peer.add_track(Arc::clone(track)).await.unwrap();
        }
        (devices, factory, peer, stream)
    }

    fn device_of(stream: &MediaStream) -> String {
        stream
            .video_track()
            .and_then(|t| t.device_id())
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_single_camera_has_no_alternate() {
        let (devices, _factory, peer, mut stream) = setup(1).await;
        let switcher = DeviceSwitcher::new(devices.clone());
        assert!(!switcher.has_alternate_device().await);

        let before = stream.video_track().unwrap().id().to_string();
        let err = switcher
            .switch_camera(peer.as_ref(), &mut stream)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::NoAlternateDevice));
        assert_eq!(stream.video_track().unwrap().id(), before);
        assert!(stream.video_track().unwrap().is_live());
    }

    #[tokio::test]
    async fn test_switch_cycles_through_cameras() {
        let (devices, factory, peer, mut stream) = setup(3).await;
        let switcher = DeviceSwitcher::new(devices.clone());
        assert!(switcher.has_alternate_device().await);
        let inspect = factory.peer("alice_1", "alice").unwrap();

        let first = Arc::clone(stream.video_track().unwrap());
        let mut seen = Vec::new();
        for _ in 0..3 {
            switcher
                .switch_camera(peer.as_ref(), &mut stream)
                .await
                .unwrap();
            seen.push(device_of(&stream));
        }
        assert_eq!(seen, vec!["cam-1", "cam-2", "cam-0"]);
        assert!(!first.is_live());
        assert_eq!(inspect.replaced_tracks().len(), 3);
        assert_eq!(
            inspect.sending_track(TrackKind::Video).unwrap().id(),
            stream.video_track().unwrap().id()
        );
        // Audio plus the current camera.
        assert_eq!(devices.live_tracks(), 2);
    }

    #[tokio::test]
    async fn test_failed_acquisition_keeps_current_track() {
        let (devices, factory, peer, mut stream) = setup(2).await;
        devices.set_unavailable("cam-1");
        let switcher = DeviceSwitcher::new(devices.clone());

        let err = switcher
            .switch_camera(peer.as_ref(), &mut stream)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::DeviceSwitchFailed(_)));
        assert_eq!(device_of(&stream), "cam-0");
        assert!(stream.video_track().unwrap().is_live());
        assert!(
            factory
                .peer("alice_1", "alice")
                .unwrap()
                .replaced_tracks()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_switch_preserves_camera_off() {
        let (devices, _factory, peer, mut stream) = setup(2).await;
        stream.set_kind_enabled(TrackKind::Video, false);
        let switcher = DeviceSwitcher::new(devices);

        let track = switcher
            .switch_camera(peer.as_ref(), &mut stream)
            .await
            .unwrap();
        assert!(!track.is_enabled());
    }
}
