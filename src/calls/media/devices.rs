use async_trait::async_trait;
use thiserror::Error;

use super::track::MediaStream;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("no capture device: {0}")]
    NoDevice(String),

    #[error("device {0} unavailable")]
    DeviceUnavailable(String),

    #[error("timed out waiting for capture")]
    Timeout,

    #[error("capture error: {0}")]
    Other(String),
}

/// What to capture. Audio is always requested for calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    /// Pin video capture to a specific device.
    pub video_device_id: Option<String>,
}

impl MediaConstraints {
    pub fn for_call(is_video: bool) -> Self {
        Self {
            audio: true,
            video: is_video,
            video_device_id: None,
        }
    }

    pub fn video_device(device_id: impl Into<String>) -> Self {
        Self {
            audio: false,
            video: true,
            video_device_id: Some(device_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDeviceInfo {
    pub device_id: String,
    pub label: String,
}

impl VideoDeviceInfo {
    pub fn new(device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
        }
    }
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: &MediaConstraints)
    -> Result<MediaStream, MediaError>;

    async fn enumerate_video_devices(&self) -> Result<Vec<VideoDeviceInfo>, MediaError>;
}
