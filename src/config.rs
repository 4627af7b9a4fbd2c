use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::calls::media::IceServer;

/// Tunables for the call subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Reachability-hint servers handed to every peer session object.
    pub ice_servers: Vec<IceServer>,
    /// Give up on an unanswered outgoing call after this long. 0 disables.
    pub ring_timeout_secs: u64,
    /// How long a setup failure stays on screen before teardown.
    pub failure_display_ms: u64,
    pub media_timeout_secs: u64,
    /// Applies to every store write and watch registration.
    pub store_timeout_secs: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
            ring_timeout_secs: 45,
            failure_display_ms: 3000,
            media_timeout_secs: 20,
            store_timeout_secs: 10,
        }
    }
}

impl CallConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn ring_timeout(&self) -> Option<Duration> {
        (self.ring_timeout_secs > 0).then(|| Duration::from_secs(self.ring_timeout_secs))
    }

    pub fn failure_display(&self) -> Duration {
        Duration::from_millis(self.failure_display_ms)
    }

    pub fn media_timeout(&self) -> Duration {
        Duration::from_secs(self.media_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CallConfig::from_json(r#"{"ring_timeout_secs": 0}"#).unwrap();
        assert_eq!(config.ring_timeout(), None);
        assert_eq!(config.failure_display(), Duration::from_millis(3000));
        assert_eq!(config.ice_servers.len(), 1);
    }

    #[test]
    fn test_ice_servers_from_json() {
        let config = CallConfig::from_json(
            r#"{"ice_servers": [{"urls": ["stun:a.example:3478", "stun:b.example:3478"]}]}"#,
        )
        .unwrap();
        assert_eq!(config.ice_servers[0].urls.len(), 2);
        assert_eq!(config.ice_servers[0].username, None);
        assert_eq!(config.ring_timeout(), Some(Duration::from_secs(45)));
    }
}
