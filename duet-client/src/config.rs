use duet_core::{IceServerConfig, MediaConstraints};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call settings shared by every session a controller starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub ice_servers: Vec<IceServerConfig>,
    pub media: MediaConstraints,
    /// How long a session may stay unconnected before it is reported as stalled.
    pub connect_timeout_ms: u64,
    /// How often an unanswered offer is published again.
    pub offer_resend_ms: u64,
}

impl CallConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn offer_resend_interval(&self) -> Duration {
        Duration::from_millis(self.offer_resend_ms.max(1))
    }

    pub fn with_ice_servers(mut self, ice_servers: Vec<IceServerConfig>) -> Self {
        self.ice_servers = ice_servers;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_offer_resend(mut self, interval: Duration) -> Self {
        self.offer_resend_ms = interval.as_millis() as u64;
        self
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: IceServerConfig::default_stun(),
            media: MediaConstraints::default(),
            connect_timeout_ms: 30_000,
            offer_resend_ms: 1_000,
        }
    }
}
