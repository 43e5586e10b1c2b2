use anyhow::{Context, Result};
use duet_client::engine::loopback::{LoopbackEndpoint, LoopbackNetwork};
use duet_client::{
    CallConfig, CallController, CallParams, InMemoryChannel, InMemoryMatchmaker, SessionHandle,
    start_call,
};
use duet_core::{ParticipantId, RoomId};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::recording_observer::RecordingObserver;

/// Timeout for a pair of sessions to connect (ms).
pub const CONNECT_TIMEOUT_MS: u64 = 5000;

/// Timeout for teardown to become visible (ms).
pub const TEARDOWN_TIMEOUT_MS: u64 = 2000;

/// Config with short timers so failures surface quickly.
pub fn test_config() -> CallConfig {
    CallConfig::default()
        .with_ice_servers(Vec::new())
        .with_connect_timeout(Duration::from_secs(3))
        .with_offer_resend(Duration::from_millis(50))
}

/// One simulated user: its own devices and observer.
pub struct Participant {
    pub id: ParticipantId,
    pub endpoint: LoopbackEndpoint,
    pub observer: RecordingObserver,
}

/// Shared infrastructure every participant of a test talks through.
#[derive(Clone, Default)]
pub struct TestWorld {
    pub network: LoopbackNetwork,
    pub hub: InMemoryChannel,
    pub matcher: InMemoryMatchmaker,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn participant(&self, id: &str) -> Participant {
        Participant {
            id: ParticipantId::from(id),
            endpoint: self.network.endpoint(),
            observer: RecordingObserver::new(),
        }
    }

    /// Starts a bare session for `who` calling `remote` in `room`.
    pub async fn start(
        &self,
        who: &Participant,
        room: &str,
        remote: &Participant,
        config: &CallConfig,
    ) -> Result<SessionHandle> {
        let params = CallParams::new(RoomId::from(room), who.id.clone(), remote.id.clone());
        start_call(
            who.endpoint.backend(),
            Arc::new(self.hub.clone()),
            config,
            params,
            Arc::new(who.observer.clone()),
        )
        .await
        .with_context(|| format!("Failed to start call for {}", who.id))
    }

    pub fn controller(&self, who: &Participant) -> CallController {
        CallController::new(
            who.id.clone(),
            who.endpoint.backend(),
            Arc::new(self.hub.clone()),
            Arc::new(self.matcher.clone()),
            test_config(),
            Arc::new(who.observer.clone()),
        )
    }

    /// Polls until `count` participants sit in the match queue.
    pub async fn wait_for_waiting(&self, count: usize, timeout_ms: u64) -> bool {
        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);

        loop {
            if self.matcher.waiting().await >= count {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Polls until `topic` has exactly `count` subscribers.
    pub async fn wait_for_subscribers(&self, topic: &str, count: usize, timeout_ms: u64) -> bool {
        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);

        loop {
            if self.hub.subscriber_count(topic) == count {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
