use crate::error::SignalingError;
use crate::signaling::{RealtimeChannel, Subscription};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct HubInner {
    topics: DashMap<String, Vec<(Uuid, mpsc::UnboundedSender<String>)>>,
    history: DashMap<String, Vec<String>>,
    fail_publish: AtomicBool,
}

/// Process-local broadcast hub.
///
/// Clones share the same topics, so every participant of a test can hold its
/// own handle.
#[derive(Clone, Default)]
pub struct InMemoryChannel {
    inner: Arc<HubInner>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.get(topic).map_or(0, |subs| subs.len())
    }

    /// Every payload successfully published to `topic`, oldest first.
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.inner
            .history
            .get(topic)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Makes subsequent publishes fail until switched back.
    pub fn fail_publishes(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RealtimeChannel for InMemoryChannel {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, SignalingError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.inner
            .topics
            .entry(topic.to_owned())
            .or_default()
            .push((id, tx));
        debug!("Subscribed {} to {}", id, topic);

        Ok(Subscription {
            id,
            topic: topic.to_owned(),
            receiver: rx,
        })
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), SignalingError> {
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(SignalingError::Publish(format!("{topic} is unreachable")));
        }

        if let Some(mut subs) = self.inner.topics.get_mut(topic) {
            subs.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        }
        self.inner
            .history
            .entry(topic.to_owned())
            .or_default()
            .push(payload);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, subscription: Uuid) {
        let now_empty = match self.inner.topics.get_mut(topic) {
            Some(mut subs) => {
                subs.retain(|(id, _)| *id != subscription);
                subs.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.inner.topics.remove_if(topic, |_, subs| subs.is_empty());
        }
        debug!("Unsubscribed {} from {}", subscription, topic);
    }
}
