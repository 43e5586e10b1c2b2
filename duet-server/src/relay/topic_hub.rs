use axum::extract::ws::Message;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

type Outbox = mpsc::UnboundedSender<Message>;

/// Snapshot of the relay's load, served on `/stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub topics: usize,
    pub subscribers: usize,
}

#[derive(Default)]
struct HubInner {
    topics: DashMap<String, Vec<(Uuid, Outbox)>>,
}

/// Topic table shared by every socket of the relay.
#[derive(Clone, Default)]
pub struct TopicHub {
    inner: Arc<HubInner>,
}

impl TopicHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str, outbox: Outbox) -> Uuid {
        let id = Uuid::new_v4();
        self.inner
            .topics
            .entry(topic.to_owned())
            .or_default()
            .push((id, outbox));
        debug!("Subscriber {} joined {}", id, topic);
        id
    }

    pub fn unsubscribe(&self, topic: &str, id: Uuid) {
        let now_empty = match self.inner.topics.get_mut(topic) {
            Some(mut subs) => {
                subs.retain(|(sub, _)| *sub != id);
                subs.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.inner.topics.remove_if(topic, |_, subs| subs.is_empty());
            debug!("Topic {} has no subscribers left", topic);
        }
    }

    /// Sends `text` to every subscriber of `topic`, the sender included.
    /// Returns how many subscribers it reached.
    pub fn broadcast(&self, topic: &str, text: &str) -> usize {
        let Some(mut subs) = self.inner.topics.get_mut(topic) else {
            warn!("Dropping message for empty topic {}", topic);
            return 0;
        };
        subs.retain(|(id, outbox)| {
            let alive = outbox.send(Message::Text(text.into())).is_ok();
            if !alive {
                debug!("Pruning closed subscriber {} of {}", id, topic);
            }
            alive
        });
        subs.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.get(topic).map_or(0, |subs| subs.len())
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            topics: self.inner.topics.len(),
            subscribers: self.inner.topics.iter().map(|t| t.value().len()).sum(),
        }
    }
}
