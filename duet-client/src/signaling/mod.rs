mod memory;
mod transport;
#[cfg(feature = "websocket")]
mod websocket;

pub use memory::InMemoryChannel;
pub use transport::{ChannelHandle, SignalingTransport};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketChannel;

use crate::error::SignalingError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One subscriber's view of a topic.
#[derive(Debug)]
pub struct Subscription {
    pub id: Uuid,
    pub topic: String,
    pub receiver: mpsc::UnboundedReceiver<String>,
}

/// Topic-based broadcast substrate.
///
/// Every payload published to a topic reaches every current subscriber of
/// that topic, the publisher included, in publish order.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, SignalingError>;

    async fn publish(&self, topic: &str, payload: String) -> Result<(), SignalingError>;

    async fn unsubscribe(&self, topic: &str, subscription: Uuid);
}
