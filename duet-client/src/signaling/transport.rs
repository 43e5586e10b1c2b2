use crate::error::SignalingError;
use crate::signaling::RealtimeChannel;
use duet_core::{RoomId, SignalMessage};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

type SignalHandler = Arc<dyn Fn(SignalMessage) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub room_id: RoomId,
    pub topic: String,
}

struct OpenRoom {
    handle: ChannelHandle,
    subscription: Uuid,
    pump: JoinHandle<()>,
}

/// Relays [`SignalMessage`]s over a room's topic.
///
/// Handlers see every message on the topic, including this side's own.
/// Filtering by receiver is up to the caller.
pub struct SignalingTransport {
    channel: Arc<dyn RealtimeChannel>,
    open: AsyncMutex<Option<OpenRoom>>,
    handlers: Arc<Mutex<Vec<SignalHandler>>>,
}

impl SignalingTransport {
    pub fn new(channel: Arc<dyn RealtimeChannel>) -> Self {
        Self {
            channel,
            open: AsyncMutex::new(None),
            handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribes to the room topic. Re-opening the same room returns the
    /// existing handle.
    pub async fn open(&self, room_id: &RoomId) -> Result<ChannelHandle, SignalingError> {
        let mut open = self.open.lock().await;
        if let Some(current) = open.as_ref() {
            if &current.handle.room_id == room_id {
                return Ok(current.handle.clone());
            }
            return Err(SignalingError::RoomMismatch {
                open: current.handle.room_id.to_string(),
                requested: room_id.to_string(),
            });
        }

        let topic = room_id.signal_topic();
        let mut subscription = self.channel.subscribe(&topic).await?;
        let subscription_id = subscription.id;
        info!("Signaling opened on {}", topic);

        let handlers = Arc::clone(&self.handlers);
        let pump_topic = topic.clone();
        let pump = tokio::spawn(async move {
            while let Some(raw) = subscription.receiver.recv().await {
                match serde_json::from_str::<SignalMessage>(&raw) {
                    Ok(message) => {
                        let current: Vec<SignalHandler> = handlers
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .clone();
                        for handler in current {
                            handler(message.clone());
                        }
                    }
                    Err(e) => warn!("Dropping undecodable payload on {}: {}", pump_topic, e),
                }
            }
            debug!("Signaling pump for {} finished", pump_topic);
        });

        let handle = ChannelHandle {
            room_id: room_id.clone(),
            topic,
        };
        *open = Some(OpenRoom {
            handle: handle.clone(),
            subscription: subscription_id,
            pump,
        });
        Ok(handle)
    }

    /// Registers a handler for every message published on the room topic.
    ///
    /// Handlers added before `open` see the first message.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(SignalMessage) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Publishes `message` on the open room's topic.
    ///
    /// Failures are logged and returned; negotiation does not depend on
    /// any single message going through.
    pub async fn send(&self, message: &SignalMessage) -> Result<(), SignalingError> {
        let topic = match self.open.lock().await.as_ref() {
            Some(open) => open.handle.topic.clone(),
            None => {
                warn!("Dropping {:?} signal: transport is not open", message.kind());
                return Err(SignalingError::NotOpen);
            }
        };

        let payload = serde_json::to_string(message)?;
        if let Err(e) = self.channel.publish(&topic, payload).await {
            warn!("Failed to publish {:?} on {}: {}", message.kind(), topic, e);
            return Err(e);
        }
        Ok(())
    }

    pub async fn handle(&self) -> Option<ChannelHandle> {
        self.open.lock().await.as_ref().map(|o| o.handle.clone())
    }

    /// Unsubscribes from the room topic. Further calls do nothing.
    pub async fn close(&self) {
        let Some(open) = self.open.lock().await.take() else {
            return;
        };
        open.pump.abort();
        self.channel
            .unsubscribe(&open.handle.topic, open.subscription)
            .await;
        info!("Signaling closed on {}", open.handle.topic);
    }
}
