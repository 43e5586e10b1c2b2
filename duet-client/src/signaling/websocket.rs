use crate::error::SignalingError;
use crate::signaling::{RealtimeChannel, Subscription};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

type Subscribers = Arc<DashMap<Uuid, mpsc::UnboundedSender<String>>>;

struct TopicSocket {
    outbound: mpsc::UnboundedSender<Message>,
    subscribers: Subscribers,
    task: JoinHandle<()>,
}

impl TopicSocket {
    fn is_closed(&self) -> bool {
        self.outbound.is_closed() || self.task.is_finished()
    }
}

/// Client of the `duet-server` relay. One socket per topic, shared by all
/// local subscribers of that topic.
pub struct WebSocketChannel {
    base_url: String,
    sockets: Mutex<HashMap<String, TopicSocket>>,
}

impl WebSocketChannel {
    /// `base_url` is the relay root, e.g. `ws://127.0.0.1:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            sockets: Mutex::new(HashMap::new()),
        }
    }

    async fn connect(&self, topic: &str) -> Result<TopicSocket, SignalingError> {
        let url = format!("{}/ws/{}", self.base_url, topic);
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SignalingError::Subscribe(format!("{url}: {e}")))?;
        info!("Connected to relay topic {}", topic);

        let (mut ws_write, mut ws_read) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let subscribers: Subscribers = Arc::new(DashMap::new());

        let fan_out = Arc::clone(&subscribers);
        let topic_name = topic.to_owned();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = outbound_rx.recv() => {
                        let Some(msg) = msg else { break };
                        if ws_write.send(msg).await.is_err() {
                            break;
                        }
                    }
                    frame = ws_read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let text = text.as_str().to_owned();
                            fan_out.retain(|_, tx| tx.send(text.clone()).is_ok());
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Relay socket for {} failed: {}", topic_name, e);
                            break;
                        }
                    }
                }
            }
            let _ = ws_write.close().await;
            // Marks the socket closed before its subscriptions end.
            drop(outbound_rx);
            fan_out.clear();
            debug!("Relay socket for {} closed", topic_name);
        });

        Ok(TopicSocket {
            outbound,
            subscribers,
            task,
        })
    }
}

#[async_trait]
impl RealtimeChannel for WebSocketChannel {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, SignalingError> {
        let mut sockets = self.sockets.lock().await;
        if sockets.get(topic).is_some_and(TopicSocket::is_closed) {
            info!("Relay socket for {} is gone, reconnecting", topic);
            sockets.remove(topic);
        }
        if !sockets.contains_key(topic) {
            let socket = self.connect(topic).await?;
            sockets.insert(topic.to_owned(), socket);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        if let Some(socket) = sockets.get(topic) {
            socket.subscribers.insert(id, tx);
        }

        Ok(Subscription {
            id,
            topic: topic.to_owned(),
            receiver: rx,
        })
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), SignalingError> {
        let sockets = self.sockets.lock().await;
        let socket = sockets
            .get(topic)
            .ok_or_else(|| SignalingError::Publish(format!("not connected to {topic}")))?;
        socket
            .outbound
            .send(Message::text(payload))
            .map_err(|_| SignalingError::Publish(format!("relay socket for {topic} is gone")))
    }

    async fn unsubscribe(&self, topic: &str, subscription: Uuid) {
        let mut sockets = self.sockets.lock().await;
        let Some(socket) = sockets.get(topic) else {
            return;
        };
        socket.subscribers.remove(&subscription);

        if socket.subscribers.is_empty() {
            if let Some(socket) = sockets.remove(topic) {
                // Dropping the sender lets the task flush and close the socket.
                drop(socket.outbound);
                drop(socket.task);
            }
        }
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        if let Ok(mut sockets) = self.sockets.try_lock() {
            for (_, socket) in sockets.drain() {
                socket.task.abort();
            }
        }
    }
}
