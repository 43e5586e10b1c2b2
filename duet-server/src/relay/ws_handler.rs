use crate::relay::TopicHub;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(topic): Path<String>,
    State(hub): State<TopicHub>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, topic, hub))
}

async fn handle_socket(socket: WebSocket, topic: String, hub: TopicHub) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscriber = hub.subscribe(&topic, tx);
    info!("Subscriber {} connected to {}", subscriber, topic);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn({
        let hub = hub.clone();
        let topic = topic.clone();

        async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => {
                        let reached = hub.broadcast(&topic, text.as_str());
                        debug!("Relayed {} bytes on {} to {}", text.len(), topic, reached);
                    }
                    Message::Binary(_) => {
                        warn!("Ignoring binary frame from {} on {}", subscriber, topic);
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    hub.unsubscribe(&topic, subscriber);
    info!("Subscriber {} left {}", subscriber, topic);
}
