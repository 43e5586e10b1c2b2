use axum::http::StatusCode;
use duet_client::{RealtimeChannel, WebSocketChannel};

use crate::integration::init_tracing;
use crate::utils::TestRelay;

#[tokio::test]
async fn test_health_and_stats() {
    init_tracing();

    let relay = TestRelay::start().await.expect("Failed to start relay");

    let (status, body) = relay.get("/health").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let (status, body) = relay.get("/stats").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    let stats: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stats["topics"], 0);
    assert_eq!(stats["subscribers"], 0);

    let client = WebSocketChannel::new(relay.ws_url());
    let _sub = client.subscribe("webrtc:stats").await.unwrap();
    assert!(relay.wait_for_subscribers("webrtc:stats", 1, 2000).await);

    let (_, body) = relay.get("/stats").await.unwrap();
    let stats: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stats["topics"], 1);
    assert_eq!(stats["subscribers"], 1);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let relay = TestRelay::start().await.expect("Failed to start relay");

    let (status, body) = relay.get("/nope").await.unwrap();
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
}
