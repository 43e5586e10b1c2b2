use duet_client::{RealtimeChannel, WebSocketChannel};

use crate::integration::init_tracing;
use crate::utils::{TestRelay, recv_text};

#[tokio::test]
async fn test_broadcast_reaches_topic_including_sender() {
    init_tracing();

    let relay = TestRelay::start().await.expect("Failed to start relay");
    let alice = WebSocketChannel::new(relay.ws_url());
    let bob = WebSocketChannel::new(relay.ws_url());
    let carol = WebSocketChannel::new(relay.ws_url());

    let mut alice_sub = alice.subscribe("webrtc:r1").await.unwrap();
    let mut bob_sub = bob.subscribe("webrtc:r1").await.unwrap();
    let mut carol_sub = carol.subscribe("webrtc:r2").await.unwrap();
    assert!(relay.wait_for_subscribers("webrtc:r1", 2, 2000).await);
    assert!(relay.wait_for_subscribers("webrtc:r2", 1, 2000).await);

    for i in 0..5 {
        alice
            .publish("webrtc:r1", format!("msg-{i}"))
            .await
            .unwrap();
    }

    for i in 0..5 {
        let expected = format!("msg-{i}");
        assert_eq!(recv_text(&mut bob_sub, 2000).await, Some(expected.clone()));
        assert_eq!(recv_text(&mut alice_sub, 2000).await, Some(expected));
    }
    assert_eq!(recv_text(&mut carol_sub, 200).await, None);
}
