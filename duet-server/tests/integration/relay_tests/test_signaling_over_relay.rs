use duet_client::engine::loopback::LoopbackNetwork;
use duet_client::{CallConfig, CallParams, EndReason, NoopObserver, WebSocketChannel, start_call};
use duet_core::{ConnectionState, RoomId};
use std::sync::Arc;
use std::time::Duration;

use crate::integration::init_tracing;
use crate::utils::TestRelay;

#[tokio::test]
async fn test_call_negotiates_through_relay() {
    init_tracing();

    let relay = TestRelay::start().await.expect("Failed to start relay");
    let network = LoopbackNetwork::new();
    let config = CallConfig::default()
        .with_ice_servers(Vec::new())
        .with_offer_resend(Duration::from_millis(100));

    let alice = start_call(
        network.endpoint().backend(),
        Arc::new(WebSocketChannel::new(relay.ws_url())),
        &config,
        CallParams::new(RoomId::from("relay-room"), "alice".into(), "bob".into()),
        Arc::new(NoopObserver),
    )
    .await
    .expect("alice failed to start");

    let bob = start_call(
        network.endpoint().backend(),
        Arc::new(WebSocketChannel::new(relay.ws_url())),
        &config,
        CallParams::new(RoomId::from("relay-room"), "bob".into(), "alice".into()),
        Arc::new(NoopObserver),
    )
    .await
    .expect("bob failed to start");

    for handle in [&alice, &bob] {
        let mut states = handle.state_changes();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .expect("peer never connected over the relay")
        .unwrap();
    }

    alice.end_call().await;
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(2), bob.closed())
            .await
            .unwrap(),
        EndReason::ConnectionLost(ConnectionState::Disconnected)
    );
    assert!(relay.wait_for_subscribers("webrtc:relay-room", 0, 2000).await);
    assert_eq!(network.open_connections(), 0);
}
