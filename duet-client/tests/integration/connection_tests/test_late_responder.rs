use duet_core::{ConnectionState, SignalKind, SignalMessage};
use std::time::Duration;

use crate::integration::init_tracing;
use crate::utils::{CONNECT_TIMEOUT_MS, TestWorld, test_config};

#[tokio::test]
async fn test_late_responder_still_connects() {
    init_tracing();

    let world = TestWorld::new();
    let alice = world.participant("alice");
    let bob = world.participant("bob");
    let config = test_config();

    let a = world
        .start(&alice, "room-late", &bob, &config)
        .await
        .expect("alice failed to start");

    // Let the first offer go out to an empty room.
    tokio::time::sleep(Duration::from_millis(120)).await;
    let b = world
        .start(&bob, "room-late", &alice, &config)
        .await
        .expect("bob failed to start");

    assert!(
        bob.observer
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT_MS)
            .await
    );
    assert!(
        alice
            .observer
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT_MS)
            .await
    );

    let offers = world
        .hub
        .published("webrtc:room-late")
        .iter()
        .filter_map(|raw| serde_json::from_str::<SignalMessage>(raw).ok())
        .filter(|m| m.kind() == SignalKind::Offer)
        .count();
    assert!(offers >= 2, "expected the offer to be repeated, saw {offers}");

    a.end_call().await;
    b.end_call().await;
}
