use duet_client::EndReason;
use duet_core::{ConnectionState, SignalKind, SignalMessage};
use std::time::Duration;

use crate::integration::init_tracing;
use crate::utils::{TEARDOWN_TIMEOUT_MS, TestWorld, test_config};

#[tokio::test]
async fn test_absent_partner_stalls_and_releases() {
    init_tracing();

    let world = TestWorld::new();
    let alice = world.participant("alice");
    let bob = world.participant("bob");
    let config = test_config().with_connect_timeout(Duration::from_millis(300));

    let a = world
        .start(&alice, "room-empty", &bob, &config)
        .await
        .expect("alice failed to start");
    assert_eq!(a.connection_state(), ConnectionState::New);

    let reason = tokio::time::timeout(Duration::from_millis(TEARDOWN_TIMEOUT_MS), a.closed())
        .await
        .expect("session never gave up");
    assert_eq!(reason, EndReason::NegotiationStall);
    assert_eq!(a.end_reason(), Some(EndReason::NegotiationStall));
    assert!(!a.is_active());

    assert_eq!(alice.observer.ended(), Some(EndReason::NegotiationStall));
    assert_eq!(
        alice.observer.states().last(),
        Some(&ConnectionState::Closed)
    );
    assert_eq!(alice.endpoint.live_tracks(), 0);
    assert_eq!(alice.endpoint.open_connections(), 0);
    assert_eq!(world.hub.subscriber_count("webrtc:room-empty"), 0);

    let offers = world
        .hub
        .published("webrtc:room-empty")
        .iter()
        .filter_map(|raw| serde_json::from_str::<SignalMessage>(raw).ok())
        .filter(|m| m.kind() == SignalKind::Offer)
        .count();
    assert!(offers >= 2, "offer should be repeated while waiting, saw {offers}");

    // Toggling after the end is refused rather than silently ignored.
    assert!(a.toggle_video(false).await.is_err());
}
