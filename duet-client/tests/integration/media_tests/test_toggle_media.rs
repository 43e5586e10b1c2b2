use duet_core::{ConnectionState, MediaKind};
use std::time::Duration;

use crate::integration::init_tracing;
use crate::utils::{CONNECT_TIMEOUT_MS, TestWorld, test_config};

#[tokio::test]
async fn test_toggles_do_not_renegotiate() {
    init_tracing();

    let world = TestWorld::new();
    let alice = world.participant("alice");
    let bob = world.participant("bob");
    let config = test_config();

    let b = world.start(&bob, "room-4", &alice, &config).await.unwrap();
    let a = world.start(&alice, "room-4", &bob, &config).await.unwrap();
    assert!(
        alice
            .observer
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT_MS)
            .await
    );
    assert!(
        bob.observer
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT_MS)
            .await
    );
    let published_before = world.hub.published("webrtc:room-4").len();
    let bob_events_before = bob.observer.events().len();

    a.toggle_video(false).await.unwrap();
    a.toggle_audio(false).await.unwrap();

    for track in a.local_stream().tracks() {
        assert!(!track.is_enabled(), "{} track still enabled", track.kind());
        assert!(track.is_live(), "{} track was stopped", track.kind());
    }
    assert_eq!(alice.endpoint.live_tracks(), 2);

    a.toggle_audio(true).await.unwrap();
    assert!(
        a.local_stream()
            .tracks_of(MediaKind::Audio)
            .all(|t| t.is_enabled())
    );
    assert!(
        a.local_stream()
            .tracks_of(MediaKind::Video)
            .all(|t| !t.is_enabled())
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(world.hub.published("webrtc:room-4").len(), published_before);
    assert_eq!(bob.observer.events().len(), bob_events_before);
    assert_eq!(a.connection_state(), ConnectionState::Connected);

    a.end_call().await;
    b.end_call().await;
}
