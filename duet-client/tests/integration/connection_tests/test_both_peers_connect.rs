use duet_core::{ConnectionState, MediaKind};

use crate::integration::init_tracing;
use crate::utils::{CONNECT_TIMEOUT_MS, CallEvent, TestWorld, test_config};

#[tokio::test]
async fn test_both_peers_connect() {
    init_tracing();

    let world = TestWorld::new();
    let alice = world.participant("alice");
    let bob = world.participant("bob");
    let config = test_config();

    // Responder first, so the first offer already has an audience.
    let b = world
        .start(&bob, "room-1", &alice, &config)
        .await
        .expect("bob failed to start");
    let a = world
        .start(&alice, "room-1", &bob, &config)
        .await
        .expect("alice failed to start");

    assert!(a.params().is_initiator);
    assert!(!b.params().is_initiator);

    assert!(
        alice
            .observer
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT_MS)
            .await,
        "alice never connected"
    );
    assert!(
        bob.observer
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT_MS)
            .await,
        "bob never connected"
    );

    assert_eq!(a.connection_state(), ConnectionState::Connected);
    assert_eq!(b.connection_state(), ConnectionState::Connected);
    assert_eq!(
        alice.observer.states(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );

    assert!(a.remote_stream().has_kind(MediaKind::Video));
    assert!(a.remote_stream().has_kind(MediaKind::Audio));
    assert_eq!(b.remote_stream().len(), 2);

    let events = alice.observer.events();
    assert!(matches!(events[0], CallEvent::LocalStream(_)));
    assert_eq!(events[1], CallEvent::RemoteStream);

    a.end_call().await;
    b.end_call().await;
    assert_eq!(alice.endpoint.live_tracks(), 0);
    assert_eq!(bob.endpoint.live_tracks(), 0);
    assert_eq!(world.network.open_connections(), 0);
}
