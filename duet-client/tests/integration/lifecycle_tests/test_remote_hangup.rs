use duet_client::{CallPhase, EndReason};
use duet_core::{ConnectionState, PresenceStatus, RoomStatus};
use std::time::Duration;

use crate::integration::init_tracing;
use crate::utils::{CONNECT_TIMEOUT_MS, CallEvent, TEARDOWN_TIMEOUT_MS, TestWorld};

#[tokio::test]
async fn test_remote_hangup_ends_call_for_other_side() {
    init_tracing();

    let world = TestWorld::new();
    let alice = world.participant("alice");
    let bob = world.participant("bob");
    let room = world
        .matcher
        .create_room(alice.id.clone(), bob.id.clone())
        .await
        .unwrap();
    let topic = room.id.signal_topic();

    let mut bob_ctl = world.controller(&bob);
    let mut alice_ctl = world.controller(&alice);
    bob_ctl
        .start_call(room.id.clone(), alice.id.clone())
        .await
        .unwrap();
    alice_ctl
        .start_call(room.id.clone(), bob.id.clone())
        .await
        .unwrap();

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

    let mut phases = alice_ctl.phases();
    bob_ctl.end_call().await.unwrap();

    let lost = EndReason::ConnectionLost(ConnectionState::Disconnected);
    assert_eq!(
        alice.observer.wait_for_end(TEARDOWN_TIMEOUT_MS).await,
        Some(lost)
    );
    tokio::time::timeout(
        Duration::from_millis(TEARDOWN_TIMEOUT_MS),
        phases.wait_for(|p| matches!(p, CallPhase::CallEnded { .. })),
    )
    .await
    .expect("alice's phase never changed")
    .unwrap();
    assert_eq!(alice_ctl.phase(), CallPhase::CallEnded { reason: lost });

    let events = alice.observer.events();
    assert!(events.contains(&CallEvent::State(ConnectionState::Disconnected)));
    assert_eq!(events.last(), Some(&CallEvent::Ended(lost)));

    assert_eq!(alice.endpoint.live_tracks(), 0);
    assert_eq!(alice.endpoint.open_connections(), 0);
    assert!(world.wait_for_subscribers(&topic, 0, TEARDOWN_TIMEOUT_MS).await);
    assert!(!alice_ctl.session().unwrap().is_active());

    // Room and presence cleanup run in the background after a remote end.
    let start = std::time::Instant::now();
    while world.matcher.presence(&alice.id).await != Some(PresenceStatus::Idle) {
        assert!(start.elapsed() < Duration::from_millis(TEARDOWN_TIMEOUT_MS));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        world.matcher.room(&room.id).await.map(|r| r.status),
        Some(RoomStatus::Ended)
    );

    // Ending an already ended call is accepted and changes nothing.
    alice_ctl.end_call().await.unwrap();
    assert_eq!(alice_ctl.phase(), CallPhase::CallEnded { reason: lost });
}

#[tokio::test]
async fn test_searching_again_right_after_remote_hangup_keeps_matching_presence() {
    init_tracing();

    let world = TestWorld::new();
    let alice = world.participant("alice");
    let bob = world.participant("bob");
    let room = world
        .matcher
        .create_room(alice.id.clone(), bob.id.clone())
        .await
        .unwrap();

    let mut bob_ctl = world.controller(&bob);
    let mut alice_ctl = world.controller(&alice);
    bob_ctl
        .start_call(room.id.clone(), alice.id.clone())
        .await
        .unwrap();
    alice_ctl
        .start_call(room.id.clone(), bob.id.clone())
        .await
        .unwrap();
    assert!(
        alice
            .observer
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT_MS)
            .await
    );

    let mut phases = alice_ctl.phases();
    bob_ctl.end_call().await.unwrap();
    tokio::time::timeout(
        Duration::from_millis(TEARDOWN_TIMEOUT_MS),
        phases.wait_for(|p| matches!(p, CallPhase::CallEnded { .. })),
    )
    .await
    .expect("alice's phase never changed")
    .unwrap();

    // Search again before the background cleanup had a chance to run.
    let search = tokio::spawn(async move {
        let result = alice_ctl.find_match().await;
        (alice_ctl, result)
    });
    assert!(world.wait_for_waiting(1, TEARDOWN_TIMEOUT_MS).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        world.matcher.presence(&alice.id).await,
        Some(PresenceStatus::Matching)
    );
    assert_eq!(
        world.matcher.room(&room.id).await.map(|r| r.status),
        Some(RoomStatus::Ended)
    );

    world.matcher.cancel(&alice.id).await;
    let (alice_ctl, result) = search.await.unwrap();
    assert!(result.is_err());
    assert_eq!(alice_ctl.phase(), CallPhase::Idle);
}
