use duet_client::{CallController, CallPhase, EndReason};
use duet_core::{ConnectionState, ParticipantId, RoomId, RoomStatus};
use std::time::Duration;

use crate::integration::init_tracing;
use crate::utils::{CONNECT_TIMEOUT_MS, CallEvent, TEARDOWN_TIMEOUT_MS, TestWorld};

fn current_room(controller: &CallController) -> (RoomId, ParticipantId) {
    match controller.phase() {
        CallPhase::InCall { room_id, remote_id } => (room_id, remote_id),
        other => panic!("expected to be in a call, got {other:?}"),
    }
}

#[tokio::test]
async fn test_skip_releases_old_call_before_next() {
    init_tracing();

    let world = TestWorld::new();
    let alice = world.participant("alice");
    let bob = world.participant("bob");
    let carol = world.participant("carol");

    let mut bob_ctl = world.controller(&bob);
    let bob_search = tokio::spawn(async move {
        bob_ctl.find_match().await.map(|_| bob_ctl)
    });
    assert!(world.wait_for_waiting(1, CONNECT_TIMEOUT_MS).await);

    let mut alice_ctl = world.controller(&alice);
    alice_ctl.find_match().await.unwrap();
    let bob_ctl = bob_search.await.unwrap().unwrap();

    let (first_room, first_remote) = current_room(&alice_ctl);
    assert_eq!(first_remote, bob.id);
    assert!(alice_ctl.session().unwrap().params().is_initiator);
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

    let mut carol_ctl = world.controller(&carol);
    let carol_search = tokio::spawn(async move {
        carol_ctl.find_match().await.map(|_| carol_ctl)
    });
    assert!(world.wait_for_waiting(1, CONNECT_TIMEOUT_MS).await);

    alice_ctl.skip_to_next_match().await.unwrap();
    let carol_ctl = carol_search.await.unwrap().unwrap();

    let (second_room, second_remote) = current_room(&alice_ctl);
    assert_eq!(second_remote, carol.id);
    assert_ne!(second_room, first_room);
    assert!(
        alice
            .observer
            .wait_until(CONNECT_TIMEOUT_MS, |events| {
                events
                    .iter()
                    .filter(|e| **e == CallEvent::State(ConnectionState::Connected))
                    .count()
                    == 2
            })
            .await
    );
    assert!(
        carol
            .observer
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT_MS)
            .await
    );

    // The old call was fully released before new media was acquired.
    assert_eq!(alice.endpoint.peak_live_tracks(), 2);
    assert_eq!(alice.endpoint.live_tracks(), 2);
    assert_eq!(alice.endpoint.acquisitions(), 2);
    assert_eq!(alice.endpoint.open_connections(), 1);
    assert!(
        world
            .wait_for_subscribers(&first_room.signal_topic(), 0, TEARDOWN_TIMEOUT_MS)
            .await
    );

    let events = alice.observer.events();
    let ended_at = events
        .iter()
        .position(|e| *e == CallEvent::Ended(EndReason::Skipped))
        .expect("first call never reported as skipped");
    let last_local = events
        .iter()
        .rposition(|e| matches!(e, CallEvent::LocalStream(_)))
        .unwrap();
    assert!(ended_at < last_local);

    assert_eq!(
        bob.observer.wait_for_end(TEARDOWN_TIMEOUT_MS).await,
        Some(EndReason::ConnectionLost(ConnectionState::Disconnected))
    );
    assert_eq!(
        bob_ctl.phase(),
        CallPhase::CallEnded {
            reason: EndReason::ConnectionLost(ConnectionState::Disconnected)
        }
    );
    assert_eq!(
        world.matcher.room(&first_room).await.map(|r| r.status),
        Some(RoomStatus::Ended)
    );
    assert_eq!(current_room(&carol_ctl).0, second_room);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(alice_ctl.session().unwrap().is_active());
}
