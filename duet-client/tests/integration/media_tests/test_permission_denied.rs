use duet_client::{CallPhase, EndReason, MediaError};
use duet_core::{ConnectionState, PresenceStatus, RoomId};

use crate::integration::init_tracing;
use crate::utils::{CONNECT_TIMEOUT_MS, TestWorld, test_config};

#[tokio::test]
async fn test_permission_denied_sends_nothing_and_retry_recovers() {
    init_tracing();

    let world = TestWorld::new();
    let alice = world.participant("alice");
    let bob = world.participant("bob");
    let topic = RoomId::from("room-2").signal_topic();

    alice.endpoint.deny_permission(true);
    let mut controller = world.controller(&alice);

    let err = controller
        .start_call(RoomId::from("room-2"), bob.id.clone())
        .await
        .expect_err("start_call should fail without camera access");

    assert!(err.is_media_access_error());
    assert_eq!(
        controller.phase(),
        CallPhase::MediaBlocked {
            error: MediaError::PermissionDenied
        }
    );
    assert!(world.hub.published(&topic).is_empty(), "no offer may be sent");
    assert_eq!(world.hub.subscriber_count(&topic), 0);
    assert_eq!(alice.endpoint.live_tracks(), 0);
    assert_eq!(alice.endpoint.open_connections(), 0);
    assert!(alice.observer.events().is_empty());
    assert!(controller.session().is_none());

    // The user fixes their settings; the whole setup runs again.
    alice.endpoint.deny_permission(false);
    let b = world
        .start(&bob, "room-2", &alice, &test_config())
        .await
        .expect("bob failed to start");

    controller.retry().await.expect("retry failed");
    assert!(matches!(controller.phase(), CallPhase::InCall { .. }));
    assert!(
        alice
            .observer
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT_MS)
            .await
    );
    assert_eq!(alice.endpoint.acquisitions(), 1);
    assert_eq!(
        world.matcher.presence(&alice.id).await,
        Some(PresenceStatus::InCall)
    );

    controller.end_call().await.expect("end_call failed");
    assert_eq!(
        controller.phase(),
        CallPhase::CallEnded {
            reason: EndReason::LocalHangup
        }
    );
    assert_eq!(alice.endpoint.live_tracks(), 0);
    assert_eq!(
        world.matcher.presence(&alice.id).await,
        Some(PresenceStatus::Idle)
    );

    b.end_call().await;
}
