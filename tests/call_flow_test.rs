//! End-to-end call flow over the in-memory relay and loopback transport

mod common;

use common::{fixture, start_both, wait_for, SlowBackend};
use duocall::application::{CallController, CallStatus};
use duocall::config::Config;
use duocall::domain::relay::RelayStore;
use duocall::domain::room::Role;
use duocall::infrastructure::relay::InMemoryRelay;
use duocall::infrastructure::transport::loopback::{LoopbackFactory, LoopbackPair};
use duocall::CallError;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_two_party_call_connects() {
    let f = fixture();

    assert_eq!(f.alice.role(), Role::Initiator);
    assert_eq!(f.bob.role(), Role::Receiver);
    assert_eq!(f.alice.room(), f.bob.room());

    start_both(&f).await;

    assert_eq!(f.alice.status(), CallStatus::Connected);
    assert_eq!(f.bob.status(), CallStatus::Connected);
}

#[tokio::test]
async fn test_relay_key_layout() {
    let f = fixture();
    start_both(&f).await;

    let room = format!("rooms/{}", f.alice.room());
    assert_eq!(f.relay.key_count(&format!("{room}/offer")).await, 1);
    assert_eq!(f.relay.key_count(&format!("{room}/answer")).await, 1);
    assert!(f.relay.key_count(&format!("{room}/candidates/initiator")).await >= 1);
    assert!(f.relay.key_count(&format!("{room}/candidates/receiver")).await >= 1);
}

#[tokio::test]
async fn test_receiver_joining_late_still_connects() {
    // the initiator's offer and candidates are already on the relay when
    // the receiver subscribes; replay must deliver them in whatever
    // order, including candidates ahead of the description
    let f = fixture();

    f.alice.start_call().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    f.bob.start_call().await.unwrap();

    wait_for(&f.alice, |s| *s == CallStatus::Connected).await;
    wait_for(&f.bob, |s| *s == CallStatus::Connected).await;
}

#[tokio::test]
async fn test_start_call_twice_is_invalid() {
    let f = fixture();
    start_both(&f).await;

    let err = f.alice.start_call().await.unwrap_err();
    assert!(matches!(err, CallError::InvalidOperation(_)));
    // the active call is unaffected
    assert_eq!(f.alice.status(), CallStatus::Connected);
}

#[tokio::test]
async fn test_end_call_is_idempotent_and_scrubs_room() {
    let f = fixture();
    start_both(&f).await;
    let room = format!("rooms/{}", f.alice.room());
    assert!(f.relay.key_count(&room).await > 0);

    f.alice.end_call().await;
    f.alice.end_call().await;

    assert_eq!(f.alice.status(), CallStatus::Ended);
    assert_eq!(f.relay.key_count(&room).await, 0);
    assert!(f.alice.local_stream().await.is_none());

    // a later subscriber sees a clean room, not stale negotiation data
    let mut offer_rx = f
        .relay
        .subscribe_value(&format!("{room}/offer"))
        .await
        .unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(100), offer_rx.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_end_call_during_acquisition_is_not_resurrected() {
    let relay = Arc::new(InMemoryRelay::new());
    let (a, _b) = LoopbackPair::new();
    let alice = Arc::new(
        CallController::join(
            "https://calls.test/call",
            relay,
            Arc::new(SlowBackend::new(Duration::from_millis(200))),
            Arc::new(LoopbackFactory::new(a)),
            Config::default(),
        )
        .unwrap(),
    );

    let starter = {
        let alice = alice.clone();
        tokio::spawn(async move { alice.start_call().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    alice.end_call().await;

    // hanging up wins the race: the late-resolving acquisition is
    // discarded, its capture released, and the status stays Ended
    let outcome = starter.await.unwrap();
    assert!(matches!(outcome, Err(CallError::SessionClosed)));
    assert_eq!(alice.status(), CallStatus::Ended);
    assert!(alice.local_stream().await.is_none());
}

#[tokio::test]
async fn test_end_call_when_idle_reports_ended() {
    let f = fixture();
    f.alice.end_call().await;
    assert_eq!(f.alice.status(), CallStatus::Ended);
    assert!(f.alice.local_stream().await.is_none());
}

#[tokio::test]
async fn test_peer_hangup_reports_connection_lost() {
    let f = fixture();
    start_both(&f).await;

    f.alice.end_call().await;

    wait_for(&f.bob, |s| *s == CallStatus::ConnectionLost).await;
    f.bob.end_call().await;
    assert_eq!(f.bob.status(), CallStatus::Ended);
}

#[tokio::test]
async fn test_connectivity_failure_recovers_through_restart() {
    let f = fixture();
    start_both(&f).await;

    // first failure triggers exactly one path restart, which succeeds
    f.alice_transport.inject_connectivity_failure().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.alice.status(), CallStatus::Connected);
}

#[tokio::test]
async fn test_second_connectivity_failure_is_terminal() {
    let f = fixture();
    start_both(&f).await;

    f.alice_transport.inject_connectivity_failure().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the one restart is spent; the next failure ends the session
    f.alice_transport.inject_connectivity_failure().await;
    wait_for(&f.alice, |s| matches!(s, CallStatus::Failed(_))).await;
}

#[tokio::test]
async fn test_failed_restart_is_terminal() {
    let f = fixture();
    start_both(&f).await;

    f.alice_transport.set_recover_on_restart(false).await;
    f.alice_transport.inject_connectivity_failure().await;

    wait_for(&f.alice, |s| matches!(s, CallStatus::Failed(_))).await;
}

#[tokio::test]
async fn test_permission_denied_fails_call_start() {
    let f = fixture();
    f.alice_backend.deny_permission();

    let err = f.alice.start_call().await.unwrap_err();
    assert!(matches!(err, CallError::PermissionDenied(_)));
    assert!(matches!(f.alice.status(), CallStatus::Failed(_)));
    assert!(f.alice.local_stream().await.is_none());
}

#[tokio::test]
async fn test_duplicate_offer_is_ignored() {
    let f = fixture();
    start_both(&f).await;

    // republishing the offer must not disturb an established session
    let room = f.alice.room().clone();
    let offer_path = format!("rooms/{room}/offer");
    f.relay
        .set(
            &offer_path,
            r#"{"type":"offer","sdp":"v=0 replayed"}"#.to_string(),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.bob.status(), CallStatus::Connected);
}

#[tokio::test]
async fn test_malformed_relay_payload_is_skipped() {
    let f = fixture();

    f.bob.start_call().await.unwrap();
    let room = f.bob.room().clone();
    f.relay
        .set(&format!("rooms/{room}/offer"), "not json".to_string())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // the bad value was skipped; a valid offer still connects the call
    f.alice.start_call().await.unwrap();
    wait_for(&f.alice, |s| *s == CallStatus::Connected).await;
    wait_for(&f.bob, |s| *s == CallStatus::Connected).await;
}
