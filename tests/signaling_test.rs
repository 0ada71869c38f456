//! Signaling engine integration tests
//!
//! Two (or three) engines sharing one in-memory store, each pumped
//! explicitly so every interleaving is deterministic.

use holler::config::SignalingConfig;
use holler::domain::call::{CallLifecycleEvent, CallType, DeclineReason, ParticipantStatus};
use holler::domain::shared::error::SignalingError;
use holler::domain::shared::value_objects::{CallId, UserId};
use holler::domain::signaling::SignalingEngine;
use holler::domain::call::CallStore;
use holler::infrastructure::store::MemoryStore;
use holler::CallStatus;
use std::sync::Arc;
use tokio::sync::broadcast;

fn engine(store: &Arc<MemoryStore>, user: &str) -> (SignalingEngine, broadcast::Receiver<CallLifecycleEvent>) {
    let mut engine = SignalingEngine::new(store.clone(), SignalingConfig::default());
    let events = engine.subscribe_events();
    engine.sign_in(UserId::from(user));
    (engine, events)
}

fn drain(rx: &mut broadcast::Receiver<CallLifecycleEvent>) -> Vec<CallLifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Accepted, declined, canceled and timed-out are mutually exclusive
/// and emitted at most once per call per identity.
fn assert_resolution_exclusive(events: &[CallLifecycleEvent], call_id: &CallId) {
    let resolutions = events
        .iter()
        .filter(|e| e.call_id() == call_id && e.is_resolution())
        .count();
    assert!(resolutions <= 1, "multiple resolution events: {:?}", events);
}

fn record_of(store: &MemoryStore, call_id: &CallId) -> holler::CallRecord {
    serde_json::from_value(store.document(call_id).expect("record missing")).unwrap()
}

#[tokio::test]
async fn accept_converges_on_both_engines() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut alice_events) = engine(&store, "alice");
    let (mut bob, mut bob_events) = engine(&store, "bob");

    let call_id = alice
        .start_call(&[UserId::from("bob")], CallType::Video)
        .await
        .unwrap();
    alice.pump().await;
    bob.pump().await;

    let incoming = drain(&mut bob_events);
    assert_eq!(
        incoming,
        vec![CallLifecycleEvent::IncomingCall {
            call_id: call_id.clone(),
            caller_id: UserId::from("alice"),
            call_type: CallType::Video,
        }]
    );
    // the caller does not ring itself
    assert!(drain(&mut alice_events).is_empty());

    bob.accept_call().await.unwrap();
    alice.pump().await;
    bob.pump().await;

    let accepted = CallLifecycleEvent::Accepted {
        call_id: call_id.clone(),
        callee_id: UserId::from("bob"),
    };
    assert_eq!(drain(&mut alice_events), vec![accepted.clone()]);
    assert_eq!(drain(&mut bob_events), vec![accepted]);

    let record = record_of(&store, &call_id);
    assert_eq!(record.call_status, CallStatus::Connected);
    for user in record.users.values() {
        assert_eq!(user.status, ParticipantStatus::Connected);
        assert!(user.connected_time > 0);
    }
}

#[tokio::test]
async fn ended_call_notifies_only_the_remote_party() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut alice_events) = engine(&store, "alice");
    let (mut bob, mut bob_events) = engine(&store, "bob");

    let call_id = alice
        .start_call(&[UserId::from("bob")], CallType::Voice)
        .await
        .unwrap();
    alice.pump().await;
    bob.pump().await;
    bob.accept_call().await.unwrap();
    alice.pump().await;
    bob.pump().await;
    drain(&mut alice_events);
    drain(&mut bob_events);

    alice.end_call().await.unwrap();
    alice.pump().await;
    bob.pump().await;

    // the ender already knows; only bob is notified, naming alice
    assert!(drain(&mut alice_events).is_empty());
    assert_eq!(
        drain(&mut bob_events),
        vec![CallLifecycleEvent::Ended {
            call_id: call_id.clone(),
            other_id: UserId::from("alice"),
        }]
    );

    let record = record_of(&store, &call_id);
    assert_eq!(record.call_status, CallStatus::Finished);
    for user in record.users.values() {
        assert_eq!(user.status, ParticipantStatus::Finished);
        assert!(user.finish_time > 0);
    }
    assert!(alice.is_idle());
    assert!(bob.is_idle());
}

#[tokio::test]
async fn busy_callee_auto_declines_without_ringing() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut alice_events) = engine(&store, "alice");
    let (mut bob, mut bob_events) = engine(&store, "bob");
    let (mut carol, mut carol_events) = engine(&store, "carol");

    // bob is already on a live call with carol
    carol
        .start_call(&[UserId::from("bob")], CallType::Voice)
        .await
        .unwrap();
    carol.pump().await;
    bob.pump().await;
    bob.accept_call().await.unwrap();
    carol.pump().await;
    bob.pump().await;
    alice.pump().await;
    drain(&mut bob_events);
    drain(&mut carol_events);

    let call_id = alice
        .start_call(&[UserId::from("bob")], CallType::Video)
        .await
        .unwrap();
    bob.pump().await;
    carol.pump().await;
    alice.pump().await;

    // no incoming-call surfaced on the busy side
    assert!(drain(&mut bob_events).is_empty());
    assert!(drain(&mut carol_events).is_empty());
    assert_eq!(
        drain(&mut alice_events),
        vec![CallLifecycleEvent::Declined {
            call_id: call_id.clone(),
            callee_id: UserId::from("bob"),
            reason: DeclineReason::Busy,
        }]
    );

    let record = record_of(&store, &call_id);
    assert_eq!(record.call_status, CallStatus::Finished);
    assert_eq!(
        record.users[&UserId::from("bob")].status,
        ParticipantStatus::Busy
    );
    assert!(alice.is_idle());
    // bob's first call is untouched
    assert!(!bob.is_idle());
}

#[tokio::test]
async fn overlapping_invitations_ring_once_and_keep_the_first_call() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut alice_events) = engine(&store, "alice");
    let (mut bob, mut bob_events) = engine(&store, "bob");
    let (mut carol, mut carol_events) = engine(&store, "carol");

    // both invitations land before bob processes either
    let first = alice
        .start_call(&[UserId::from("bob")], CallType::Voice)
        .await
        .unwrap();
    let second = carol
        .start_call(&[UserId::from("bob")], CallType::Voice)
        .await
        .unwrap();
    bob.pump().await;
    alice.pump().await;
    carol.pump().await;

    // bob rings exactly once, for the earlier call
    assert_eq!(
        drain(&mut bob_events),
        vec![CallLifecycleEvent::IncomingCall {
            call_id: first.clone(),
            caller_id: UserId::from("alice"),
            call_type: CallType::Voice,
        }]
    );
    assert_eq!(
        drain(&mut carol_events),
        vec![CallLifecycleEvent::Declined {
            call_id: second.clone(),
            callee_id: UserId::from("bob"),
            reason: DeclineReason::Busy,
        }]
    );
    assert_eq!(
        record_of(&store, &second).call_status,
        CallStatus::Finished
    );

    bob.accept_call().await.unwrap();
    alice.pump().await;
    bob.pump().await;
    drain(&mut alice_events);
    drain(&mut bob_events);

    // the resolved second call leaves no subscription behind: nothing
    // it does later can displace the live call from bob's active slot
    store.remove_document(&second).await.unwrap();
    bob.pump().await;
    assert!(drain(&mut bob_events).is_empty());
    assert_eq!(bob.active_call().unwrap().call_id, first);
    bob.send_heartbeat().await.unwrap();
}

#[tokio::test]
async fn cancel_scenario_rejects_callee_and_converges() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut alice_events) = engine(&store, "alice");
    let (mut bob, mut bob_events) = engine(&store, "bob");

    let call_id = alice
        .start_call(&[UserId::from("bob")], CallType::Voice)
        .await
        .unwrap();
    alice.pump().await;
    bob.pump().await;
    drain(&mut bob_events);

    let record = record_of(&store, &call_id);
    assert_eq!(record.call_status, CallStatus::Waiting);
    for user in record.users.values() {
        assert_eq!(user.status, ParticipantStatus::Waiting);
        assert_eq!(user.caller_id, UserId::from("alice"));
    }

    // bob is not the caller; cancel is rejected before any write
    let err = bob.cancel_call().await.unwrap_err();
    assert!(matches!(err, SignalingError::Precondition(_)));

    alice.cancel_call().await.unwrap();
    alice.pump().await;
    bob.pump().await;

    let canceled = CallLifecycleEvent::Canceled {
        call_id: call_id.clone(),
        callee_id: UserId::from("bob"),
    };
    assert_eq!(drain(&mut alice_events), vec![canceled.clone()]);
    assert_eq!(drain(&mut bob_events), vec![canceled]);

    let record = record_of(&store, &call_id);
    assert_eq!(record.call_status, CallStatus::Finished);
    for user in record.users.values() {
        assert_eq!(user.status, ParticipantStatus::Canceled);
    }
}

#[tokio::test]
async fn silent_peer_times_out_on_both_sides_without_a_write() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut alice_events) = engine(&store, "alice");
    let (mut bob, mut bob_events) = engine(&store, "bob");

    let call_id = alice
        .start_call(&[UserId::from("bob")], CallType::Voice)
        .await
        .unwrap();
    alice.pump().await;
    bob.pump().await;
    bob.accept_call().await.unwrap();
    alice.pump().await;
    bob.pump().await;

    alice.send_heartbeat().await.unwrap();
    bob.send_heartbeat().await.unwrap();
    alice.pump().await;
    bob.pump().await;
    drain(&mut alice_events);
    drain(&mut bob_events);

    // bob goes silent past the liveness threshold
    store.advance_clock(61_000);
    alice.send_heartbeat().await.unwrap();
    let snapshot_before = store.document(&call_id).unwrap();
    alice.pump().await;
    bob.pump().await;

    assert_eq!(
        drain(&mut alice_events),
        vec![CallLifecycleEvent::TimedOut {
            call_id: call_id.clone(),
            other_id: UserId::from("bob"),
        }]
    );
    assert_eq!(
        drain(&mut bob_events),
        vec![CallLifecycleEvent::TimedOut {
            call_id: call_id.clone(),
            other_id: UserId::from("alice"),
        }]
    );

    // the timeout is a purely local inference: no write accompanied it
    assert_eq!(store.document(&call_id).unwrap(), snapshot_before);
    assert!(alice.is_idle());
    assert!(bob.is_idle());
}

#[tokio::test]
async fn created_record_reads_back_equal() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, _alice_events) = engine(&store, "alice");
    let (mut bob, _bob_events) = engine(&store, "bob");

    let call_id = alice
        .start_call(&[UserId::from("bob")], CallType::Video)
        .await
        .unwrap();
    alice.pump().await;
    bob.pump().await;

    // what the subscription delivered equals what the caller wrote
    let written = alice.active_call().unwrap().clone();
    let read_back = bob.active_call().unwrap().clone();
    assert_eq!(written, read_back);
    assert_eq!(record_of(&store, &call_id), written);
}

#[tokio::test]
async fn decline_after_finished_has_no_observable_effect() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut alice_events) = engine(&store, "alice");
    let (mut bob, mut bob_events) = engine(&store, "bob");

    let call_id = alice
        .start_call(&[UserId::from("bob")], CallType::Voice)
        .await
        .unwrap();
    alice.pump().await;
    bob.pump().await;
    drain(&mut bob_events);

    bob.decline_call(DeclineReason::Declined).await.unwrap();
    alice.pump().await;
    bob.pump().await;

    assert_eq!(
        drain(&mut alice_events),
        vec![CallLifecycleEvent::Declined {
            call_id: call_id.clone(),
            callee_id: UserId::from("bob"),
            reason: DeclineReason::Declined,
        }]
    );
    // the decliner initiated the outcome; it is not re-notified
    assert!(drain(&mut bob_events).is_empty());

    // a second decline is rejected before any write and emits nothing
    let err = bob.decline_call(DeclineReason::Declined).await.unwrap_err();
    assert!(matches!(err, SignalingError::Precondition(_)));
    bob.pump().await;
    alice.pump().await;
    assert!(drain(&mut alice_events).is_empty());
    assert!(drain(&mut bob_events).is_empty());

    let record = record_of(&store, &call_id);
    assert_eq!(
        record.users[&UserId::from("alice")].status,
        ParticipantStatus::Declined
    );
}

#[tokio::test]
async fn record_removal_is_an_out_of_band_finish() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut alice_events) = engine(&store, "alice");
    let (mut bob, mut bob_events) = engine(&store, "bob");

    let call_id = alice
        .start_call(&[UserId::from("bob")], CallType::Voice)
        .await
        .unwrap();
    alice.pump().await;
    bob.pump().await;
    drain(&mut bob_events);

    // the record disappears while still waiting
    store.remove_document(&call_id).await.unwrap();
    alice.pump().await;
    bob.pump().await;

    // caller side reads the vanishing as a decline, callee as a cancel;
    // the duplicate removed/child-removed deliveries collapse into one
    let alice_seen = drain(&mut alice_events);
    assert_eq!(
        alice_seen,
        vec![CallLifecycleEvent::Declined {
            call_id: call_id.clone(),
            callee_id: UserId::from("bob"),
            reason: DeclineReason::Declined,
        }]
    );
    let bob_seen = drain(&mut bob_events);
    assert_eq!(
        bob_seen,
        vec![CallLifecycleEvent::Canceled {
            call_id: call_id.clone(),
            callee_id: UserId::from("bob"),
        }]
    );
    assert_resolution_exclusive(&alice_seen, &call_id);
    assert_resolution_exclusive(&bob_seen, &call_id);
    assert!(alice.is_idle());
    assert!(bob.is_idle());
}

#[tokio::test]
async fn connected_record_removal_reads_as_ended() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut alice_events) = engine(&store, "alice");
    let (mut bob, mut bob_events) = engine(&store, "bob");

    let call_id = alice
        .start_call(&[UserId::from("bob")], CallType::Voice)
        .await
        .unwrap();
    alice.pump().await;
    bob.pump().await;
    bob.accept_call().await.unwrap();
    alice.pump().await;
    bob.pump().await;
    drain(&mut alice_events);
    drain(&mut bob_events);

    store.remove_document(&call_id).await.unwrap();
    alice.pump().await;
    bob.pump().await;

    assert_eq!(
        drain(&mut alice_events),
        vec![CallLifecycleEvent::Ended {
            call_id: call_id.clone(),
            other_id: UserId::from("bob"),
        }]
    );
    assert_eq!(
        drain(&mut bob_events),
        vec![CallLifecycleEvent::Ended {
            call_id: call_id.clone(),
            other_id: UserId::from("alice"),
        }]
    );
}

#[tokio::test]
async fn lifecycle_emits_at_most_one_resolution_event() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut alice_events) = engine(&store, "alice");
    let (mut bob, mut bob_events) = engine(&store, "bob");

    let call_id = alice
        .start_call(&[UserId::from("bob")], CallType::Voice)
        .await
        .unwrap();
    alice.pump().await;
    bob.pump().await;
    bob.accept_call().await.unwrap();
    alice.pump().await;
    bob.pump().await;
    bob.end_call().await.unwrap();
    alice.pump().await;
    bob.pump().await;

    let alice_seen = drain(&mut alice_events);
    let bob_seen = drain(&mut bob_events);
    assert_resolution_exclusive(&alice_seen, &call_id);
    assert_resolution_exclusive(&bob_seen, &call_id);
    // ending after accept reaches only the non-ending side
    assert!(alice_seen.contains(&CallLifecycleEvent::Ended {
        call_id: call_id.clone(),
        other_id: UserId::from("bob"),
    }));
    assert!(!bob_seen
        .iter()
        .any(|e| matches!(e, CallLifecycleEvent::Ended { .. })));
}

#[tokio::test]
async fn sign_out_stops_collection_deliveries() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, _alice_events) = engine(&store, "alice");
    let (mut bob, mut bob_events) = engine(&store, "bob");

    bob.sign_out();

    alice
        .start_call(&[UserId::from("bob")], CallType::Voice)
        .await
        .unwrap();
    alice.pump().await;
    bob.pump().await;

    // no collection stream, no incoming call
    assert!(drain(&mut bob_events).is_empty());
    assert!(bob.is_idle());
}

#[tokio::test]
async fn start_call_requires_idle() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, _alice_events) = engine(&store, "alice");

    alice
        .start_call(&[UserId::from("bob")], CallType::Voice)
        .await
        .unwrap();
    let err = alice
        .start_call(&[UserId::from("carol")], CallType::Voice)
        .await
        .unwrap_err();
    assert!(matches!(err, SignalingError::Precondition(_)));
}
