//! Integration tests for push intake

mod common;

use callbridge_core::{CallBridgeError, CallEvent, CallState, PushIntake, Settings};
use common::*;
use serde_json::json;
use serial_test::serial;

fn ring(call_cid: &str) -> serde_json::Value {
    json!({
        "stream": {
            "type": "call.ring",
            "call_cid": call_cid,
            "created_by_id": "alice",
            "created_by_display_name": "Alice",
            "video": "false"
        }
    })
}

#[tokio::test]
#[serial]
async fn test_push_registers_call_and_echoes_payload() {
    let h = harness(Settings::default()).await;
    let mut events = h.coordinator.subscribe_events();
    let intake = PushIntake::new(h.coordinator.clone());

    intake.process(ring("default:abc-1")).await.unwrap();
    assert_eq!(h.coordinator.call_state("default:abc-1"), Some(CallState::Reported));

    match next_event(&mut events).await {
        CallEvent::DidDisplayIncomingCall(info) => {
            assert!(info.from_push);
            assert_eq!(info.caller_name.as_deref(), Some("Alice"));
            assert_eq!(info.payload, Some(ring("default:abc-1")));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
#[serial]
async fn test_push_short_circuits_when_busy() {
    let h = harness(busy_reject_settings()).await;
    let intake = PushIntake::new(h.coordinator.clone());
    intake.process(ring("first")).await.unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    intake.handle_push(ring("second"), move |result| {
        let _ = tx.send(result);
    });
    let result = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();

    assert_eq!(result, Err(CallBridgeError::busy("second")));
    assert_eq!(h.provider.report_count(), 1);
}

#[tokio::test]
#[serial]
async fn test_undecodable_push_never_creates_a_call() {
    let h = harness(Settings::default()).await;
    let intake = PushIntake::new(h.coordinator.clone());

    let err = intake
        .process(json!({ "stream": { "type": "call.ring" } }))
        .await
        .unwrap_err();
    assert!(matches!(err, CallBridgeError::InvalidPayload { .. }));
    assert_eq!(h.coordinator.call_count(), 0);
    assert_eq!(h.provider.report_count(), 0);
}

#[tokio::test]
#[serial]
async fn test_duplicate_push_is_idempotent() {
    let h = harness(Settings::default()).await;
    let intake = PushIntake::new(h.coordinator.clone());

    let (first, second) = tokio::join!(intake.process(ring("abc")), intake.process(ring("abc")));
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(h.provider.report_count(), 1);
}
