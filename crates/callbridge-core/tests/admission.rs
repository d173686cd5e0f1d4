//! Integration tests for admission control
//!
//! Busy-reject policy, idempotent registration under concurrency and
//! provider rejections.

mod common;

use std::time::Duration;

use callbridge_core::{
    CallBridgeError, CallCapabilities, CallState, EndReason, IncomingCallErrorCode, OptionsMap,
    OutgoingCallRequest, Settings, SettingsSource,
};
use common::*;
use serde_json::json;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn test_busy_gate_rejects_without_contacting_provider() {
    let h = harness(busy_reject_settings()).await;
    assert!(h.coordinator.can_register_call());

    h.coordinator.register_incoming_call(number_call("first")).await.unwrap();
    h.coordinator.answer_call("first").await.unwrap();
    h.coordinator.drain().await;
    assert!(h.coordinator.is_call_active("first"));

    assert!(!h.coordinator.can_register_call());
    let err = h
        .coordinator
        .register_incoming_call(number_call("second"))
        .await
        .unwrap_err();
    assert_eq!(err, CallBridgeError::busy("second"));
    assert!(err.is_recoverable());
    assert_eq!(h.provider.report_count(), 1);
    assert!(!h.coordinator.is_call_registered("second"));

    h.coordinator.end_call("first", EndReason::RemoteEnded).await;
    assert!(h.coordinator.can_register_call());
    h.coordinator.register_incoming_call(number_call("second")).await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_cancelled_report_holds_the_slot_until_provider_answers() {
    let h = harness(busy_reject_settings()).await;
    h.provider.set_report_delay(Duration::from_millis(200));

    let (tx, rx) = tokio::sync::oneshot::channel();
    h.coordinator.report_new_incoming_call(number_call("a"), move |result| {
        let _ = tx.send(result);
    });
    h.coordinator.end_call("a", EndReason::DeclinedElsewhere).await;
    assert!(!h.coordinator.is_call_registered("a"));

    // The provider still considers "a" in flight
    assert!(!h.coordinator.can_register_call());
    let err = h
        .coordinator
        .register_incoming_call(number_call("b"))
        .await
        .unwrap_err();
    assert_eq!(err, CallBridgeError::busy("b"));
    assert_eq!(h.provider.report_count(), 1);

    let outcome = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
    assert!(outcome.is_ok());
    assert!(h.coordinator.can_register_call());
    let token = h.provider.reported_tokens()[0];
    assert_eq!(h.provider.ended_reasons(&token), vec![EndReason::DeclinedElsewhere]);

    h.coordinator.register_incoming_call(number_call("b")).await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_outgoing_calls_bypass_the_busy_gate() {
    let h = harness(busy_reject_settings()).await;
    h.coordinator.register_incoming_call(number_call("ringing")).await.unwrap();
    assert!(!h.coordinator.can_register_call());

    h.coordinator
        .start_call(OutgoingCallRequest::new("out-1", "bob"))
        .await
        .unwrap();
    assert_eq!(h.coordinator.call_state("out-1"), Some(CallState::Dialing));
    assert_eq!(h.coordinator.call_count(), 2);
}

#[tokio::test]
#[serial]
async fn test_ringing_call_occupies_the_slot() {
    let h = harness(busy_reject_settings()).await;
    h.coordinator.register_incoming_call(number_call("first")).await.unwrap();
    assert_eq!(h.coordinator.call_state("first"), Some(CallState::Reported));

    assert!(!h.coordinator.can_register_call());
    assert!(h.coordinator.register_incoming_call(number_call("second")).await.is_err());
}

#[tokio::test]
#[serial]
async fn test_grouping_calls_are_not_exempt() {
    let h = harness(busy_reject_settings()).await;
    let grouping = CallCapabilities {
        supports_grouping: true,
        supports_ungrouping: true,
        ..CallCapabilities::default()
    };
    h.coordinator
        .register_incoming_call(number_call("first").with_capabilities(grouping))
        .await
        .unwrap();
    let err = h
        .coordinator
        .register_incoming_call(number_call("second").with_capabilities(grouping))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "admission");
}

#[tokio::test]
#[serial]
async fn test_without_busy_policy_calls_are_admitted() {
    let h = harness(Settings::default()).await;
    h.coordinator.register_incoming_call(number_call("first")).await.unwrap();
    h.coordinator.register_incoming_call(number_call("second")).await.unwrap();
    assert!(h.coordinator.can_register_call());
    assert_eq!(h.provider.report_count(), 2);
    assert_eq!(h.coordinator.call_count(), 2);
}

#[tokio::test]
#[serial]
async fn test_concurrent_same_id_reports_once() {
    let h = harness(Settings::default()).await;
    h.provider.set_report_delay(Duration::from_millis(50));

    let (first, second) = tokio::join!(
        h.coordinator.register_incoming_call(number_call("abc-1")),
        h.coordinator.register_incoming_call(number_call("abc-1")),
    );
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(h.provider.report_count(), 1);
    assert_eq!(h.coordinator.call_count(), 1);

    // A later duplicate observes the existing call
    h.coordinator.register_incoming_call(number_call("abc-1")).await.unwrap();
    assert_eq!(h.provider.report_count(), 1);
}

#[tokio::test]
#[serial]
async fn test_concurrent_same_id_shares_rejection() {
    let h = harness(Settings::default()).await;
    h.provider.set_report_delay(Duration::from_millis(50));
    h.provider.reject_next(IncomingCallErrorCode::Unentitled, "not entitled");

    let (first, second) = tokio::join!(
        h.coordinator.register_incoming_call(number_call("abc-1")),
        h.coordinator.register_incoming_call(number_call("abc-1")),
    );
    assert_eq!(first, second);
    assert_eq!(first.unwrap_err().error_code(), Some(IncomingCallErrorCode::Unentitled));
    assert_eq!(h.provider.report_count(), 1);
}

#[tokio::test]
#[serial]
async fn test_concurrent_distinct_ids_pass_gate_once() {
    let h = harness(busy_reject_settings()).await;
    h.provider.set_report_delay(Duration::from_millis(20));

    let results = register_four(&h).await;
    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(CallBridgeError::Busy { .. })))
        .count();
    assert_eq!(admitted, 1);
    assert_eq!(busy, 3);
    assert_eq!(h.provider.report_count(), 1);
}

async fn register_four(h: &Harness) -> Vec<Result<(), CallBridgeError>> {
    let (a, b, c, d) = tokio::join!(
        h.coordinator.register_incoming_call(number_call("a")),
        h.coordinator.register_incoming_call(number_call("b")),
        h.coordinator.register_incoming_call(number_call("c")),
        h.coordinator.register_incoming_call(number_call("d")),
    );
    vec![a, b, c, d]
}

#[tokio::test]
#[serial]
async fn test_provider_rejection_frees_the_slot() {
    let h = harness(busy_reject_settings()).await;
    h.provider
        .reject_next(IncomingCallErrorCode::FilteredByBlockList, "blocked caller");

    let err = h
        .coordinator
        .register_incoming_call(number_call("blocked"))
        .await
        .unwrap_err();
    assert!(!err.is_recoverable());
    assert!(!h.coordinator.is_call_registered("blocked"));
    assert!(h.coordinator.can_register_call());

    h.coordinator.register_incoming_call(number_call("next")).await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_policy_can_be_toggled_at_runtime() {
    let h = harness(Settings::default()).await;
    h.coordinator.register_incoming_call(number_call("first")).await.unwrap();
    assert!(h.coordinator.can_register_call());

    h.coordinator.set_should_reject_call_when_busy(true);
    assert!(!h.coordinator.can_register_call());

    let options = json!({ "shouldRejectCallWhenBusy": false })
        .as_object()
        .cloned()
        .unwrap();
    let settings = h.coordinator.set_settings(&options);
    assert!(!settings.should_reject_call_when_busy);
    assert!(h.coordinator.can_register_call());
    assert_eq!(
        h.coordinator.get_settings().get("shouldRejectCallWhenBusy"),
        Some(&json!(false))
    );
}

struct HostConfig;

impl SettingsSource for HostConfig {
    fn raw_options(&self) -> OptionsMap {
        json!({ "supportsVideo": false, "sound": "ring.caf" })
            .as_object()
            .cloned()
            .unwrap_or_default()
    }
}

#[tokio::test]
#[serial]
async fn test_reconfigure_merges_source_over_current_settings() {
    let h = harness(busy_reject_settings()).await;

    let settings = h.coordinator.reconfigure(&HostConfig);
    assert!(!settings.supports_video);
    assert_eq!(settings.ringtone_sound.as_deref(), Some("ring.caf"));
    assert!(settings.should_reject_call_when_busy);
    assert_eq!(settings.maximum_call_groups, 1);
    assert_eq!(h.coordinator.settings(), settings);
    assert_eq!(h.coordinator.get_settings().get("supportsVideo"), Some(&json!(false)));
}

#[tokio::test]
#[serial]
async fn test_provider_configuration_follows_settings() {
    let options = json!({
        "localizedName": "Acme",
        "supportsVideo": false,
        "maximumCallsPerCallGroup": 3
    })
    .as_object()
    .cloned()
    .unwrap();
    let h = harness(Settings::from_options(&options)).await;

    h.coordinator.register_incoming_call(number_call("plain")).await.unwrap();
    let grouping = CallCapabilities {
        supports_grouping: true,
        ..CallCapabilities::default()
    };
    h.coordinator
        .register_incoming_call(number_call("grouped").with_capabilities(grouping))
        .await
        .unwrap();

    let configurations: Vec<_> = h
        .provider
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            callbridge_core::ProviderCall::Reported { configuration, .. } => Some(configuration),
            _ => None,
        })
        .collect();
    assert_eq!(configurations.len(), 2);
    assert_eq!(configurations[0].localized_name.as_deref(), Some("Acme"));
    assert!(!configurations[0].supports_video);
    assert_eq!(configurations[0].maximum_calls_per_call_group, 1);
    assert_eq!(configurations[1].maximum_calls_per_call_group, 3);
}
