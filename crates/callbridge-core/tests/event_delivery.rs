//! Integration tests for host event delivery

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use callbridge_core::{
    ActionSource, CallBridgeBuilder, CallEvent, CallEventHandler, DisplayIncomingCallInfo,
    RecordingProvider,
};
use common::*;
use serial_test::serial;
use tokio::sync::mpsc;

struct UiBridge {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl CallEventHandler for UiBridge {
    async fn on_incoming_call_displayed(&self, info: DisplayIncomingCallInfo) {
        let _ = self.tx.send(format!("displayed:{}", info.call_id));
    }

    async fn on_call_answered(&self, call_id: String, source: ActionSource) {
        let _ = self.tx.send(format!("answered:{}:{:?}", call_id, source));
    }
}

#[tokio::test]
#[serial]
async fn test_events_before_listener_are_buffered() {
    init_tracing();
    let provider = Arc::new(RecordingProvider::new());
    let coordinator = CallBridgeBuilder::new(provider.clone()).build().await;
    provider.attach_delegate(coordinator.provider_delegate());

    coordinator.register_incoming_call(number_call("early")).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    coordinator.set_event_handler(Arc::new(UiBridge { tx }));
    let initial = coordinator.take_initial_events();
    assert_eq!(initial.len(), 1);
    assert!(matches!(initial[0], CallEvent::DidDisplayIncomingCall(_)));

    // Live from here on
    coordinator.answer_call("early").await.unwrap();
    let line = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(line, "answered:early:App");
    assert!(coordinator.take_initial_events().is_empty());
}

#[tokio::test]
#[serial]
async fn test_handler_receives_live_events_without_buffering() {
    let h = harness(Default::default()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    h.coordinator.set_event_handler(Arc::new(UiBridge { tx }));

    h.coordinator.register_incoming_call(number_call("live")).await.unwrap();
    let line = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(line, "displayed:live");
    assert!(h.coordinator.take_initial_events().is_empty());
}
