//! Shared helpers for callbridge-core integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use callbridge_core::{
    CallBridgeBuilder, CallCoordinator, CallEvent, HandleType, IncomingCallRequest,
    RecordingProvider, Settings,
};
use tokio::sync::broadcast;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("callbridge_core=debug")
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub provider: Arc<RecordingProvider>,
    pub coordinator: CallCoordinator,
}

/// Coordinator over a recording provider that fulfils transactions
pub async fn harness(settings: Settings) -> Harness {
    init_tracing();
    let provider = Arc::new(RecordingProvider::new());
    let coordinator = CallBridgeBuilder::new(provider.clone())
        .settings(settings)
        .buffer_initial_events(false)
        .build()
        .await;
    provider.attach_delegate(coordinator.provider_delegate());
    Harness {
        provider,
        coordinator,
    }
}

pub fn busy_reject_settings() -> Settings {
    Settings {
        should_reject_call_when_busy: true,
        ..Settings::default()
    }
}

pub fn number_call(application_id: &str) -> IncomingCallRequest {
    IncomingCallRequest::new(application_id, "+15551234567", HandleType::Number)
}

/// Next event, failing the test if none arrives in time
pub async fn next_event(events: &mut broadcast::Receiver<CallEvent>) -> CallEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}
