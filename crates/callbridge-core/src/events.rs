//! Lifecycle events delivered to the host UI bridge
//!
//! Events are fire-and-forget: each one is offered once to broadcast
//! subscribers and once to the registered [`CallEventHandler`]. A host that
//! misses an event reconciles through the coordinator's state queries.
//!
//! Until the host attaches, events can be held back and collected with
//! [`EventDispatcher::take_initial_events`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::call::{ActionSource, CallCapabilities, EndReason};
use crate::error::IncomingCallErrorCode;

/// Outcome of an incoming call report, echoed to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayIncomingCallInfo {
    pub call_id: String,
    pub handle: String,
    pub caller_name: Option<String>,
    pub has_video: bool,
    #[serde(flatten)]
    pub capabilities: CallCapabilities,
    pub from_push: bool,
    pub payload: Option<Value>,
    /// Empty string on success
    pub error: String,
    /// Serialized as `""` on success
    #[serde(serialize_with = "serialize_error_code")]
    pub error_code: Option<IncomingCallErrorCode>,
}

fn serialize_error_code<S: Serializer>(
    code: &Option<IncomingCallErrorCode>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(code.map(|code| code.as_str()).unwrap_or(""))
}

impl DisplayIncomingCallInfo {
    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
    }
}

/// A lifecycle notification for the host UI
///
/// Serializes as `{"eventName": ..., "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "eventName", content = "params")]
pub enum CallEvent {
    #[serde(rename = "didDisplayIncomingCall")]
    DidDisplayIncomingCall(DisplayIncomingCallInfo),

    #[serde(rename = "didReceiveStartCallAction", rename_all = "camelCase")]
    StartCallRequested { call_id: String, handle: String },

    #[serde(rename = "answerCall", rename_all = "camelCase")]
    CallAnswered { call_id: String, source: ActionSource },

    #[serde(rename = "endCall", rename_all = "camelCase")]
    CallEnded {
        call_id: String,
        /// `None` when the provider ended the call without a reason
        reason: Option<EndReason>,
        source: ActionSource,
    },

    #[serde(rename = "callFailed", rename_all = "camelCase")]
    CallFailed { call_id: String, error: String },

    #[serde(rename = "didToggleHoldCallAction", rename_all = "camelCase")]
    HoldChanged { call_id: String, hold: bool },

    #[serde(rename = "didPerformSetMutedCallAction", rename_all = "camelCase")]
    MutedChanged { call_id: String, muted: bool },

    #[serde(rename = "didPerformDTMFAction", rename_all = "camelCase")]
    DtmfPlayed { call_id: String, digits: String },

    #[serde(rename = "didActivateAudioSession")]
    AudioSessionActivated,

    #[serde(rename = "didDeactivateAudioSession")]
    AudioSessionDeactivated,

    #[serde(rename = "providerReset")]
    ProviderReset,
}

impl CallEvent {
    /// Bridge event name
    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::DidDisplayIncomingCall(_) => "didDisplayIncomingCall",
            CallEvent::StartCallRequested { .. } => "didReceiveStartCallAction",
            CallEvent::CallAnswered { .. } => "answerCall",
            CallEvent::CallEnded { .. } => "endCall",
            CallEvent::CallFailed { .. } => "callFailed",
            CallEvent::HoldChanged { .. } => "didToggleHoldCallAction",
            CallEvent::MutedChanged { .. } => "didPerformSetMutedCallAction",
            CallEvent::DtmfPlayed { .. } => "didPerformDTMFAction",
            CallEvent::AudioSessionActivated => "didActivateAudioSession",
            CallEvent::AudioSessionDeactivated => "didDeactivateAudioSession",
            CallEvent::ProviderReset => "providerReset",
        }
    }

    /// Application call id, for per-call events
    pub fn call_id(&self) -> Option<&str> {
        match self {
            CallEvent::DidDisplayIncomingCall(info) => Some(&info.call_id),
            CallEvent::StartCallRequested { call_id, .. }
            | CallEvent::CallAnswered { call_id, .. }
            | CallEvent::CallEnded { call_id, .. }
            | CallEvent::CallFailed { call_id, .. }
            | CallEvent::HoldChanged { call_id, .. }
            | CallEvent::MutedChanged { call_id, .. }
            | CallEvent::DtmfPlayed { call_id, .. } => Some(call_id),
            CallEvent::AudioSessionActivated
            | CallEvent::AudioSessionDeactivated
            | CallEvent::ProviderReset => None,
        }
    }
}

/// Host-side receiver of call lifecycle events
///
/// Every method has a no-op default; implement the ones the UI cares about.
#[async_trait]
pub trait CallEventHandler: Send + Sync {
    async fn on_incoming_call_displayed(&self, _info: DisplayIncomingCallInfo) {}

    /// The provider is placing an outgoing call the host started
    async fn on_start_call(&self, _call_id: String, _handle: String) {}

    async fn on_call_answered(&self, _call_id: String, _source: ActionSource) {}

    async fn on_call_ended(
        &self,
        _call_id: String,
        _reason: Option<EndReason>,
        _source: ActionSource,
    ) {
    }

    async fn on_call_failed(&self, _call_id: String, _error: String) {}

    async fn on_hold_changed(&self, _call_id: String, _held: bool) {}

    async fn on_muted_changed(&self, _call_id: String, _muted: bool) {}

    async fn on_dtmf(&self, _call_id: String, _digits: String) {}

    /// Audio session activation (`true`) or deactivation (`false`)
    async fn on_audio_session(&self, _active: bool) {}

    async fn on_provider_reset(&self) {}

    /// Route an event to the specific handler method
    async fn on_call_event(&self, event: CallEvent) {
        match event {
            CallEvent::DidDisplayIncomingCall(info) => self.on_incoming_call_displayed(info).await,
            CallEvent::StartCallRequested { call_id, handle } => {
                self.on_start_call(call_id, handle).await
            }
            CallEvent::CallAnswered { call_id, source } => {
                self.on_call_answered(call_id, source).await
            }
            CallEvent::CallEnded { call_id, reason, source } => {
                self.on_call_ended(call_id, reason, source).await
            }
            CallEvent::CallFailed { call_id, error } => self.on_call_failed(call_id, error).await,
            CallEvent::HoldChanged { call_id, hold } => self.on_hold_changed(call_id, hold).await,
            CallEvent::MutedChanged { call_id, muted } => {
                self.on_muted_changed(call_id, muted).await
            }
            CallEvent::DtmfPlayed { call_id, digits } => self.on_dtmf(call_id, digits).await,
            CallEvent::AudioSessionActivated => self.on_audio_session(true).await,
            CallEvent::AudioSessionDeactivated => self.on_audio_session(false).await,
            CallEvent::ProviderReset => self.on_provider_reset().await,
        }
    }
}

type HandlerSlot = Arc<RwLock<Option<Arc<dyn CallEventHandler>>>>;

/// Fans events out to broadcast subscribers and the registered handler
///
/// Handler calls run on a dedicated delivery task in emission order, so a
/// slow or re-entrant handler never stalls the emitter.
pub struct EventDispatcher {
    event_tx: broadcast::Sender<CallEvent>,
    handler: HandlerSlot,
    delivery_tx: mpsc::UnboundedSender<CallEvent>,
    /// `Some` while events are being held for the first listener
    held: Mutex<Option<Vec<CallEvent>>>,
}

impl EventDispatcher {
    /// Create a dispatcher and spawn its delivery task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(capacity: usize, hold_until_listener: bool) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<CallEvent>();
        let handler: HandlerSlot = Arc::new(RwLock::new(None));

        let slot = handler.clone();
        tokio::spawn(async move {
            while let Some(event) = delivery_rx.recv().await {
                let current = slot.read().clone();
                if let Some(handler) = current {
                    handler.on_call_event(event).await;
                }
            }
            tracing::debug!("Event delivery task stopped");
        });

        Self {
            event_tx,
            handler,
            delivery_tx,
            held: Mutex::new(hold_until_listener.then(Vec::new)),
        }
    }

    /// Publish an event
    pub fn emit(&self, event: CallEvent) {
        tracing::debug!(event = event.name(), call_id = ?event.call_id(), "Emitting call event");

        // No receivers is not an error for fire-and-forget delivery
        let _ = self.event_tx.send(event.clone());

        if let Some(held) = self.held.lock().as_mut() {
            held.push(event);
            return;
        }
        if self.handler.read().is_some() {
            let _ = self.delivery_tx.send(event);
        }
    }

    /// Subscribe to every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    /// Register the host handler, replacing any previous one
    pub fn set_handler(&self, handler: Arc<dyn CallEventHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Drain the events held before the host attached and start live delivery
    ///
    /// Returns an empty list on every call after the first.
    pub fn take_initial_events(&self) -> Vec<CallEvent> {
        let events = self.held.lock().take().unwrap_or_default();
        tracing::debug!(count = events.len(), "Delivered initial events");
        events
    }

    /// Whether events are still being held for the first listener
    pub fn is_holding(&self) -> bool {
        self.held.lock().is_some()
    }
}
