//! Push intake
//!
//! Turns an opaque push payload into an [`IncomingCallRequest`] and hands it to
//! the coordinator. When the busy gate is closed the push is refused up front,
//! so the platform never sees a report that would be rejected immediately.

use serde_json::Value;

use crate::call::{CallCapabilities, IncomingCallRequest};
use crate::coordinator::CallCoordinator;
use crate::error::{CallBridgeError, CallBridgeResult};
use crate::settings::Settings;

/// Push `type` that announces a ringing call
pub const RING_EVENT_TYPE: &str = "call.ring";

/// Decoder from a raw push payload to a registration request
pub trait PushDecoder: Send + Sync {
    fn decode(&self, payload: &Value, settings: &Settings) -> CallBridgeResult<IncomingCallRequest>;
}

/// Decoder for the `{"stream": {...}}` ring payload
///
/// ```json
/// {
///   "stream": {
///     "type": "call.ring",
///     "call_cid": "default:abc-1",
///     "created_by_id": "alice",
///     "created_by_display_name": "Alice",
///     "video": "false"
///   }
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamPushDecoder;

fn non_empty_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn parse_video_flag(value: Option<&Value>) -> CallBridgeResult<bool> {
    match value {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(Value::String(text)) => match text.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(CallBridgeError::invalid_payload(format!(
                "invalid video flag {:?}",
                other
            ))),
        },
        Some(other) => Err(CallBridgeError::invalid_payload(format!(
            "invalid video flag {}",
            other
        ))),
    }
}

impl PushDecoder for StreamPushDecoder {
    fn decode(
        &self,
        payload: &Value,
        settings: &Settings,
    ) -> CallBridgeResult<IncomingCallRequest> {
        let body = payload
            .get("stream")
            .filter(|body| body.is_object())
            .ok_or_else(|| CallBridgeError::invalid_payload("missing stream object"))?;

        if let Some(kind) = body.get("type").and_then(Value::as_str) {
            if kind != RING_EVENT_TYPE {
                return Err(CallBridgeError::invalid_payload(format!(
                    "unsupported push type {:?}",
                    kind
                )));
            }
        }

        let call_cid = non_empty_str(body, "call_cid")
            .ok_or_else(|| CallBridgeError::invalid_payload("missing call_cid"))?;
        let handle = non_empty_str(body, "created_by_id").unwrap_or(call_cid);
        let caller_name = non_empty_str(body, "created_by_display_name")
            .or_else(|| non_empty_str(body, "call_display_name"));
        let has_video = parse_video_flag(body.get("video"))?;

        let handle_type = settings.preferred_handle_type();
        let mut request = IncomingCallRequest::new(call_cid, handle, handle_type)
            .with_video(has_video)
            .with_capabilities(CallCapabilities::default())
            .from_push(Some(payload.clone()));
        if let Some(name) = caller_name {
            request = request.with_caller_name(name);
        }
        Ok(request)
    }
}

/// Push intake bound to a coordinator
pub struct PushIntake<D = StreamPushDecoder> {
    coordinator: CallCoordinator,
    decoder: D,
}

impl PushIntake<StreamPushDecoder> {
    pub fn new(coordinator: CallCoordinator) -> Self {
        Self::with_decoder(coordinator, StreamPushDecoder)
    }
}

impl<D: PushDecoder> PushIntake<D> {
    pub fn with_decoder(coordinator: CallCoordinator, decoder: D) -> Self {
        Self { coordinator, decoder }
    }

    /// Handle one delivered push
    ///
    /// `completion` is the delivery completion handler; it fires exactly once
    /// with the registration outcome, a decode error, or `Busy` when the call
    /// was refused without contacting the provider.
    pub fn handle_push<F>(&self, payload: Value, completion: F)
    where
        F: FnOnce(CallBridgeResult<()>) + Send + 'static,
    {
        let request = match self.decoder.decode(&payload, &self.coordinator.settings()) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "Dropping undecodable push payload");
                completion(Err(err));
                return;
            }
        };

        if !self.coordinator.can_register_call() {
            tracing::info!(
                call_id = %request.application_id,
                "Refusing pushed call, another call is in progress"
            );
            completion(Err(CallBridgeError::busy(request.application_id)));
            return;
        }

        tracing::debug!(call_id = %request.application_id, "Registering pushed call");
        self.coordinator.report_new_incoming_call(request, completion);
    }

    /// [`handle_push`](Self::handle_push), awaiting the outcome
    pub async fn process(&self, payload: Value) -> CallBridgeResult<()> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.handle_push(payload, move |result| {
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| CallBridgeError::CoordinatorUnavailable)?
    }
}
