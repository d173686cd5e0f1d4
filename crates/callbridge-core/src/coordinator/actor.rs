//! The single owner of every call record
//!
//! All lifecycle mutations arrive as [`Command`]s on one channel and are
//! applied one at a time, so the busy check and the decision to report a call
//! happen in the same step. The provider report itself runs on its own task
//! and comes back as [`Command::ReportCompleted`]; the actor never awaits the
//! provider.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot};

use crate::call::{
    ActionSource, CallRecord, CallSnapshot, CallState, EndReason, IncomingCallRequest,
    OutgoingCallRequest,
};
use crate::error::{CallBridgeError, CallBridgeResult};
use crate::events::{CallEvent, DisplayIncomingCallInfo, EventDispatcher};
use crate::identity::{IdentityRegistry, ProviderToken};
use crate::provider::{CallAction, ProviderError, TelephonyProvider};
use crate::settings::{ProviderConfiguration, SettingsStore};

/// Registration completion callback
///
/// Runs on the coordinator task and must not block.
pub type Completion = Box<dyn FnOnce(CallBridgeResult<()>) + Send + 'static>;

pub(crate) enum Command {
    Register {
        request: IncomingCallRequest,
        completion: Completion,
    },
    ReportCompleted {
        token: ProviderToken,
        info: DisplayIncomingCallInfo,
        result: Result<(), ProviderError>,
    },
    StartCall {
        request: OutgoingCallRequest,
        reply: oneshot::Sender<CallBridgeResult<()>>,
    },
    SetActive {
        application_id: String,
        reply: oneshot::Sender<CallBridgeResult<()>>,
    },
    UpdateDisplay {
        application_id: String,
        handle: String,
        caller_name: String,
        reply: oneshot::Sender<CallBridgeResult<()>>,
    },
    EndCall {
        application_id: String,
        reason: EndReason,
        ack: oneshot::Sender<()>,
    },
    RequestAction {
        application_id: String,
        action: CallAction,
        reply: oneshot::Sender<CallBridgeResult<()>>,
    },
    Provider(ProviderCallback),
    GetRecord {
        application_id: String,
        reply: oneshot::Sender<Option<CallRecord>>,
    },
    Drain {
        ack: oneshot::Sender<()>,
    },
}

/// Platform callbacks, forwarded by the provider delegate
#[derive(Debug)]
pub(crate) enum ProviderCallback {
    Start(ProviderToken),
    Answer(ProviderToken),
    End(ProviderToken),
    Hold(ProviderToken, bool),
    Muted(ProviderToken, bool),
    PlayDtmf(ProviderToken, String),
    Failed(ProviderToken),
    ActionTimedOut(ProviderToken),
    Reset,
    AudioSessionActivated,
    AudioSessionDeactivated,
}

fn publish(snapshots: &DashMap<String, CallSnapshot>, record: &CallRecord) {
    snapshots.insert(record.application_id().to_string(), CallSnapshot::from(record));
}

pub(crate) struct CoordinatorActor {
    provider: Arc<dyn TelephonyProvider>,
    registry: Arc<IdentityRegistry>,
    settings: Arc<SettingsStore>,
    snapshots: Arc<DashMap<String, CallSnapshot>>,
    /// Tokens in `cancelled_reports`, shared with the synchronous busy query
    pending_teardowns: Arc<DashSet<ProviderToken>>,
    events: Arc<EventDispatcher>,
    command_tx: mpsc::WeakUnboundedSender<Command>,

    calls: HashMap<ProviderToken, CallRecord>,
    /// Completions waiting on an in-flight report
    waiters: HashMap<ProviderToken, Vec<Completion>>,
    /// Calls ended while their report was in flight, with the teardown reason
    cancelled_reports: HashMap<ProviderToken, EndReason>,
    answer_requested: HashSet<ProviderToken>,
    end_requested: HashSet<ProviderToken>,
}

impl CoordinatorActor {
    pub(crate) fn new(
        provider: Arc<dyn TelephonyProvider>,
        registry: Arc<IdentityRegistry>,
        settings: Arc<SettingsStore>,
        snapshots: Arc<DashMap<String, CallSnapshot>>,
        pending_teardowns: Arc<DashSet<ProviderToken>>,
        events: Arc<EventDispatcher>,
        command_tx: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            provider,
            registry,
            settings,
            snapshots,
            pending_teardowns,
            events,
            command_tx,
            calls: HashMap::new(),
            waiters: HashMap::new(),
            cancelled_reports: HashMap::new(),
            answer_requested: HashSet::new(),
            end_requested: HashSet::new(),
        }
    }

    pub(crate) async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("Call coordinator task started");
        while let Some(command) = command_rx.recv().await {
            self.handle(command);
        }
        tracing::debug!(live_calls = self.calls.len(), "Call coordinator task stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { request, completion } => self.register(request, completion),
            Command::ReportCompleted { token, info, result } => {
                self.report_completed(token, info, result)
            }
            Command::StartCall { request, reply } => {
                let _ = reply.send(self.start_call(request));
            }
            Command::SetActive { application_id, reply } => {
                let _ = reply.send(self.set_active(&application_id));
            }
            Command::UpdateDisplay { application_id, handle, caller_name, reply } => {
                let _ = reply.send(self.update_display(&application_id, handle, caller_name));
            }
            Command::EndCall { application_id, reason, ack } => {
                self.end_call(&application_id, reason);
                let _ = ack.send(());
            }
            Command::RequestAction { application_id, action, reply } => {
                let _ = reply.send(self.request_action(&application_id, action));
            }
            Command::Provider(callback) => self.provider_callback(callback),
            Command::GetRecord { application_id, reply } => {
                let record = self
                    .registry
                    .lookup_by_application_id(&application_id)
                    .and_then(|token| self.calls.get(&token).cloned());
                let _ = reply.send(record);
            }
            Command::Drain { ack } => {
                let _ = ack.send(());
            }
        }
    }

    /// A cancelled report still holds the slot until the provider answers it
    fn slot_occupied(&self) -> bool {
        !self.cancelled_reports.is_empty()
            || self.calls.values().any(|call| call.state.occupies_slot())
    }

    fn cancel_report(&mut self, token: ProviderToken, reason: EndReason) {
        self.cancelled_reports.insert(token, reason);
        self.pending_teardowns.insert(token);
    }

    fn live_token(&self, application_id: &str) -> CallBridgeResult<ProviderToken> {
        self.registry
            .lookup_by_application_id(application_id)
            .filter(|token| self.calls.contains_key(token))
            .ok_or_else(|| CallBridgeError::not_found(application_id))
    }

    fn register(&mut self, request: IncomingCallRequest, completion: Completion) {
        let application_id = request.application_id.clone();

        if let Some(token) = self.registry.lookup_by_application_id(&application_id) {
            if let Some(record) = self.calls.get(&token) {
                if record.state == CallState::Pending {
                    tracing::debug!(call_id = %application_id, "Joining in-flight registration");
                    self.waiters.entry(token).or_default().push(completion);
                } else {
                    tracing::debug!(
                        call_id = %application_id,
                        state = ?record.state,
                        "Call already registered"
                    );
                    completion(Ok(()));
                }
                return;
            }
        }

        let settings = self.settings.get();
        if settings.should_reject_call_when_busy && self.slot_occupied() {
            tracing::warn!(
                call_id = %application_id,
                "Rejecting incoming call, another call is in progress"
            );
            completion(Err(CallBridgeError::busy(application_id)));
            return;
        }

        let Some(command_tx) = self.command_tx.upgrade() else {
            completion(Err(CallBridgeError::CoordinatorUnavailable));
            return;
        };

        let (identity, _) = self.registry.resolve_or_create_identity(&application_id);
        let token = identity.provider_token;
        let record = CallRecord::pending(identity, &request);
        publish(&self.snapshots, &record);
        self.calls.insert(token, record);
        self.waiters.insert(token, vec![completion]);

        let configuration = ProviderConfiguration::derive(&settings, &request.capabilities);
        let update = request.call_update();
        let info = DisplayIncomingCallInfo {
            call_id: application_id.clone(),
            handle: request.handle.clone(),
            caller_name: request.caller_name.clone(),
            has_video: request.has_video,
            capabilities: request.capabilities,
            from_push: request.is_from_push(),
            payload: request.payload,
            error: String::new(),
            error_code: None,
        };

        tracing::info!(call_id = %application_id, token = %token, "Reporting new incoming call");
        let provider = self.provider.clone();
        tokio::spawn(async move {
            let result = provider.report_new_incoming_call(token, update, configuration).await;
            let _ = command_tx.send(Command::ReportCompleted { token, info, result });
        });
    }

    fn report_completed(
        &mut self,
        token: ProviderToken,
        mut info: DisplayIncomingCallInfo,
        result: Result<(), ProviderError>,
    ) {
        let waiters = self.waiters.remove(&token).unwrap_or_default();
        let cancelled = self.cancelled_reports.remove(&token);
        self.pending_teardowns.remove(&token);

        let outcome = match result {
            Ok(()) => {
                match cancelled {
                    Some(reason) => {
                        tracing::info!(
                            call_id = %info.call_id,
                            "Call ended while being reported, tearing down"
                        );
                        self.provider.report_call_ended(token, reason);
                    }
                    None => {
                        if let Some(record) = self.calls.get_mut(&token) {
                            record.transition(CallState::Reported);
                            publish(&self.snapshots, record);
                        }
                    }
                }
                self.events.emit(CallEvent::DidDisplayIncomingCall(info));
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    call_id = %info.call_id,
                    code = %error.code,
                    reason = %error.reason,
                    "Provider rejected incoming call"
                );
                let application_id = info.call_id.clone();
                if cancelled.is_none() {
                    self.retire(token, Some(CallState::Failed));
                }
                info.error = error.reason.clone();
                info.error_code = Some(error.code);
                self.events.emit(CallEvent::DidDisplayIncomingCall(info));
                if cancelled.is_none() {
                    self.events.emit(CallEvent::CallFailed {
                        call_id: application_id.clone(),
                        error: error.to_string(),
                    });
                }
                Err(CallBridgeError::provider_rejected(application_id, error.code, error.reason))
            }
        };

        for waiter in waiters {
            waiter(outcome.clone());
        }
    }

    /// Drop a call's record, identity and snapshot, passing through `via` first
    fn retire(&mut self, token: ProviderToken, via: Option<CallState>) -> Option<CallRecord> {
        let mut record = self.calls.remove(&token)?;
        if let Some(state) = via {
            record.transition(state);
        }
        record.transition(CallState::Ended);
        let duration_ms = record.duration().map(|d| d.num_milliseconds()).unwrap_or_default();
        tracing::debug!(call_id = %record.application_id(), duration_ms, "Call retired");
        self.registry.remove_by_token(&token);
        self.snapshots.remove(record.application_id());
        self.answer_requested.remove(&token);
        self.end_requested.remove(&token);
        Some(record)
    }

    fn end_call(&mut self, application_id: &str, reason: EndReason) {
        let Some(token) = self.registry.lookup_by_application_id(application_id) else {
            tracing::debug!(call_id = %application_id, "No call to end");
            return;
        };
        let Some(state) = self.calls.get(&token).map(|call| call.state) else {
            self.registry.remove_by_token(&token);
            return;
        };

        if state == CallState::Pending {
            self.cancel_report(token, reason);
        } else {
            self.provider.report_call_ended(token, reason);
        }
        self.retire(token, None);
        tracing::info!(call_id = %application_id, reason = %reason, "Call ended by application");
        self.events.emit(CallEvent::CallEnded {
            call_id: application_id.to_string(),
            reason: Some(reason),
            source: ActionSource::App,
        });
    }

    fn start_call(&mut self, request: OutgoingCallRequest) -> CallBridgeResult<()> {
        let application_id = request.application_id.clone();
        if self.live_token(&application_id).is_ok() {
            tracing::debug!(call_id = %application_id, "Outgoing call already started");
            return Ok(());
        }

        let (identity, _) = self.registry.resolve_or_create_identity(&application_id);
        let token = identity.provider_token;
        let record = CallRecord::dialing(identity, &request);
        let update = record.call_update();
        publish(&self.snapshots, &record);
        self.calls.insert(token, record);

        tracing::info!(call_id = %application_id, token = %token, "Starting outgoing call");
        self.provider.request_transaction(token, CallAction::Start(update));
        Ok(())
    }

    fn set_active(&mut self, application_id: &str) -> CallBridgeResult<()> {
        let token = self.live_token(application_id)?;
        let Some(record) = self.calls.get_mut(&token) else {
            return Err(CallBridgeError::not_found(application_id));
        };
        if record.state != CallState::Dialing {
            tracing::debug!(
                call_id = %application_id,
                state = ?record.state,
                "Call already connected"
            );
            return Ok(());
        }

        self.provider.report_outgoing_call_connecting(token);
        self.provider.report_outgoing_call_connected(token);
        record.transition(CallState::Active);
        publish(&self.snapshots, record);
        Ok(())
    }

    fn update_display(
        &mut self,
        application_id: &str,
        handle: String,
        caller_name: String,
    ) -> CallBridgeResult<()> {
        let token = self.live_token(application_id)?;
        let handle_type = self.settings.get().preferred_handle_type();
        let Some(record) = self.calls.get_mut(&token) else {
            return Err(CallBridgeError::not_found(application_id));
        };

        record.handle = handle;
        record.handle_type = handle_type;
        record.caller_name = Some(caller_name);
        tracing::debug!(
            call_id = %application_id,
            handle_type = ?handle_type,
            "Updating call display"
        );
        self.provider.report_call_updated(token, record.call_update());
        Ok(())
    }

    fn request_action(&mut self, application_id: &str, action: CallAction) -> CallBridgeResult<()> {
        let token = self.live_token(application_id)?;

        match action {
            CallAction::Answer => {
                self.answer_requested.insert(token);
            }
            CallAction::End => {
                self.end_requested.insert(token);
            }
            CallAction::Start(_) | CallAction::SetHeld(_) | CallAction::SetMuted(_) => {}
        }
        tracing::debug!(
            call_id = %application_id,
            action = ?action,
            "Requesting provider transaction"
        );
        self.provider.request_transaction(token, action);
        Ok(())
    }

    fn provider_callback(&mut self, callback: ProviderCallback) {
        match callback {
            ProviderCallback::Start(token) => self.on_start(token),
            ProviderCallback::Answer(token) => self.on_answer(token),
            ProviderCallback::End(token) => self.on_end(token),
            ProviderCallback::Hold(token, held) => {
                let Some(record) = self.calls.get_mut(&token) else {
                    tracing::debug!(token = %token, "Hold for unknown call ignored");
                    return;
                };
                record.on_hold = held;
                publish(&self.snapshots, record);
                let call_id = record.application_id().to_string();
                self.events.emit(CallEvent::HoldChanged { call_id, hold: held });
            }
            ProviderCallback::Muted(token, muted) => {
                let Some(record) = self.calls.get_mut(&token) else {
                    tracing::debug!(token = %token, "Mute for unknown call ignored");
                    return;
                };
                record.muted = muted;
                publish(&self.snapshots, record);
                let call_id = record.application_id().to_string();
                self.events.emit(CallEvent::MutedChanged { call_id, muted });
            }
            ProviderCallback::PlayDtmf(token, digits) => {
                match self.calls.get(&token) {
                    Some(record) => self.events.emit(CallEvent::DtmfPlayed {
                        call_id: record.application_id().to_string(),
                        digits,
                    }),
                    None => tracing::debug!(token = %token, "DTMF for unknown call ignored"),
                }
            }
            ProviderCallback::Failed(token) => self.on_failed(token),
            ProviderCallback::ActionTimedOut(token) => {
                let call_id = self.calls.get(&token).map(|record| record.application_id());
                tracing::warn!(token = %token, call_id = ?call_id, "Provider action timed out");
            }
            ProviderCallback::Reset => self.on_reset(),
            ProviderCallback::AudioSessionActivated => {
                self.events.emit(CallEvent::AudioSessionActivated)
            }
            ProviderCallback::AudioSessionDeactivated => {
                self.events.emit(CallEvent::AudioSessionDeactivated)
            }
        }
    }

    fn on_start(&mut self, token: ProviderToken) {
        let Some(record) = self.calls.get(&token) else {
            tracing::debug!(token = %token, "Start for unknown call ignored");
            return;
        };
        let call_id = record.application_id().to_string();
        let handle = record.handle.clone();

        if self.settings.get().auto_configure_audio_session {
            self.provider.prepare_audio_session();
        }
        self.events.emit(CallEvent::StartCallRequested { call_id, handle });
    }

    fn on_answer(&mut self, token: ProviderToken) {
        let Some(record) = self.calls.get_mut(&token) else {
            tracing::debug!(token = %token, "Answer for unknown call ignored");
            return;
        };
        if record.transition(CallState::Active).is_none() {
            return;
        }
        publish(&self.snapshots, record);
        let call_id = record.application_id().to_string();

        if self.settings.get().auto_configure_audio_session {
            self.provider.prepare_audio_session();
        }
        let source = if self.answer_requested.remove(&token) {
            ActionSource::App
        } else {
            ActionSource::System
        };
        self.events.emit(CallEvent::CallAnswered { call_id, source });
    }

    fn on_end(&mut self, token: ProviderToken) {
        let Some(state) = self.calls.get(&token).map(|call| call.state) else {
            tracing::debug!(token = %token, "End for unknown call ignored");
            return;
        };
        let source = if self.end_requested.contains(&token) {
            ActionSource::App
        } else {
            ActionSource::System
        };
        let via = match state {
            CallState::Reported => Some(CallState::Rejected),
            CallState::Pending => {
                self.cancel_report(token, EndReason::Failed);
                None
            }
            _ => None,
        };

        if let Some(record) = self.retire(token, via) {
            self.events.emit(CallEvent::CallEnded {
                call_id: record.application_id().to_string(),
                reason: None,
                source,
            });
        }
    }

    fn on_failed(&mut self, token: ProviderToken) {
        let Some(state) = self.calls.get(&token).map(|call| call.state) else {
            tracing::debug!(token = %token, "Failure for unknown call ignored");
            return;
        };
        if state == CallState::Pending {
            self.cancel_report(token, EndReason::Failed);
        }
        if let Some(record) = self.retire(token, Some(CallState::Failed)) {
            tracing::warn!(call_id = %record.application_id(), "Provider reported call failure");
            self.events.emit(CallEvent::CallFailed {
                call_id: record.application_id().to_string(),
                error: "provider reported call failure".to_string(),
            });
        }
    }

    fn on_reset(&mut self) {
        let tokens: Vec<ProviderToken> = self.calls.keys().copied().collect();
        tracing::warn!(live_calls = tokens.len(), "Provider reset, retiring every call");

        for token in tokens {
            if self.calls.get(&token).map(|call| call.state) == Some(CallState::Pending) {
                self.cancel_report(token, EndReason::Failed);
            }
            if let Some(record) = self.retire(token, None) {
                self.events.emit(CallEvent::CallEnded {
                    call_id: record.application_id().to_string(),
                    reason: None,
                    source: ActionSource::System,
                });
            }
        }
        self.registry.remove_all();
        self.snapshots.clear();
        self.events.emit(CallEvent::ProviderReset);
    }
}
