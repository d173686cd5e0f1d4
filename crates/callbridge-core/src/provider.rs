//! Outbound seam to the platform telephony provider
//!
//! The coordinator only ever talks to the platform through [`TelephonyProvider`].
//! Platform callbacks come back in through a
//! [`ProviderDelegate`](crate::coordinator::ProviderDelegate), never by calling
//! into the coordinator from inside a provider method.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::call::{CallUpdate, EndReason};
use crate::coordinator::ProviderDelegate;
use crate::error::IncomingCallErrorCode;
use crate::identity::ProviderToken;
use crate::settings::ProviderConfiguration;

/// Why the provider refused an incoming call report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {reason}")]
pub struct ProviderError {
    pub code: IncomingCallErrorCode,
    pub reason: String,
}

impl ProviderError {
    pub fn new(code: IncomingCallErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// A transaction the application asks the provider to perform
///
/// The outcome is delivered later through the matching delegate callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAction {
    /// Place an outgoing call described by the update
    Start(CallUpdate),
    Answer,
    End,
    SetHeld(bool),
    SetMuted(bool),
}

/// The platform's call-management subsystem
#[async_trait]
pub trait TelephonyProvider: Send + Sync + 'static {
    /// Report a new incoming call and wait for the provider to accept or refuse it
    async fn report_new_incoming_call(
        &self,
        token: ProviderToken,
        update: CallUpdate,
        configuration: ProviderConfiguration,
    ) -> Result<(), ProviderError>;

    /// Tell the provider a call ended outside of its own UI
    fn report_call_ended(&self, token: ProviderToken, reason: EndReason);

    /// Refresh what the system call UI shows for a live call
    fn report_call_updated(&self, token: ProviderToken, update: CallUpdate);

    fn report_outgoing_call_connecting(&self, token: ProviderToken);

    fn report_outgoing_call_connected(&self, token: ProviderToken);

    /// Ask the provider to run a call transaction
    fn request_transaction(&self, token: ProviderToken, action: CallAction);

    /// Prepare the audio session for an answered call
    fn prepare_audio_session(&self) {}
}

/// Everything a [`RecordingProvider`] was asked to do, in order
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    Reported {
        token: ProviderToken,
        update: CallUpdate,
        configuration: ProviderConfiguration,
    },
    Ended {
        token: ProviderToken,
        reason: EndReason,
    },
    Updated {
        token: ProviderToken,
        update: CallUpdate,
    },
    OutgoingConnecting(ProviderToken),
    OutgoingConnected(ProviderToken),
    Transaction {
        token: ProviderToken,
        action: CallAction,
    },
    AudioSessionPrepared,
}

#[derive(Default)]
struct RecordingState {
    calls: Vec<ProviderCall>,
    outcomes: VecDeque<Result<(), ProviderError>>,
    report_delay: Option<Duration>,
    delegate: Option<ProviderDelegate>,
}

/// In-process provider that records every interaction
///
/// Reports succeed unless an outcome was queued with [`reject_next`](Self::reject_next).
/// With a delegate attached, transactions are fulfilled immediately by
/// firing the matching callback, the way a platform provider confirms an
/// action it performed.
#[derive(Clone, Default)]
pub struct RecordingProvider {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next report with `code`
    pub fn reject_next(&self, code: IncomingCallErrorCode, reason: impl Into<String>) {
        self.state
            .lock()
            .outcomes
            .push_back(Err(ProviderError::new(code, reason)));
    }

    /// Accept the next report (useful between queued rejections)
    pub fn accept_next(&self) {
        self.state.lock().outcomes.push_back(Ok(()));
    }

    /// Hold every report for `delay` before answering
    pub fn set_report_delay(&self, delay: Duration) {
        self.state.lock().report_delay = Some(delay);
    }

    /// Fulfil transactions through `delegate`
    pub fn attach_delegate(&self, delegate: ProviderDelegate) {
        self.state.lock().delegate = Some(delegate);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().calls.clone()
    }

    /// Tokens of every reported call
    pub fn reported_tokens(&self) -> Vec<ProviderToken> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::Reported { token, .. } => Some(*token),
                _ => None,
            })
            .collect()
    }

    pub fn report_count(&self) -> usize {
        self.reported_tokens().len()
    }

    /// Teardown calls made for `token`
    pub fn ended_reasons(&self, token: &ProviderToken) -> Vec<EndReason> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::Ended { token: t, reason } if t == token => Some(*reason),
                _ => None,
            })
            .collect()
    }

    pub fn transactions(&self) -> Vec<(ProviderToken, CallAction)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::Transaction { token, action } => Some((*token, action.clone())),
                _ => None,
            })
            .collect()
    }

    /// Display updates sent for `token`
    pub fn updates(&self, token: &ProviderToken) -> Vec<CallUpdate> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::Updated { token: t, update } if t == token => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn audio_session_prepared_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| matches!(call, ProviderCall::AudioSessionPrepared))
            .count()
    }
}

#[async_trait]
impl TelephonyProvider for RecordingProvider {
    async fn report_new_incoming_call(
        &self,
        token: ProviderToken,
        update: CallUpdate,
        configuration: ProviderConfiguration,
    ) -> Result<(), ProviderError> {
        let (outcome, delay) = {
            let mut state = self.state.lock();
            state.calls.push(ProviderCall::Reported {
                token,
                update,
                configuration,
            });
            (state.outcomes.pop_front().unwrap_or(Ok(())), state.report_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let accepted = outcome.is_ok();
        tracing::debug!(token = %token, accepted, "Recorded incoming call report");
        outcome
    }

    fn report_call_ended(&self, token: ProviderToken, reason: EndReason) {
        tracing::debug!(token = %token, reason = %reason, "Recorded call teardown");
        self.state.lock().calls.push(ProviderCall::Ended { token, reason });
    }

    fn report_call_updated(&self, token: ProviderToken, update: CallUpdate) {
        self.state.lock().calls.push(ProviderCall::Updated { token, update });
    }

    fn report_outgoing_call_connecting(&self, token: ProviderToken) {
        self.state.lock().calls.push(ProviderCall::OutgoingConnecting(token));
    }

    fn report_outgoing_call_connected(&self, token: ProviderToken) {
        self.state.lock().calls.push(ProviderCall::OutgoingConnected(token));
    }

    fn request_transaction(&self, token: ProviderToken, action: CallAction) {
        let delegate = {
            let mut state = self.state.lock();
            state.calls.push(ProviderCall::Transaction {
                token,
                action: action.clone(),
            });
            state.delegate.clone()
        };

        if let Some(delegate) = delegate {
            match action {
                CallAction::Start(_) => delegate.on_start(token),
                CallAction::Answer => delegate.on_answer(token),
                CallAction::End => delegate.on_end(token),
                CallAction::SetHeld(held) => delegate.on_hold(token, held),
                CallAction::SetMuted(muted) => delegate.on_muted(token, muted),
            }
        }
    }

    fn prepare_audio_session(&self) {
        self.state.lock().calls.push(ProviderCall::AudioSessionPrepared);
    }
}
