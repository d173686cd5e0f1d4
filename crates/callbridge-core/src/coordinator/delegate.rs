use tokio::sync::mpsc;

use super::actor::{Command, ProviderCallback};
use crate::identity::ProviderToken;

/// Entry point for platform provider callbacks
///
/// Every method only enqueues a message for the coordinator task and returns
/// immediately, so it is safe to call from inside the provider's own locked
/// callback context. Callbacks for tokens with no live call are ignored.
/// The delegate does not keep the coordinator alive: once every
/// [`CallCoordinator`](super::CallCoordinator) handle is dropped its
/// callbacks become no-ops.
#[derive(Clone)]
pub struct ProviderDelegate {
    command_tx: mpsc::WeakUnboundedSender<Command>,
}

impl std::fmt::Debug for ProviderDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDelegate").finish_non_exhaustive()
    }
}

impl ProviderDelegate {
    pub(crate) fn new(command_tx: mpsc::WeakUnboundedSender<Command>) -> Self {
        Self { command_tx }
    }

    fn forward(&self, callback: ProviderCallback) {
        let Some(command_tx) = self.command_tx.upgrade() else {
            tracing::debug!(?callback, "Coordinator stopped, dropping provider callback");
            return;
        };
        if command_tx.send(Command::Provider(callback)).is_err() {
            tracing::debug!("Coordinator stopped, dropping provider callback");
        }
    }

    /// The provider is placing an outgoing call
    pub fn on_start(&self, token: ProviderToken) {
        self.forward(ProviderCallback::Start(token));
    }

    /// The user answered the call
    pub fn on_answer(&self, token: ProviderToken) {
        self.forward(ProviderCallback::Answer(token));
    }

    /// The call ended through the provider (declined, hung up, or ended remotely)
    pub fn on_end(&self, token: ProviderToken) {
        self.forward(ProviderCallback::End(token));
    }

    pub fn on_hold(&self, token: ProviderToken, held: bool) {
        self.forward(ProviderCallback::Hold(token, held));
    }

    pub fn on_muted(&self, token: ProviderToken, muted: bool) {
        self.forward(ProviderCallback::Muted(token, muted));
    }

    pub fn on_play_dtmf(&self, token: ProviderToken, digits: impl Into<String>) {
        self.forward(ProviderCallback::PlayDtmf(token, digits.into()));
    }

    /// The provider dropped the call with an error
    pub fn on_failed(&self, token: ProviderToken) {
        self.forward(ProviderCallback::Failed(token));
    }

    /// A requested transaction was not fulfilled in time
    pub fn on_action_timed_out(&self, token: ProviderToken) {
        self.forward(ProviderCallback::ActionTimedOut(token));
    }

    /// The provider reset and forgot every call
    pub fn on_reset(&self) {
        self.forward(ProviderCallback::Reset);
    }

    pub fn on_audio_session_activated(&self) {
        self.forward(ProviderCallback::AudioSessionActivated);
    }

    pub fn on_audio_session_deactivated(&self) {
        self.forward(ProviderCallback::AudioSessionDeactivated);
    }
}
