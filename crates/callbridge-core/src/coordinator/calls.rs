use tokio::sync::{mpsc, oneshot};

use super::actor::{Command, Completion};
use super::CallCoordinator;
use crate::call::{EndReason, IncomingCallRequest, OutgoingCallRequest};
use crate::error::{CallBridgeError, CallBridgeResult};
use crate::provider::CallAction;
use crate::settings::HandleType;

impl CallCoordinator {
    /// Register an incoming call and report it to the provider
    ///
    /// `completion` fires exactly once, on the coordinator task, after the
    /// provider answers or the busy gate refuses the call. A second
    /// registration for an id whose report is still in flight shares the
    /// first one's outcome; one for an already reported call succeeds
    /// without a new report.
    pub fn report_new_incoming_call<F>(&self, request: IncomingCallRequest, completion: F)
    where
        F: FnOnce(CallBridgeResult<()>) + Send + 'static,
    {
        let completion: Completion = Box::new(completion);
        let command = Command::Register { request, completion };
        let Err(mpsc::error::SendError(command)) = self.send(command) else {
            return;
        };
        if let Command::Register { completion, .. } = command {
            completion(Err(CallBridgeError::CoordinatorUnavailable));
        }
    }

    /// Register an incoming call and wait for the outcome
    pub async fn register_incoming_call(
        &self,
        request: IncomingCallRequest,
    ) -> CallBridgeResult<()> {
        let (tx, rx) = oneshot::channel();
        self.report_new_incoming_call(request, move |result| {
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| CallBridgeError::CoordinatorUnavailable)?
    }

    /// Register a direct call with a generic handle and no capabilities
    pub async fn display_incoming_call(
        &self,
        application_id: &str,
        handle: &str,
        caller_name: Option<&str>,
        has_video: bool,
    ) -> CallBridgeResult<()> {
        let mut request = IncomingCallRequest::new(application_id, handle, HandleType::Generic)
            .with_video(has_video);
        if let Some(name) = caller_name {
            request = request.with_caller_name(name);
        }
        self.register_incoming_call(request).await
    }

    /// End a call and tell the provider why
    ///
    /// Unknown or already ended ids are ignored. Ending a call whose report
    /// is still in flight cancels it: the call is torn down as soon as the
    /// provider accepts it.
    pub async fn end_call(&self, application_id: &str, reason: EndReason) {
        let (ack, rx) = oneshot::channel();
        let sent = self.send(Command::EndCall {
            application_id: application_id.to_string(),
            reason,
            ack,
        });
        if sent.is_ok() {
            let _ = rx.await;
        }
    }

    /// [`end_call`](Self::end_call) with a bridge reason code; codes outside
    /// `1..=5` end the call as failed
    pub async fn end_call_with_code(&self, application_id: &str, code: i64) {
        let reason = EndReason::from_code(code).unwrap_or_else(|| {
            tracing::warn!(
                call_id = %application_id,
                code,
                "Unknown end reason code, ending as failed"
            );
            EndReason::Failed
        });
        self.end_call(application_id, reason).await;
    }

    /// Place an outgoing call through the provider
    ///
    /// Outgoing calls bypass the busy gate. Starting an id that already has
    /// a live call is a no-op. The host hears back through
    /// [`CallEvent::StartCallRequested`](crate::CallEvent::StartCallRequested)
    /// once the provider performs the start.
    pub async fn start_call(&self, request: OutgoingCallRequest) -> CallBridgeResult<()> {
        self.call(|reply| Command::StartCall { request, reply }).await
    }

    /// Mark a dialing outgoing call as connected
    ///
    /// Calls that are not dialing are left as they are.
    pub async fn set_current_call_active(&self, application_id: &str) -> CallBridgeResult<()> {
        let application_id = application_id.to_string();
        self.call(|reply| Command::SetActive { application_id, reply }).await
    }

    /// Change the handle and caller name the system call UI shows
    pub async fn update_display(
        &self,
        application_id: &str,
        handle: &str,
        caller_name: &str,
    ) -> CallBridgeResult<()> {
        let application_id = application_id.to_string();
        let handle = handle.to_string();
        let caller_name = caller_name.to_string();
        self.call(|reply| Command::UpdateDisplay {
            application_id,
            handle,
            caller_name,
            reply,
        })
        .await
    }

    /// Ask the provider to answer a ringing call
    pub async fn answer_call(&self, application_id: &str) -> CallBridgeResult<()> {
        self.request_action(application_id, CallAction::Answer).await
    }

    /// Ask the provider to end a call through its own UI flow
    pub async fn hangup_call(&self, application_id: &str) -> CallBridgeResult<()> {
        self.request_action(application_id, CallAction::End).await
    }

    pub async fn set_muted_call(&self, application_id: &str, muted: bool) -> CallBridgeResult<()> {
        self.request_action(application_id, CallAction::SetMuted(muted)).await
    }

    pub async fn set_on_hold_call(&self, application_id: &str, held: bool) -> CallBridgeResult<()> {
        self.request_action(application_id, CallAction::SetHeld(held)).await
    }

    async fn request_action(
        &self,
        application_id: &str,
        action: CallAction,
    ) -> CallBridgeResult<()> {
        let application_id = application_id.to_string();
        self.call(|reply| Command::RequestAction { application_id, action, reply }).await
    }

    /// Send a command carrying a reply channel and wait for the answer
    async fn call<F>(&self, command: F) -> CallBridgeResult<()>
    where
        F: FnOnce(oneshot::Sender<CallBridgeResult<()>>) -> Command,
    {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply))
            .map_err(|_| CallBridgeError::CoordinatorUnavailable)?;
        rx.await.map_err(|_| CallBridgeError::CoordinatorUnavailable)?
    }
}
