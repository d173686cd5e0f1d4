//! Call records and the call lifecycle state machine
//!
//! ```text
//! Pending ──► Reported ──► Active ──► Ended
//!    │           │  ╲                  ▲
//!    │           │   ╲► Rejected ──────┤
//!    └──► Failed ◄┘                    │
//!           └──────────────────────────┘
//! ```
//!
//! `Pending` and `Reported` may also move straight to `Ended` when the call is
//! cancelled before it was answered.
//!
//! Outgoing calls start in `Dialing` and move to `Active` once the host marks
//! them connected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::CallIdentity;
use crate::settings::HandleType;

/// Current state of a bridged call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Registration received, not yet accepted by the provider
    Pending,
    /// Outgoing call requested, not yet connected
    Dialing,
    /// Accepted by the provider and ringing
    Reported,
    /// Answered by the user
    Active,
    /// Declined locally before it was answered
    Rejected,
    /// The provider refused or dropped the call
    Failed,
    /// Terminal; the record is retired
    Ended,
}

impl CallState {
    /// Check if `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Pending, Reported)
                | (Pending, Failed)
                | (Pending, Ended)
                | (Dialing, Active)
                | (Dialing, Failed)
                | (Dialing, Ended)
                | (Reported, Active)
                | (Reported, Rejected)
                | (Reported, Failed)
                | (Reported, Ended)
                | (Active, Failed)
                | (Active, Ended)
                | (Rejected, Ended)
                | (Failed, Ended)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended)
    }

    /// Whether a call in this state holds the single reportable-call slot
    pub fn occupies_slot(&self) -> bool {
        matches!(
            self,
            CallState::Pending | CallState::Dialing | CallState::Reported | CallState::Active
        )
    }
}

/// Why a call ended
///
/// The numeric codes are part of the bridge wire format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum EndReason {
    Failed = 1,
    RemoteEnded = 2,
    Unanswered = 3,
    AnsweredElsewhere = 4,
    DeclinedElsewhere = 5,
}

impl EndReason {
    /// Parse a bridge reason code; `None` outside `1..=5`
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(EndReason::Failed),
            2 => Some(EndReason::RemoteEnded),
            3 => Some(EndReason::Unanswered),
            4 => Some(EndReason::AnsweredElsewhere),
            5 => Some(EndReason::DeclinedElsewhere),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Failed => "failed",
            EndReason::RemoteEnded => "remoteEnded",
            EndReason::Unanswered => "unanswered",
            EndReason::AnsweredElsewhere => "answeredElsewhere",
            EndReason::DeclinedElsewhere => "declinedElsewhere",
        }
    }
}

impl From<EndReason> for u8 {
    fn from(reason: EndReason) -> Self {
        reason.code()
    }
}

impl TryFrom<u8> for EndReason {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        EndReason::from_code(code as i64).ok_or_else(|| format!("invalid end reason code {}", code))
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who initiated a lifecycle action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionSource {
    /// Requested by the application
    App,
    /// Performed through the system call UI
    #[serde(rename = "sys")]
    System,
}

/// How the registration reached the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallOrigin {
    PushDelivered,
    Direct,
    Outgoing,
}

/// Per-call features advertised to the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCapabilities {
    pub supports_holding: bool,
    #[serde(rename = "supportsDTMF")]
    pub supports_dtmf: bool,
    pub supports_grouping: bool,
    pub supports_ungrouping: bool,
}

/// A request to register an incoming call
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCallRequest {
    pub application_id: String,
    pub handle: String,
    pub handle_type: HandleType,
    pub has_video: bool,
    pub caller_name: Option<String>,
    pub capabilities: CallCapabilities,
    pub origin: CallOrigin,
    /// Original push payload, echoed back on the display event
    pub payload: Option<Value>,
}

impl IncomingCallRequest {
    /// Create a direct (non-push) registration with no capabilities
    pub fn new(
        application_id: impl Into<String>,
        handle: impl Into<String>,
        handle_type: HandleType,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            handle: handle.into(),
            handle_type,
            has_video: false,
            caller_name: None,
            capabilities: CallCapabilities::default(),
            origin: CallOrigin::Direct,
            payload: None,
        }
    }

    pub fn with_video(mut self, has_video: bool) -> Self {
        self.has_video = has_video;
        self
    }

    pub fn with_caller_name(mut self, caller_name: impl Into<String>) -> Self {
        self.caller_name = Some(caller_name.into());
        self
    }

    pub fn with_capabilities(mut self, capabilities: CallCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Mark the request as push-delivered, keeping the raw payload
    pub fn from_push(mut self, payload: Option<Value>) -> Self {
        self.origin = CallOrigin::PushDelivered;
        self.payload = payload;
        self
    }

    pub fn is_from_push(&self) -> bool {
        self.origin == CallOrigin::PushDelivered
    }

    /// Provider-facing description of the call
    pub fn call_update(&self) -> CallUpdate {
        CallUpdate {
            remote_handle: self.handle.clone(),
            handle_type: self.handle_type,
            has_video: self.has_video,
            localized_caller_name: self.caller_name.clone(),
            capabilities: self.capabilities,
        }
    }
}

/// A request to place an outgoing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingCallRequest {
    pub application_id: String,
    pub handle: String,
    pub caller_name: Option<String>,
    pub has_video: bool,
}

impl OutgoingCallRequest {
    pub fn new(application_id: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            handle: handle.into(),
            caller_name: None,
            has_video: false,
        }
    }

    pub fn with_caller_name(mut self, caller_name: impl Into<String>) -> Self {
        self.caller_name = Some(caller_name.into());
        self
    }

    pub fn with_video(mut self, has_video: bool) -> Self {
        self.has_video = has_video;
        self
    }
}

/// What the provider is told about a call when it is reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallUpdate {
    pub remote_handle: String,
    pub handle_type: HandleType,
    pub has_video: bool,
    pub localized_caller_name: Option<String>,
    pub capabilities: CallCapabilities,
}

/// One live call owned by the coordinator
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub identity: CallIdentity,
    pub handle: String,
    pub handle_type: HandleType,
    pub has_video: bool,
    pub caller_name: Option<String>,
    pub capabilities: CallCapabilities,
    pub origin: CallOrigin,
    pub state: CallState,
    pub on_hold: bool,
    pub muted: bool,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallRecord {
    /// New record in `Pending` for `request`
    pub fn pending(identity: CallIdentity, request: &IncomingCallRequest) -> Self {
        Self {
            identity,
            handle: request.handle.clone(),
            handle_type: request.handle_type,
            has_video: request.has_video,
            caller_name: request.caller_name.clone(),
            capabilities: request.capabilities,
            origin: request.origin,
            state: CallState::Pending,
            on_hold: false,
            muted: false,
            created_at: Utc::now(),
            answered_at: None,
            ended_at: None,
        }
    }

    /// New record in `Dialing` for an outgoing call
    ///
    /// Outgoing calls always use a generic handle and no capabilities.
    pub fn dialing(identity: CallIdentity, request: &OutgoingCallRequest) -> Self {
        Self {
            identity,
            handle: request.handle.clone(),
            handle_type: HandleType::Generic,
            has_video: request.has_video,
            caller_name: request.caller_name.clone(),
            capabilities: CallCapabilities::default(),
            origin: CallOrigin::Outgoing,
            state: CallState::Dialing,
            on_hold: false,
            muted: false,
            created_at: Utc::now(),
            answered_at: None,
            ended_at: None,
        }
    }

    /// Provider-facing description of the call as it stands
    pub fn call_update(&self) -> CallUpdate {
        CallUpdate {
            remote_handle: self.handle.clone(),
            handle_type: self.handle_type,
            has_video: self.has_video,
            localized_caller_name: self.caller_name.clone(),
            capabilities: self.capabilities,
        }
    }

    /// Time from creation to the end of the call, once ended
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|ended| ended - self.created_at)
    }

    pub fn application_id(&self) -> &str {
        &self.identity.application_id
    }

    /// Move to `next` if legal; returns the previous state on success
    pub fn transition(&mut self, next: CallState) -> Option<CallState> {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                call_id = %self.identity.application_id,
                from = ?self.state,
                to = ?next,
                "Ignoring illegal call state transition"
            );
            return None;
        }

        let previous = self.state;
        self.state = next;
        match next {
            CallState::Active => self.answered_at = Some(Utc::now()),
            CallState::Ended => self.ended_at = Some(Utc::now()),
            _ => {}
        }
        tracing::info!(
            call_id = %self.identity.application_id,
            from = ?previous,
            to = ?next,
            "Call state changed"
        );
        Some(previous)
    }
}

/// Read-only view of a call published for synchronous queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSnapshot {
    pub state: CallState,
    pub on_hold: bool,
    pub muted: bool,
}

impl From<&CallRecord> for CallSnapshot {
    fn from(record: &CallRecord) -> Self {
        Self {
            state: record.state,
            on_hold: record.on_hold,
            muted: record.muted,
        }
    }
}
