//! Error types and handling for the callbridge-core library
//!
//! Only two operations can actually fail at runtime: admission of a new
//! incoming call (busy policy) and the platform report itself. Registry and
//! settings operations are total. Everything else surfaces `NotFound` only
//! where the caller explicitly asked about a specific call.
//!
//! # Error Categories
//!
//! - **Admission** - `Busy`, the busy-reject policy refused the call
//! - **Provider** - `ProviderRejected`, the telephony provider declined the report
//! - **Lookup** - `NotFound`, an explicit operation named an unknown call id
//! - **Push** - `InvalidPayload`, a push payload could not be decoded
//! - **System** - `CoordinatorUnavailable`, the coordinator task has shut down
//!
//! # Handling Completion Errors
//!
//! ```rust,no_run
//! # use callbridge_core::{CallBridgeError, CallCoordinator, IncomingCallRequest};
//! # async fn example(coordinator: CallCoordinator, request: IncomingCallRequest) {
//! match coordinator.register_incoming_call(request).await {
//!     Ok(()) => println!("Call is ringing"),
//!     Err(CallBridgeError::Busy { application_id }) => {
//!         println!("{} rejected, another call is in progress", application_id);
//!     }
//!     Err(CallBridgeError::ProviderRejected { code, .. }) => {
//!         println!("Provider refused the call: {}", code);
//!     }
//!     Err(e) => eprintln!("Registration failed: {}", e),
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for callbridge-core operations
pub type CallBridgeResult<T> = Result<T, CallBridgeError>;

/// Reason codes the telephony provider gives when it refuses an incoming call report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncomingCallErrorCode {
    /// The application is not entitled to report calls
    Unentitled,
    /// The provider already knows a call with this token
    #[serde(rename = "CallUUIDAlreadyExists")]
    CallUuidAlreadyExists,
    /// Suppressed by the user's do-not-disturb setting
    FilteredByDoNotDisturb,
    /// The caller is on the user's block list
    FilteredByBlockList,
    /// Any other provider failure
    Unknown,
}

impl IncomingCallErrorCode {
    /// Stable string form used on the event bridge
    pub fn as_str(&self) -> &'static str {
        match self {
            IncomingCallErrorCode::Unentitled => "Unentitled",
            IncomingCallErrorCode::CallUuidAlreadyExists => "CallUUIDAlreadyExists",
            IncomingCallErrorCode::FilteredByDoNotDisturb => "FilteredByDoNotDisturb",
            IncomingCallErrorCode::FilteredByBlockList => "FilteredByBlockList",
            IncomingCallErrorCode::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for IncomingCallErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the call bridge
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallBridgeError {
    /// Admission denied by the busy-reject policy
    #[error("Call {application_id} rejected: another call is in progress")]
    Busy { application_id: String },

    /// The telephony provider declined the report
    #[error("Provider rejected call {application_id} ({code}): {reason}")]
    ProviderRejected {
        application_id: String,
        code: IncomingCallErrorCode,
        reason: String,
    },

    /// An explicit operation referenced an unknown call id
    #[error("Call not found: {application_id}")]
    NotFound { application_id: String },

    /// A push payload could not be decoded into a registration request
    #[error("Invalid push payload: {reason}")]
    InvalidPayload { reason: String },

    /// The coordinator task is no longer running
    #[error("Call coordinator is not running")]
    CoordinatorUnavailable,
}

impl CallBridgeError {
    /// Create a busy error
    pub fn busy(application_id: impl Into<String>) -> Self {
        Self::Busy { application_id: application_id.into() }
    }

    /// Create a provider rejection error
    pub fn provider_rejected(
        application_id: impl Into<String>,
        code: IncomingCallErrorCode,
        reason: impl Into<String>,
    ) -> Self {
        Self::ProviderRejected {
            application_id: application_id.into(),
            code,
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(application_id: impl Into<String>) -> Self {
        Self::NotFound { application_id: application_id.into() }
    }

    /// Create an invalid payload error
    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Self::InvalidPayload { reason: reason.into() }
    }

    /// Check if retrying the same operation later could succeed
    ///
    /// Provider rejections are terminal for that call: re-reporting risks
    /// duplicate platform UI.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CallBridgeError::Busy { .. } => true,
            CallBridgeError::ProviderRejected { .. }
            | CallBridgeError::NotFound { .. }
            | CallBridgeError::InvalidPayload { .. }
            | CallBridgeError::CoordinatorUnavailable => false,
        }
    }

    /// Provider error code, if this is a provider rejection
    pub fn error_code(&self) -> Option<IncomingCallErrorCode> {
        match self {
            CallBridgeError::ProviderRejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            CallBridgeError::Busy { .. } => "admission",
            CallBridgeError::ProviderRejected { .. } => "provider",
            CallBridgeError::NotFound { .. } => "lookup",
            CallBridgeError::InvalidPayload { .. } => "push",
            CallBridgeError::CoordinatorUnavailable => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(CallBridgeError::busy("a").category(), "admission");
        assert_eq!(
            CallBridgeError::provider_rejected("a", IncomingCallErrorCode::Unknown, "x").category(),
            "provider"
        );
        assert_eq!(CallBridgeError::not_found("a").category(), "lookup");
        assert_eq!(CallBridgeError::invalid_payload("x").category(), "push");
        assert_eq!(CallBridgeError::CoordinatorUnavailable.category(), "system");
    }

    #[test]
    fn test_only_busy_is_recoverable() {
        assert!(CallBridgeError::busy("a").is_recoverable());
        assert!(!CallBridgeError::provider_rejected(
            "a",
            IncomingCallErrorCode::FilteredByBlockList,
            "blocked"
        )
        .is_recoverable());
    }

    #[test]
    fn test_error_code_strings_are_stable() {
        assert_eq!(IncomingCallErrorCode::CallUuidAlreadyExists.as_str(), "CallUUIDAlreadyExists");
        let err = CallBridgeError::provider_rejected(
            "abc",
            IncomingCallErrorCode::FilteredByDoNotDisturb,
            "dnd",
        );
        assert_eq!(err.error_code(), Some(IncomingCallErrorCode::FilteredByDoNotDisturb));
        assert_eq!(err.to_string(), "Provider rejected call abc (FilteredByDoNotDisturb): dnd");
    }

    #[test]
    fn test_error_code_serializes_as_bridge_string() {
        for code in [
            IncomingCallErrorCode::Unentitled,
            IncomingCallErrorCode::CallUuidAlreadyExists,
            IncomingCallErrorCode::FilteredByDoNotDisturb,
            IncomingCallErrorCode::FilteredByBlockList,
            IncomingCallErrorCode::Unknown,
        ] {
            assert_eq!(serde_json::to_value(code).unwrap(), code.as_str());
        }
    }
}
