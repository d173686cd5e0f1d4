//! Callbridge-core: call identity registry and call-state coordinator
//!
//! This crate bridges push-triggered incoming calls to a platform's native
//! telephony provider. It keeps a stable mapping between the application's
//! call id and the token the provider requires, and drives the lifecycle of
//! every call against that single provider.
//!
//! ## Layering
//! ```text
//! push transport -> PushIntake -> CallCoordinator -> TelephonyProvider
//!                                       ^                   |
//!                                       +- ProviderDelegate <+
//! host UI <- CallEvent <----------------+
//! ```
//!
//! Callbridge-core focuses on:
//! - Admission control (busy-reject policy) and the call state machine
//! - Outgoing calls started by the host and marked connected once media flows
//! - The application id / provider token registry
//! - Settings shared with the provider configuration
//! - Lifecycle events for the host UI bridge
//!
//! Audio routing, signaling transport, call screen rendering and push
//! delivery itself are the host's business.

pub mod call;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod identity;
pub mod logging;
pub mod provider;
pub mod push;
pub mod settings;

// Public API exports
pub use call::{
    ActionSource, CallCapabilities, CallOrigin, CallRecord, CallSnapshot, CallState, CallUpdate,
    EndReason, IncomingCallRequest, OutgoingCallRequest,
};
pub use coordinator::{
    CallBridgeBuilder, CallCoordinator, Completion, CoordinatorConfig, ProviderDelegate,
};
pub use error::{CallBridgeError, CallBridgeResult, IncomingCallErrorCode};
pub use events::{CallEvent, CallEventHandler, DisplayIncomingCallInfo, EventDispatcher};
pub use identity::{CallIdentity, IdentityRegistry, ProviderToken};
pub use logging::{log, parse_log_level, setup_logging, LogLevel, LoggingConfig, LoggingError};
pub use provider::{CallAction, ProviderCall, ProviderError, RecordingProvider, TelephonyProvider};
pub use push::{PushDecoder, PushIntake, StreamPushDecoder};
pub use settings::{
    map_handle_type, HandleType, OptionsMap, ProviderConfiguration, Settings, SettingsSource,
    SettingsStore,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
