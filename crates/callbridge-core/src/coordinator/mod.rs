//! Call coordinator
//!
//! The coordinator owns every live call and is the only component that talks
//! to the platform [`TelephonyProvider`]. It enforces the call lifecycle
//! state machine and the busy-reject policy, and translates provider
//! callbacks into [`CallEvent`]s for the host.
//!
//! # Architecture Overview
//!
//! - **`actor`** - the task that owns call records and applies commands in order
//! - **`calls`** - registration, outgoing calls, termination and app-initiated call actions
//! - **`delegate`** - [`ProviderDelegate`], the inbound side of the provider
//! - **`builder`** / **`config`** - construction
//!
//! Synchronous queries ([`can_register_call`](CallCoordinator::can_register_call),
//! [`is_call_active`](CallCoordinator::is_call_active),
//! [`has_any_active_call`](CallCoordinator::has_any_active_call)) read a
//! snapshot the task publishes before any completion or event for the same
//! change fires.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use callbridge_core::{CallBridgeBuilder, HandleType, IncomingCallRequest, RecordingProvider};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(RecordingProvider::new());
//! let coordinator = CallBridgeBuilder::new(provider.clone()).build().await;
//! provider.attach_delegate(coordinator.provider_delegate());
//!
//! let request = IncomingCallRequest::new("abc-1", "+15551234567", HandleType::Number);
//! coordinator.register_incoming_call(request).await?;
//! coordinator.answer_call("abc-1").await?;
//! # Ok(())
//! # }
//! ```

mod actor;
pub mod builder;
mod calls;
pub mod config;
mod delegate;

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{broadcast, mpsc, oneshot};

pub use actor::Completion;
pub use builder::CallBridgeBuilder;
pub use config::CoordinatorConfig;
pub use delegate::ProviderDelegate;

use actor::{Command, CoordinatorActor};

use crate::call::{CallRecord, CallSnapshot, CallState};
use crate::events::{CallEvent, CallEventHandler, EventDispatcher};
use crate::identity::{IdentityRegistry, ProviderToken};
use crate::provider::TelephonyProvider;
use crate::settings::{OptionsMap, Settings, SettingsSource, SettingsStore};

/// Handle to a running call coordinator
///
/// Cheap to clone; every clone talks to the same coordinator task. The task
/// stops once the last handle is dropped and in-flight reports have finished.
#[derive(Clone)]
pub struct CallCoordinator {
    command_tx: mpsc::UnboundedSender<Command>,
    registry: Arc<IdentityRegistry>,
    settings: Arc<SettingsStore>,
    snapshots: Arc<DashMap<String, CallSnapshot>>,
    /// Cancelled calls whose report is still in flight
    pending_teardowns: Arc<DashSet<ProviderToken>>,
    events: Arc<EventDispatcher>,
}

impl CallCoordinator {
    /// Spawn the coordinator task
    ///
    /// Must be called from within a tokio runtime; prefer [`CallBridgeBuilder`].
    pub fn start(
        provider: Arc<dyn TelephonyProvider>,
        settings: Arc<SettingsStore>,
        config: CoordinatorConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(IdentityRegistry::new());
        let snapshots = Arc::new(DashMap::new());
        let pending_teardowns = Arc::new(DashSet::new());
        let events = Arc::new(EventDispatcher::new(
            config.event_buffer_capacity,
            config.buffer_events_until_listener,
        ));

        let actor = CoordinatorActor::new(
            provider,
            registry.clone(),
            settings.clone(),
            snapshots.clone(),
            pending_teardowns.clone(),
            events.clone(),
            command_tx.downgrade(),
        );
        tokio::spawn(actor.run(command_rx));

        Self {
            command_tx,
            registry,
            settings,
            snapshots,
            pending_teardowns,
            events,
        }
    }

    /// Delegate the platform provider calls back into
    pub fn provider_delegate(&self) -> ProviderDelegate {
        ProviderDelegate::new(self.command_tx.downgrade())
    }

    // ===== Queries =====

    /// Whether a new registration would pass the busy gate right now
    pub fn can_register_call(&self) -> bool {
        !self.settings.should_reject_call_when_busy() || !self.slot_occupied()
    }

    pub fn is_call_active(&self, application_id: &str) -> bool {
        self.call_state(application_id) == Some(CallState::Active)
    }

    pub fn has_any_active_call(&self) -> bool {
        self.snapshots
            .iter()
            .any(|entry| entry.value().state == CallState::Active)
    }

    /// Current state of a live call
    pub fn call_state(&self, application_id: &str) -> Option<CallState> {
        self.snapshots.get(application_id).map(|entry| entry.value().state)
    }

    pub fn call_snapshot(&self, application_id: &str) -> Option<CallSnapshot> {
        self.snapshots.get(application_id).map(|entry| *entry.value())
    }

    /// Whether `application_id` currently has a provider token
    pub fn is_call_registered(&self, application_id: &str) -> bool {
        self.registry.contains(application_id)
    }

    /// Number of live calls
    pub fn call_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Full record of a live call, read from the coordinator task
    pub async fn call_record(&self, application_id: &str) -> Option<CallRecord> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetRecord {
            application_id: application_id.to_string(),
            reply,
        })
        .ok()?;
        rx.await.ok().flatten()
    }

    fn slot_occupied(&self) -> bool {
        !self.pending_teardowns.is_empty()
            || self
                .snapshots
                .iter()
                .any(|entry| entry.value().state.occupies_slot())
    }

    // ===== Settings =====

    /// Merge host options over the current settings
    pub fn set_settings(&self, options: &OptionsMap) -> Settings {
        self.settings.replace(options)
    }

    /// Current settings as a host options map
    pub fn get_settings(&self) -> OptionsMap {
        self.settings.get().to_options()
    }

    pub fn settings(&self) -> Settings {
        self.settings.get()
    }

    /// Re-read options from a configuration source
    pub fn reconfigure(&self, source: &dyn SettingsSource) -> Settings {
        self.settings.reconfigure(source)
    }

    pub fn set_should_reject_call_when_busy(&self, should_reject: bool) {
        self.settings.set_should_reject_call_when_busy(should_reject);
    }

    // ===== Events =====

    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub fn set_event_handler(&self, handler: Arc<dyn CallEventHandler>) {
        self.events.set_handler(handler);
    }

    /// Events emitted before the host attached; empty after the first call
    pub fn take_initial_events(&self) -> Vec<CallEvent> {
        self.events.take_initial_events()
    }

    /// Wait until every command sent before this call has been applied
    pub async fn drain(&self) {
        let (ack, rx) = oneshot::channel();
        if self.send(Command::Drain { ack }).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, command: Command) -> Result<(), mpsc::error::SendError<Command>> {
        self.command_tx.send(command)
    }
}

impl std::fmt::Debug for CallCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCoordinator")
            .field("calls", &self.snapshots.len())
            .field("identities", &self.registry.count())
            .finish()
    }
}
