use std::sync::Arc;

use super::{CallCoordinator, CoordinatorConfig};
use crate::provider::TelephonyProvider;
use crate::settings::{OptionsMap, Settings, SettingsSource, SettingsStore};

/// Builder for creating a call coordinator
pub struct CallBridgeBuilder {
    provider: Arc<dyn TelephonyProvider>,
    settings: Settings,
    config: CoordinatorConfig,
}

impl CallBridgeBuilder {
    /// Create a builder around the platform telephony provider
    pub fn new(provider: Arc<dyn TelephonyProvider>) -> Self {
        Self {
            provider,
            settings: Settings::default(),
            config: CoordinatorConfig::default(),
        }
    }

    /// Replace the telephony provider
    pub fn provider(mut self, provider: Arc<dyn TelephonyProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Start from explicit settings
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Merge raw host options over the settings so far
    pub fn options(mut self, options: &OptionsMap) -> Self {
        self.settings.apply_options(options);
        self
    }

    /// Merge options read from a configuration source
    pub fn settings_source(mut self, source: &dyn SettingsSource) -> Self {
        self.settings.apply_options(&source.raw_options());
        self
    }

    pub fn event_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.event_buffer_capacity = capacity;
        self
    }

    /// Hold events until the host calls `take_initial_events`
    pub fn buffer_initial_events(mut self, buffer: bool) -> Self {
        self.config.buffer_events_until_listener = buffer;
        self
    }

    /// Build the coordinator and start its task
    pub async fn build(self) -> CallCoordinator {
        tracing::info!(
            reject_when_busy = self.settings.should_reject_call_when_busy,
            auto_audio = self.settings.auto_configure_audio_session,
            "Starting call coordinator"
        );
        CallCoordinator::start(
            self.provider,
            Arc::new(SettingsStore::new(self.settings)),
            self.config,
        )
    }
}
