//! Process-wide call bridge settings
//!
//! Settings arrive from the host as a loosely typed options map (the same
//! shape the UI bridge passes through `setSettings`). They are merged field by
//! field over the current values; unknown keys and mistyped values are
//! skipped so a newer host never breaks an older bridge.
//!
//! # Example
//!
//! ```rust
//! use callbridge_core::settings::{SettingsStore, HandleType};
//! use serde_json::json;
//!
//! let store = SettingsStore::default();
//! let options = json!({ "shouldRejectCallWhenBusy": true, "handleType": ["number", "email"] });
//! store.replace(options.as_object().unwrap());
//!
//! let settings = store.get();
//! assert!(settings.should_reject_call_when_busy);
//! assert!(settings.supported_handle_types.contains(&HandleType::Email));
//! ```

use std::collections::BTreeSet;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::call::CallCapabilities;

/// Raw options map as delivered by the host
pub type OptionsMap = Map<String, Value>;

/// Kind of remote handle shown by the telephony UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleType {
    Generic,
    Number,
    Email,
}

impl HandleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleType::Generic => "generic",
            HandleType::Number => "number",
            HandleType::Email => "email",
        }
    }
}

impl std::fmt::Display for HandleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a host handle type string onto [`HandleType`]
///
/// Unrecognized strings map to `Generic`; this never fails.
pub fn map_handle_type(handle_type: &str) -> HandleType {
    match handle_type {
        "generic" => HandleType::Generic,
        "number" | "phone" => HandleType::Number,
        "email" => HandleType::Email,
        other => {
            tracing::debug!(handle_type = %other, "Unknown handle type, using generic");
            HandleType::Generic
        }
    }
}

fn default_handle_types() -> BTreeSet<HandleType> {
    BTreeSet::from([HandleType::Number])
}

/// Current call bridge settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Ask the provider to prepare the audio session when a call is answered
    pub auto_configure_audio_session: bool,
    /// Refuse new registrations while another call occupies the slot
    pub should_reject_call_when_busy: bool,
    #[serde(rename = "handleType")]
    pub supported_handle_types: BTreeSet<HandleType>,
    pub supports_video: bool,
    pub maximum_call_groups: usize,
    pub maximum_calls_per_call_group: usize,
    pub includes_calls_in_recents: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ringtone_sound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    /// Milliseconds before an unreachable-app call is ended; enforced by the host
    #[serde(rename = "displayCallTimeout")]
    pub display_call_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_configure_audio_session: false,
            should_reject_call_when_busy: false,
            supported_handle_types: default_handle_types(),
            supports_video: true,
            maximum_call_groups: 1,
            maximum_calls_per_call_group: 1,
            includes_calls_in_recents: true,
            provider_display_name: None,
            ringtone_sound: None,
            image_name: None,
            display_call_timeout_ms: 60_000,
        }
    }
}

impl Settings {
    /// Build settings from defaults plus an options map
    pub fn from_options(options: &OptionsMap) -> Self {
        let mut settings = Self::default();
        settings.apply_options(options);
        settings
    }

    /// Merge `options` over the current values
    ///
    /// Fields not mentioned keep their value. Unknown keys are ignored and
    /// values of the wrong type are skipped with a warning.
    pub fn apply_options(&mut self, options: &OptionsMap) {
        for (key, value) in options {
            match key.as_str() {
                "autoConfigureAudioSession" => {
                    merge_bool(key, value, &mut self.auto_configure_audio_session)
                }
                "shouldRejectCallWhenBusy" => {
                    merge_bool(key, value, &mut self.should_reject_call_when_busy)
                }
                "supportsVideo" => merge_bool(key, value, &mut self.supports_video),
                "includesCallsInRecents" | "callsHistory" => {
                    merge_bool(key, value, &mut self.includes_calls_in_recents)
                }
                "maximumCallGroups" => merge_count(key, value, &mut self.maximum_call_groups),
                "maximumCallsPerCallGroup" => {
                    merge_count(key, value, &mut self.maximum_calls_per_call_group)
                }
                "providerDisplayName" | "localizedName" => {
                    merge_text(key, value, &mut self.provider_display_name)
                }
                "ringtoneSound" | "sound" => merge_text(key, value, &mut self.ringtone_sound),
                "imageName" => merge_text(key, value, &mut self.image_name),
                "displayCallTimeout" => match value.as_u64() {
                    Some(timeout) => self.display_call_timeout_ms = timeout,
                    None => warn_mistyped(key, value),
                },
                "handleType" => match parse_handle_types(value) {
                    Some(types) => self.supported_handle_types = types,
                    None => warn_mistyped(key, value),
                },
                other => {
                    tracing::debug!(option = %other, "Ignoring unknown settings option");
                }
            }
        }
    }

    /// Render the settings back into an options map
    pub fn to_options(&self) -> OptionsMap {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => OptionsMap::new(),
        }
    }

    /// Handle type used for calls whose payload does not name one
    ///
    /// First configured type in the order generic, number, email.
    pub fn preferred_handle_type(&self) -> HandleType {
        self.supported_handle_types
            .iter()
            .next()
            .copied()
            .unwrap_or(HandleType::Generic)
    }
}

fn warn_mistyped(key: &str, value: &Value) {
    tracing::warn!(option = %key, value = %value, "Ignoring settings option with unexpected type");
}

fn merge_bool(key: &str, value: &Value, slot: &mut bool) {
    match value.as_bool() {
        Some(flag) => *slot = flag,
        None => warn_mistyped(key, value),
    }
}

fn merge_count(key: &str, value: &Value, slot: &mut usize) {
    match value.as_u64() {
        Some(count) if count > 0 => *slot = count as usize,
        _ => warn_mistyped(key, value),
    }
}

fn merge_text(key: &str, value: &Value, slot: &mut Option<String>) {
    match value {
        Value::String(text) if text.is_empty() => *slot = None,
        Value::String(text) => *slot = Some(text.clone()),
        Value::Null => *slot = None,
        _ => warn_mistyped(key, value),
    }
}

/// A single string or an array of strings; anything else is rejected
fn parse_handle_types(value: &Value) -> Option<BTreeSet<HandleType>> {
    match value {
        Value::String(single) => Some(BTreeSet::from([map_handle_type(single)])),
        Value::Array(items) => {
            let types: BTreeSet<HandleType> = items
                .iter()
                .filter_map(Value::as_str)
                .map(map_handle_type)
                .collect();
            if types.is_empty() {
                Some(default_handle_types())
            } else {
                Some(types)
            }
        }
        _ => None,
    }
}

/// Configuration handed to the platform telephony provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfiguration {
    pub localized_name: Option<String>,
    pub supports_video: bool,
    pub maximum_call_groups: usize,
    pub maximum_calls_per_call_group: usize,
    pub supported_handle_types: BTreeSet<HandleType>,
    pub ringtone_sound: Option<String>,
    pub icon_template_image: Option<String>,
    pub includes_calls_in_recents: bool,
}

impl ProviderConfiguration {
    /// Derive the provider configuration for a call with `capabilities`
    ///
    /// Pure function of its inputs. Without negotiated grouping a group holds
    /// exactly one call.
    pub fn derive(settings: &Settings, capabilities: &CallCapabilities) -> Self {
        let maximum_calls_per_call_group = if capabilities.supports_grouping {
            settings.maximum_calls_per_call_group
        } else {
            1
        };

        Self {
            localized_name: settings.provider_display_name.clone(),
            supports_video: settings.supports_video,
            maximum_call_groups: settings.maximum_call_groups,
            maximum_calls_per_call_group,
            supported_handle_types: settings.supported_handle_types.clone(),
            ringtone_sound: settings.ringtone_sound.clone(),
            icon_template_image: settings.image_name.clone(),
            includes_calls_in_recents: settings.includes_calls_in_recents,
        }
    }
}

/// Supplier of raw options, e.g. a host configuration loader
pub trait SettingsSource {
    fn raw_options(&self) -> OptionsMap;
}

impl SettingsSource for OptionsMap {
    fn raw_options(&self) -> OptionsMap {
        self.clone()
    }
}

impl SettingsSource for Settings {
    fn raw_options(&self) -> OptionsMap {
        self.to_options()
    }
}

/// Owner of the process-wide [`Settings`]
///
/// Created once by the call bridge builder and shared by reference; replaced
/// only through [`replace`](Self::replace), never reset implicitly.
#[derive(Debug, Default)]
pub struct SettingsStore {
    current: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: RwLock::new(settings),
        }
    }

    /// Build a store from a settings source
    pub fn from_source(source: &dyn SettingsSource) -> Self {
        Self::new(Settings::from_options(&source.raw_options()))
    }

    /// Snapshot of the current settings
    pub fn get(&self) -> Settings {
        self.current.read().clone()
    }

    /// Merge `options` over the current settings and return the result
    pub fn replace(&self, options: &OptionsMap) -> Settings {
        let mut current = self.current.write();
        current.apply_options(options);
        tracing::debug!(options = ?options.keys().collect::<Vec<_>>(), "Settings replaced");
        current.clone()
    }

    /// Re-read options from `source` and merge them
    pub fn reconfigure(&self, source: &dyn SettingsSource) -> Settings {
        self.replace(&source.raw_options())
    }

    pub fn set_should_reject_call_when_busy(&self, should_reject: bool) {
        self.current.write().should_reject_call_when_busy = should_reject;
        tracing::debug!(should_reject, "Busy-reject policy updated");
    }

    pub fn should_reject_call_when_busy(&self) -> bool {
        self.current.read().should_reject_call_when_busy
    }

    /// Provider configuration for a call with `capabilities`
    pub fn provider_configuration(&self, capabilities: &CallCapabilities) -> ProviderConfiguration {
        ProviderConfiguration::derive(&self.current.read(), capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> OptionsMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_map_handle_type_fallback() {
        assert_eq!(map_handle_type("carrier-pigeon"), HandleType::Generic);
        assert_eq!(map_handle_type("phone"), HandleType::Number);
        assert_eq!(map_handle_type("number"), HandleType::Number);
        assert_eq!(map_handle_type("email"), HandleType::Email);
        assert_eq!(map_handle_type(""), HandleType::Generic);
    }

    #[test]
    fn test_replace_changes_only_named_fields() {
        let store = SettingsStore::new(Settings::from_options(&options(json!({
            "autoConfigureAudioSession": true,
            "handleType": "email",
            "ringtoneSound": "ring.caf",
        }))));
        let before = store.get();

        let after = store.replace(&options(json!({ "shouldRejectCallWhenBusy": true })));

        assert!(after.should_reject_call_when_busy);
        assert_eq!(
            Settings { should_reject_call_when_busy: false, ..after.clone() },
            before
        );
    }

    #[test]
    fn test_unknown_and_mistyped_options_are_ignored() {
        let store = SettingsStore::default();
        let after = store.replace(&options(json!({
            "someFutureOption": 42,
            "supportsVideo": "yes",
            "maximumCallGroups": 0,
        })));
        assert_eq!(after, Settings::default());
    }

    #[test]
    fn test_aliases() {
        let settings = Settings::from_options(&options(json!({
            "sound": "bell.caf",
            "callsHistory": false,
            "localizedName": "Acme",
        })));
        assert_eq!(settings.ringtone_sound.as_deref(), Some("bell.caf"));
        assert!(!settings.includes_calls_in_recents);
        assert_eq!(settings.provider_display_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_handle_type_array_and_preference() {
        let settings = Settings::from_options(&options(json!({
            "handleType": ["email", "phone", "carrier-pigeon"],
        })));
        assert_eq!(settings.supported_handle_types.len(), 3);
        assert_eq!(settings.preferred_handle_type(), HandleType::Generic);

        let settings = Settings::from_options(&options(json!({ "handleType": ["email"] })));
        assert_eq!(settings.preferred_handle_type(), HandleType::Email);
    }

    #[test]
    fn test_get_returns_a_copy() {
        let store = SettingsStore::default();
        let mut snapshot = store.get();
        snapshot.should_reject_call_when_busy = true;
        assert!(!store.get().should_reject_call_when_busy);
    }

    #[test]
    fn test_options_round_trip_through_settings() {
        let settings = Settings::from_options(&options(json!({
            "shouldRejectCallWhenBusy": true,
            "imageName": "logo",
            "displayCallTimeout": 30000,
        })));
        let rendered = settings.to_options();
        assert_eq!(rendered.get("shouldRejectCallWhenBusy"), Some(&json!(true)));
        assert_eq!(rendered.get("handleType"), Some(&json!(["number"])));
        assert_eq!(rendered.get("displayCallTimeout"), Some(&json!(30000)));
        assert!(rendered.get("ringtoneSound").is_none());
        assert_eq!(Settings::from_options(&rendered), settings);
    }

    #[test]
    fn test_provider_configuration_grouping() {
        let settings = Settings {
            maximum_calls_per_call_group: 3,
            provider_display_name: Some("Acme".into()),
            ..Settings::default()
        };

        let single = ProviderConfiguration::derive(&settings, &CallCapabilities::default());
        assert_eq!(single.maximum_calls_per_call_group, 1);
        assert_eq!(single.localized_name.as_deref(), Some("Acme"));

        let grouped = ProviderConfiguration::derive(
            &settings,
            &CallCapabilities { supports_grouping: true, ..CallCapabilities::default() },
        );
        assert_eq!(grouped.maximum_calls_per_call_group, 3);
        assert_eq!(
            ProviderConfiguration::derive(&settings, &CallCapabilities::default()),
            single
        );
    }
}
