//! Call identity registry
//!
//! Maps the opaque application call id (e.g. a backend call cid) to the
//! token the telephony provider requires, and back. Both directions live
//! behind a single lock so the two maps are always exact inverses.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier handed to the telephony provider for a call
///
/// Generated internally and never exposed past the coordinator/provider boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderToken(pub Uuid);

impl ProviderToken {
    /// Generate a fresh random token
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProviderToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProviderToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Lowercase hyphenated, matching how platforms print call UUIDs
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for ProviderToken {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// One application id / provider token pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallIdentity {
    pub application_id: String,
    pub provider_token: ProviderToken,
}

#[derive(Debug, Default)]
struct RegistryMaps {
    by_application_id: HashMap<String, ProviderToken>,
    by_token: HashMap<ProviderToken, String>,
}

impl RegistryMaps {
    fn insert(&mut self, application_id: &str, token: ProviderToken) {
        self.by_application_id.insert(application_id.to_string(), token);
        self.by_token.insert(token, application_id.to_string());
    }

    fn fresh_token(&self) -> ProviderToken {
        loop {
            let token = ProviderToken::new();
            if !self.by_token.contains_key(&token) {
                return token;
            }
        }
    }
}

/// Bidirectional application id ↔ provider token registry
///
/// All operations are total: removing an unknown key is a no-op and lookups
/// return `None` rather than failing.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    maps: Mutex<RegistryMaps>,
}

impl IdentityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the token for `application_id`, creating one if absent
    ///
    /// Concurrent callers with the same id all observe the same token.
    pub fn resolve_or_create(&self, application_id: &str) -> ProviderToken {
        self.resolve_or_create_identity(application_id).0.provider_token
    }

    /// Like [`resolve_or_create`](Self::resolve_or_create), also reporting
    /// whether this call created the pair
    pub fn resolve_or_create_identity(&self, application_id: &str) -> (CallIdentity, bool) {
        let mut maps = self.maps.lock();
        if let Some(token) = maps.by_application_id.get(application_id) {
            tracing::debug!(
                call_id = %application_id,
                token = %token,
                "Found existing provider token"
            );
            return (
                CallIdentity {
                    application_id: application_id.to_string(),
                    provider_token: *token,
                },
                false,
            );
        }

        let token = maps.fresh_token();
        maps.insert(application_id, token);
        tracing::debug!(call_id = %application_id, token = %token, "Created provider token");
        (
            CallIdentity {
                application_id: application_id.to_string(),
                provider_token: token,
            },
            true,
        )
    }

    /// Look up the token for an application id
    pub fn lookup_by_application_id(&self, application_id: &str) -> Option<ProviderToken> {
        self.maps.lock().by_application_id.get(application_id).copied()
    }

    /// Look up the application id for a token
    pub fn lookup_by_token(&self, token: &ProviderToken) -> Option<String> {
        self.maps.lock().by_token.get(token).cloned()
    }

    /// Remove the pair keyed by `application_id`; returns the removed identity
    pub fn remove(&self, application_id: &str) -> Option<CallIdentity> {
        let mut maps = self.maps.lock();
        match maps.by_application_id.remove(application_id) {
            Some(token) => {
                maps.by_token.remove(&token);
                tracing::debug!(call_id = %application_id, token = %token, "Removed call identity");
                Some(CallIdentity {
                    application_id: application_id.to_string(),
                    provider_token: token,
                })
            }
            None => {
                tracing::debug!(call_id = %application_id, "No call identity to remove");
                None
            }
        }
    }

    /// Remove the pair keyed by `token`; returns the removed identity
    pub fn remove_by_token(&self, token: &ProviderToken) -> Option<CallIdentity> {
        let mut maps = self.maps.lock();
        match maps.by_token.remove(token) {
            Some(application_id) => {
                maps.by_application_id.remove(&application_id);
                tracing::debug!(call_id = %application_id, token = %token, "Removed call identity");
                Some(CallIdentity {
                    application_id,
                    provider_token: *token,
                })
            }
            None => {
                tracing::debug!(token = %token, "No call identity to remove");
                None
            }
        }
    }

    /// Clear every pair, e.g. after a provider reset
    pub fn remove_all(&self) {
        let mut maps = self.maps.lock();
        let count = maps.by_application_id.len();
        maps.by_application_id.clear();
        maps.by_token.clear();
        tracing::debug!(count, "Cleared call identity registry");
    }

    /// Number of live pairs
    pub fn count(&self) -> usize {
        self.maps.lock().by_application_id.len()
    }

    pub fn contains(&self, application_id: &str) -> bool {
        self.maps.lock().by_application_id.contains_key(application_id)
    }

    pub fn contains_token(&self, token: &ProviderToken) -> bool {
        self.maps.lock().by_token.contains_key(token)
    }

    /// Snapshot of every live pair
    pub fn identities(&self) -> Vec<CallIdentity> {
        self.maps
            .lock()
            .by_application_id
            .iter()
            .map(|(application_id, token)| CallIdentity {
                application_id: application_id.clone(),
                provider_token: *token,
            })
            .collect()
    }

    /// Whether the two directions are exact inverses of each other
    pub fn is_consistent(&self) -> bool {
        let maps = self.maps.lock();
        maps.by_application_id.len() == maps.by_token.len()
            && maps
                .by_application_id
                .iter()
                .all(|(id, token)| maps.by_token.get(token).map(|v| v == id).unwrap_or(false))
    }
}
