//! Process-lifetime cache for provider application credentials.
//! Shared across tenants; entries are only ever replaced wholesale.

use dashmap::DashMap;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Application-level credentials for the point-of-sale provider.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderKeys {
    #[serde(alias = "application_id")]
    pub client_id: String,
    #[serde(alias = "application_secret")]
    pub client_secret: String,
}

impl fmt::Debug for ProviderKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderKeys")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Cache of resolved credentials keyed by secret reference. Starts empty and
/// is populated lazily by the resolver.
#[derive(Default)]
pub struct KeyCache {
    store: DashMap<String, Arc<ProviderKeys>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, secret_ref: &str) -> Option<Arc<ProviderKeys>> {
        self.store.get(secret_ref).map(|entry| entry.value().clone())
    }

    /// Swap in a new entry and hand back the shared reference.
    pub fn put(&self, secret_ref: &str, keys: ProviderKeys) -> Arc<ProviderKeys> {
        let keys = Arc::new(keys);
        self.store.insert(secret_ref.to_string(), keys.clone());
        keys
    }
}
