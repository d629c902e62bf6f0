//! In-process credential backends for development mode and tests.

use crate::resolver::{SecretStore, TokenDecryptor};
use async_trait::async_trait;
use dashmap::DashMap;
use perk_core::PerkResult;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Secret store backed by a map. Counts lookups.
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: DashMap<String, String>,
    lookups: AtomicUsize,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, secret_ref: &str, value: &str) {
        self.secrets.insert(secret_ref.to_string(), value.to_string());
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, secret_ref: &str) -> PerkResult<Option<String>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.secrets.get(secret_ref).map(|v| v.value().clone()))
    }
}

/// Treats stored ciphertext as the plaintext bytes. Development only: tokens
/// seeded into the memory store are hex-encoded but not encrypted.
pub struct PassthroughDecryptor;

#[async_trait]
impl TokenDecryptor for PassthroughDecryptor {
    async fn decrypt(&self, ciphertext: &[u8], _key_ref: &str) -> PerkResult<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}
