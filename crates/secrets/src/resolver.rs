//! Credential resolution: provider application keys (cached) and per-tenant
//! OAuth tokens (decrypted fresh on every call).

use crate::cache::{KeyCache, ProviderKeys};
use async_trait::async_trait;
use perk_core::{PerkError, PerkResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Credential store lookup. `Ok(None)` means the secret has no value.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, secret_ref: &str) -> PerkResult<Option<String>>;
}

/// Symmetric decryption service.
#[async_trait]
pub trait TokenDecryptor: Send + Sync {
    async fn decrypt(&self, ciphertext: &[u8], key_ref: &str) -> PerkResult<Vec<u8>>;
}

pub struct CredentialResolver {
    secrets: Arc<dyn SecretStore>,
    decryptor: Arc<dyn TokenDecryptor>,
    cache: Arc<KeyCache>,
}

impl CredentialResolver {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        decryptor: Arc<dyn TokenDecryptor>,
        cache: Arc<KeyCache>,
    ) -> Self {
        Self {
            secrets,
            decryptor,
            cache,
        }
    }

    /// Application credentials, fetched once per process and reused.
    pub async fn provider_keys(&self, secret_ref: &str) -> PerkResult<Arc<ProviderKeys>> {
        if let Some(keys) = self.cache.get(secret_ref) {
            metrics::counter!("secrets.cache.hit").increment(1);
            return Ok(keys);
        }
        metrics::counter!("secrets.cache.miss").increment(1);

        let raw = self
            .secrets
            .get_secret(secret_ref)
            .await?
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| PerkError::Config(format!("secret '{secret_ref}' has no value")))?;

        let keys: ProviderKeys = serde_json::from_str(&raw).map_err(|e| {
            PerkError::Config(format!("secret '{secret_ref}' is not a provider credential: {e}"))
        })?;
        if keys.client_id.is_empty() || keys.client_secret.is_empty() {
            return Err(PerkError::Config(format!(
                "secret '{secret_ref}' has an empty client id or secret"
            )));
        }

        info!(secret_ref = secret_ref, client_id = %keys.client_id, "Provider credentials resolved");
        Ok(self.cache.put(secret_ref, keys))
    }

    /// Decrypt a tenant's stored token. Never cached: tokens differ per tenant
    /// and may have been rotated since the last request.
    pub async fn decrypt_token(&self, ciphertext_hex: &str, key_ref: &str) -> PerkResult<String> {
        let ciphertext = hex::decode(ciphertext_hex.trim())
            .map_err(|e| PerkError::Config(format!("stored provider token is not valid hex: {e}")))?;
        if ciphertext.is_empty() {
            return Err(PerkError::Config("stored provider token is empty".to_string()));
        }

        let plaintext = self.decryptor.decrypt(&ciphertext, key_ref).await?;
        let token = String::from_utf8(plaintext)
            .map_err(|_| PerkError::Config("decrypted provider token is not UTF-8".to_string()))?;
        if token.is_empty() {
            return Err(PerkError::Config("decrypted provider token is empty".to_string()));
        }

        debug!(key_ref = key_ref, "Provider token decrypted");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{PassthroughDecryptor, StaticSecretStore};

    const SECRET_REF: &str = "perk/square-application";

    fn resolver(store: Arc<StaticSecretStore>) -> CredentialResolver {
        CredentialResolver::new(store, Arc::new(PassthroughDecryptor), Arc::new(KeyCache::new()))
    }

    #[tokio::test]
    async fn test_provider_keys_cached_after_first_lookup() {
        let store = Arc::new(StaticSecretStore::new());
        store.insert(SECRET_REF, r#"{"client_id":"app","client_secret":"shh"}"#);
        let resolver = resolver(store.clone());

        let first = resolver.provider_keys(SECRET_REF).await.unwrap();
        let second = resolver.provider_keys(SECRET_REF).await.unwrap();

        assert_eq!(first.client_id, "app");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.lookups(), 1);
    }

    #[tokio::test]
    async fn test_missing_secret_is_configuration_error() {
        let resolver = resolver(Arc::new(StaticSecretStore::new()));
        let err = resolver.provider_keys(SECRET_REF).await.unwrap_err();
        assert!(matches!(err, PerkError::Config(_)));
    }

    #[tokio::test]
    async fn test_malformed_secret_is_configuration_error() {
        let store = Arc::new(StaticSecretStore::new());
        store.insert(SECRET_REF, "not json");
        let err = resolver(store).provider_keys(SECRET_REF).await.unwrap_err();
        assert!(matches!(err, PerkError::Config(_)));
    }

    #[tokio::test]
    async fn test_decrypt_token_round_trips_through_decryptor() {
        let resolver = resolver(Arc::new(StaticSecretStore::new()));
        let stored = hex::encode("EAAAtoken");
        let token = resolver.decrypt_token(&stored, "alias/key").await.unwrap();
        assert_eq!(token, "EAAAtoken");
    }

    #[tokio::test]
    async fn test_decrypt_token_rejects_bad_hex() {
        let resolver = resolver(Arc::new(StaticSecretStore::new()));
        let err = resolver.decrypt_token("zz-not-hex", "alias/key").await.unwrap_err();
        assert!(matches!(err, PerkError::Config(_)));

        let err = resolver.decrypt_token("", "alias/key").await.unwrap_err();
        assert!(matches!(err, PerkError::Config(_)));
    }
}
