//! AWS Secrets Manager and KMS backends.

use crate::resolver::{SecretStore, TokenDecryptor};
use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use perk_core::{PerkError, PerkResult};
use tracing::{info, warn};

pub struct SecretsManagerStore {
    client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerStore {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        info!("Secrets Manager credential store initialized");
        Self {
            client: aws_sdk_secretsmanager::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    async fn get_secret(&self, secret_ref: &str) -> PerkResult<Option<String>> {
        match self.client.get_secret_value().secret_id(secret_ref).send().await {
            Ok(output) => Ok(output.secret_string().map(str::to_string)),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_resource_not_found_exception())
                    .unwrap_or(false);
                if not_found {
                    warn!(secret_ref = secret_ref, "Secret not found");
                    return Ok(None);
                }
                Err(PerkError::Config(format!(
                    "secret lookup for '{secret_ref}' failed: {}",
                    aws_sdk_secretsmanager::error::DisplayErrorContext(&err)
                )))
            }
        }
    }
}

pub struct KmsDecryptor {
    client: aws_sdk_kms::Client,
}

impl KmsDecryptor {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        info!("KMS token decryptor initialized");
        Self {
            client: aws_sdk_kms::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl TokenDecryptor for KmsDecryptor {
    async fn decrypt(&self, ciphertext: &[u8], key_ref: &str) -> PerkResult<Vec<u8>> {
        let output = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext.to_vec()))
            .key_id(key_ref)
            .send()
            .await
            .map_err(|e| {
                PerkError::Config(format!(
                    "token decryption with '{key_ref}' failed: {}",
                    aws_sdk_kms::error::DisplayErrorContext(&e)
                ))
            })?;

        output
            .plaintext()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| PerkError::Config("KMS returned no plaintext".to_string()))
    }
}
