#![warn(clippy::unwrap_used)]

pub mod aws;
pub mod cache;
pub mod memory;
pub mod resolver;

pub use aws::{KmsDecryptor, SecretsManagerStore};
pub use cache::{KeyCache, ProviderKeys};
pub use memory::{PassthroughDecryptor, StaticSecretStore};
pub use resolver::{CredentialResolver, SecretStore, TokenDecryptor};
