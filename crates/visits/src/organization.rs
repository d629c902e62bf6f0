//! Organization lifecycle: unlinking a point-of-sale provider.

use perk_core::config::SecretsConfig;
use perk_core::types::Organization;
use perk_core::{PerkError, PerkResult};
use perk_pos::PosProvider;
use perk_secrets::CredentialResolver;
use perk_store::{GeoIndex, OrganizationStore};
use std::sync::Arc;
use tracing::{info, warn};

pub struct OrganizationService {
    organizations: Arc<dyn OrganizationStore>,
    geo: Arc<dyn GeoIndex>,
    credentials: Arc<CredentialResolver>,
    provider: Arc<dyn PosProvider>,
    provider_secret_ref: String,
    token_key_ref: String,
}

impl OrganizationService {
    pub fn new(
        organizations: Arc<dyn OrganizationStore>,
        geo: Arc<dyn GeoIndex>,
        credentials: Arc<CredentialResolver>,
        provider: Arc<dyn PosProvider>,
        secrets: &SecretsConfig,
    ) -> Self {
        Self {
            organizations,
            geo,
            credentials,
            provider,
            provider_secret_ref: secrets.provider_secret_ref.clone(),
            token_key_ref: secrets.token_key_ref.clone(),
        }
    }

    /// Disconnect the organization from its provider and drop it from search.
    /// Only the owner may unlink. Repeating an unlink is harmless.
    pub async fn unlink(&self, org_id: &str, caller_id: &str) -> PerkResult<Organization> {
        let organization = self
            .organizations
            .get_organization(org_id)
            .await?
            .ok_or_else(|| PerkError::NotFound(format!("organization {org_id}")))?;
        if organization.owner_id != caller_id {
            return Err(PerkError::PreconditionFailed(format!(
                "only the owner may unlink organization {org_id}"
            )));
        }

        if organization.is_linked() {
            if let Err(err) = self.revoke(&organization).await {
                metrics::counter!("organizations.revoke_failed").increment(1);
                warn!(org_id = %org_id, error = %err, "Provider token revoke failed; unlinking anyway");
            }
        }

        let unlinked = self
            .organizations
            .unlink_organization(org_id)
            .await?
            .ok_or_else(|| PerkError::NotFound(format!("organization {org_id}")))?;
        self.geo.set_org_active(org_id, false).await?;

        metrics::counter!("organizations.unlinked").increment(1);
        info!(org_id = %org_id, provider = self.provider.name(), "Organization unlinked");
        Ok(unlinked)
    }

    async fn revoke(&self, organization: &Organization) -> PerkResult<()> {
        let ciphertext = organization.provider.access_token.as_deref().unwrap_or_default();
        let keys = self.credentials.provider_keys(&self.provider_secret_ref).await?;
        let token = self.credentials.decrypt_token(ciphertext, &self.token_key_ref).await?;
        self.provider.revoke_access(&keys, &token).await
    }
}
