//! Tenant-side domain types: organizations, their shops, and the reward
//! program settings an organization configures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ─── Organization ───────────────────────────────────────────────────────────

/// A tenant. Owns shops, links one point-of-sale provider, and runs up to two
/// independent reward programs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Organization {
    pub id: String,
    pub owner_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub provider: ProviderLink,
    /// Null until billing is configured.
    #[serde(default)]
    pub payment_provider_customer_id: Option<String>,
    /// Gates visibility and search.
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub loyalty_active: bool,
    #[serde(default)]
    pub milestone_active: bool,
    #[serde(default)]
    pub loyalty_config: LoyaltyProgram,
    #[serde(default)]
    pub milestone_config: MilestoneProgram,
}

impl Organization {
    /// A freshly onboarded organization: unlinked and inactive.
    pub fn onboard(id: impl Into<String>, owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            name: name.into(),
            images: Vec::new(),
            provider: ProviderLink::default(),
            payment_provider_customer_id: None,
            active: false,
            loyalty_active: false,
            milestone_active: false,
            loyalty_config: LoyaltyProgram::default(),
            milestone_config: MilestoneProgram::default(),
        }
    }

    /// Linked and holding a non-empty access token.
    pub fn is_linked(&self) -> bool {
        self.provider.linked
            && self
                .provider
                .access_token
                .as_deref()
                .map(|t| !t.is_empty())
                .unwrap_or(false)
    }

    pub fn program_flags(&self) -> ProgramFlags {
        ProgramFlags {
            loyalty_active: self.loyalty_active,
            milestone_active: self.milestone_active,
        }
    }

    /// Clear provider tokens and drop out of search. Billing identity is kept.
    pub fn unlink(&mut self) {
        self.provider = ProviderLink::default();
        self.active = false;
    }
}

/// Point-of-sale link state. `access_token` is hex ciphertext at rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderLink {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub linked: bool,
}

impl ProviderLink {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Which reward programs fire for a visit.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgramFlags {
    pub loyalty_active: bool,
    pub milestone_active: bool,
}

// ─── Program Configuration ──────────────────────────────────────────────────

/// Visit-count tiers. Reaching `visits` unlocks every reward in the tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct LoyaltyProgram {
    #[serde(default)]
    pub tiers: Vec<LoyaltyTier>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct LoyaltyTier {
    pub visits: u64,
    pub rewards: Vec<String>,
}

/// Spend thresholds, in points.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct MilestoneProgram {
    #[serde(default)]
    pub thresholds: Vec<MilestoneThreshold>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct MilestoneThreshold {
    pub points: u64,
    pub reward_options: Vec<String>,
}

// ─── Shop ───────────────────────────────────────────────────────────────────

/// A physical location belonging to exactly one organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shop {
    pub id: String,
    pub org_id: String,
    #[serde(default)]
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub shop_hours: Option<serde_json::Value>,
    /// Location id at the linked point-of-sale provider.
    #[serde(default)]
    pub square_location_id: Option<String>,
    #[serde(default)]
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn linked_org() -> Organization {
        let mut org = Organization::onboard("org-1", "owner-1", "Corner Cafe");
        org.provider = ProviderLink {
            access_token: Some("deadbeef".into()),
            refresh_token: Some("refresh".into()),
            expires_at: Some(Utc::now() + Duration::days(30)),
            linked: true,
        };
        org.active = true;
        org
    }

    #[test]
    fn test_onboard_starts_unlinked_and_inactive() {
        let org = Organization::onboard("org-1", "owner-1", "Corner Cafe");
        assert!(!org.is_linked());
        assert!(!org.active);
        assert_eq!(org.program_flags(), ProgramFlags::default());
    }

    #[test]
    fn test_linked_requires_token() {
        let mut org = linked_org();
        assert!(org.is_linked());
        org.provider.access_token = Some(String::new());
        assert!(!org.is_linked());
    }

    #[test]
    fn test_unlink_clears_tokens_and_deactivates() {
        let mut org = linked_org();
        org.payment_provider_customer_id = Some("cus_1".into());
        org.unlink();
        assert!(!org.is_linked());
        assert!(!org.active);
        assert!(org.provider.access_token.is_none());
        assert_eq!(org.payment_provider_customer_id.as_deref(), Some("cus_1"));
    }

    #[test]
    fn test_token_expiry() {
        let now = Utc::now();
        let mut link = ProviderLink::default();
        assert!(!link.is_expired(now));
        link.expires_at = Some(now - Duration::seconds(1));
        assert!(link.is_expired(now));
    }
}
