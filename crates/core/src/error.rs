use thiserror::Error;

pub type PerkResult<T> = Result<T, PerkError>;

#[derive(Error, Debug)]
pub enum PerkError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Point-of-sale provider error: {0}")]
    UpstreamProvider(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Optimistic-concurrency conflict reported by a store. The only storage
    /// failure the ledger retries.
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The visit was durably recorded but the ledger update failed. Carries
    /// what an out-of-band replay needs.
    #[error("Ledger update needs reconciliation for visit {visit_id} (org {org_id}, user {user_id}): {reason}")]
    LedgerReconciliation {
        visit_id: String,
        org_id: String,
        user_id: String,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PerkError {
    /// True for failures the caller caused, which never mutate anything.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PerkError::InvalidRequest(_) | PerkError::NotFound(_) | PerkError::PreconditionFailed(_)
        )
    }

    /// Short stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PerkError::InvalidRequest(_) => "invalid_request",
            PerkError::NotFound(_) => "not_found",
            PerkError::PreconditionFailed(_) => "precondition_failed",
            PerkError::UpstreamProvider(_) => "upstream_provider",
            PerkError::Storage(_) => "storage",
            PerkError::StorageConflict(_) => "storage_conflict",
            PerkError::Config(_) => "configuration",
            PerkError::LedgerReconciliation { .. } => "ledger_reconciliation",
            PerkError::Serialization(_) => "serialization",
            PerkError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        assert!(PerkError::InvalidRequest("x".into()).is_client_error());
        assert!(PerkError::PreconditionFailed("x".into()).is_client_error());
        assert!(!PerkError::UpstreamProvider("x".into()).is_client_error());
        assert!(!PerkError::Config("x".into()).is_client_error());
    }

    #[test]
    fn test_reconciliation_display_carries_ids() {
        let err = PerkError::LedgerReconciliation {
            visit_id: "v-1".into(),
            org_id: "o-1".into(),
            user_id: "u-1".into(),
            reason: "throttled".into(),
        };
        let text = err.to_string();
        assert!(text.contains("v-1"));
        assert!(text.contains("o-1"));
        assert!(text.contains("u-1"));
        assert_eq!(err.kind(), "ledger_reconciliation");
    }
}
