#![warn(clippy::unwrap_used)]

pub mod organization;
pub mod pipeline;
pub mod reconcile;
pub mod request;

pub use organization::OrganizationService;
pub use pipeline::{VisitDeps, VisitOutcome, VisitPipeline, VisitStage};
pub use reconcile::LedgerReconciler;
pub use request::{validate, VisitClaim};
