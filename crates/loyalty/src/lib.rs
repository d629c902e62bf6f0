#![warn(clippy::unwrap_used)]

pub mod ledger;
pub mod rules;

pub use ledger::RewardLedger;
pub use rules::AccrualRules;
