pub mod config;
pub mod discovery;
pub mod error;
pub mod ledger;
pub mod types;
pub mod visit;

pub use config::AppConfig;
pub use error::{PerkError, PerkResult};
