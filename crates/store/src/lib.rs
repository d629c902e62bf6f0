#![warn(clippy::unwrap_used)]

pub mod documents;
pub mod dynamo;
pub mod geo;
pub mod memory;
pub mod memory_geo;
pub mod postgres;

pub use documents::{
    InsertOutcome, OrganizationStore, PlanStore, RedeemOutcome, RewardStore, ShopStore, VisitStore,
};
pub use dynamo::DynamoStore;
pub use geo::GeoIndex;
pub use memory::MemoryStore;
pub use memory_geo::MemoryGeoIndex;
pub use postgres::PostgresGeoIndex;
