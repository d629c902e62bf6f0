#![warn(clippy::unwrap_used)]

pub mod nearby;

pub use nearby::ShopDiscovery;
