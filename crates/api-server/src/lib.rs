#![warn(clippy::unwrap_used)]

pub mod auth;
pub mod error;
pub mod org_rest;
pub mod plan_rest;
pub mod rest;
pub mod server;
pub mod shop_rest;
pub mod swagger;
pub mod visit_rest;

pub use rest::AppState;
pub use server::ApiServer;
pub use swagger::ApiDoc;
