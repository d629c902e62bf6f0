#![warn(clippy::unwrap_used)]

pub mod provider;
pub mod scripted;
pub mod square;
pub mod verifier;

pub use provider::{LookbackWindow, PosProvider};
pub use scripted::ScriptedPosProvider;
pub use square::SquareClient;
pub use verifier::{OrderLookup, OrderVerifier};
