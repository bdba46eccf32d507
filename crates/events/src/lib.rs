//! # Orderflow Events
//!
//! This crate defines the event structures the engine publishes whenever its
//! state changes: order lifecycle updates, executed trades, rejections and
//! portfolio snapshots.
//!
//! As a Layer 0 crate, it depends only on `core-types` and provides the definitive
//! language for observers (a UI, a recorder, a settlement bridge) of the engine.

// Declare the modules that make up this crate.
pub mod error;
pub mod messages;

// Re-export the core types to provide a clean public API.
pub use error::EventsError;
pub use messages::{EngineEvent, PortfolioState};
