//! # Orderflow Core Types
//!
//! The shared vocabulary of the order execution engine: orders and their fills,
//! the synthetic order book, balances and portfolio positions.
//!
//! As a Layer 0 crate it has no knowledge of how orders are matched or how
//! balances are stored; it only guarantees that the data it describes stays
//! internally consistent (fill aggregation, legal status transitions).

pub mod book;
pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use book::{BookLevel, OrderBook};
pub use enums::{OrderSide, OrderStatus, OrderType, Priority, TimeInForce};
pub use error::CoreError;
pub use structs::{
    Balance, ClosedPosition, Order, OrderFill, OrderMetadata, OrderParams, OrderPatch,
    PortfolioAsset, Trade,
};
