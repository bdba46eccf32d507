//! # Orderflow Executor Crate
//!
//! This crate provides the in-memory market and account model the order engine
//! executes against:
//!
//! - `BalanceLedger`: balance / reserved / available bookkeeping on top of a `BalanceStore`.
//! - `book`: the synthetic bid/ask ladder and its depletion as fills consume it.
//! - `SimulatedExecutor`: pure fill computation (ladder walks, crossing checks, cost estimates).
//! - `PortfolioAccountant`: turns settled trades into balance movements and positions.
//! - `PriceSource`: the reference-price collaborator.
//!
//! ## Architectural Principles
//!
//! - **State vs. Logic Decoupling:** The `SimulatedExecutor` is a pure calculator that
//!   determines the fills an order would receive without mutating anything. The
//!   `BalanceLedger` and `PortfolioAccountant` are the state holders that apply
//!   the results of an execution.
//! - **Check before mutate:** every operation that can fail validates first and
//!   only then touches state, so a failed settlement leaves nothing half-applied.

// Declare the modules that constitute this crate.
pub mod book;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod portfolio;
pub mod prices;

// Re-export the key components to provide a clean, public-facing API.
pub use book::{generate_order_book, update_order_book_after_execution};
pub use error::ExecutorError;
pub use exchange::{CostEstimate, EstimationParams, FillOutcome, SimulatedExecutor};
pub use ledger::{BalanceLedger, BalanceStore, InMemoryBalanceStore};
pub use portfolio::{PortfolioAccountant, PortfolioSummary};
pub use prices::{PriceSource, StaticPriceSource};
