//! Pre-trade risk and validation.
//!
//! Validation never mutates anything: it reads the balance ledger and a cost
//! estimate, and returns blocking errors alongside non-blocking warnings.

pub mod error;
pub mod validator;

pub use error::RiskError;
pub use validator::{
    PreTradeValidator, ValidationContext, ValidationResult, calculate_required_balance, spend_asset,
};

use core_types::OrderParams;

/// The seam between the order manager and its pre-trade checks.
pub trait OrderValidator: Send + Sync {
    fn validate(&self, params: &OrderParams, ctx: &ValidationContext<'_>) -> ValidationResult;
}
