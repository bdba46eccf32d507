use crate::error::EventsError;
use chrono::{DateTime, Utc};
use core_types::{Order, PortfolioAsset, Trade};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A snapshot of the account after a trade settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub timestamp: DateTime<Utc>,
    /// Raw balance of the quote asset.
    pub cash: Decimal,
    pub total_value: Decimal,
    pub positions: Vec<PortfolioAsset>,
}

/// Everything the engine tells its observers.
///
/// Serialized with `#[serde(tag = "type", content = "payload")]`, so a trade looks like
/// `{"type": "TradeExecuted", "payload": {"order_id": "...", ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    /// A new order entered the book of record.
    OrderCreated(Order),
    /// An existing order changed: fills, status, or a caller edit.
    OrderUpdated(Order),
    OrderRejected { order_id: String, reason: String },
    TradeExecuted(Trade),
    PortfolioState(PortfolioState),
}

impl EngineEvent {
    pub fn to_json(&self) -> Result<String, EventsError> {
        Ok(serde_json::to_string(self)?)
    }
}
