use crate::enums::{OrderSide, OrderStatus, OrderType, Priority, TimeInForce};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One discrete execution against the book. Never mutated once appended to an order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    pub amount: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl OrderFill {
    pub fn notional(&self) -> Decimal {
        self.amount * self.price
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderMetadata {
    /// The asset the order spends: the quote asset for a buy, the traded asset for a sell.
    pub from_asset: String,
    pub original_amount: Decimal,
    pub estimated_gas: Decimal,
    /// Expected price impact at creation time, in percent.
    pub price_impact: Decimal,
}

/// A request to create an order, as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderParams {
    pub order_type: OrderType,
    pub side: OrderSide,
    pub asset: String,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub priority: Option<Priority>,
    /// Percent. Falls back to the engine default when absent.
    pub slippage_tolerance: Option<Decimal>,
}

impl OrderParams {
    pub fn market(side: OrderSide, asset: impl Into<String>, amount: Decimal) -> Self {
        Self {
            order_type: OrderType::Market,
            side,
            asset: asset.into(),
            amount,
            price: None,
            stop_price: None,
            time_in_force: None,
            priority: None,
            slippage_tolerance: None,
        }
    }

    pub fn limit(side: OrderSide, asset: impl Into<String>, amount: Decimal, price: Decimal) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            ..Self::market(side, asset, amount)
        }
    }

    pub fn stop(side: OrderSide, asset: impl Into<String>, amount: Decimal, stop_price: Decimal) -> Self {
        Self {
            order_type: OrderType::Stop,
            stop_price: Some(stop_price),
            ..Self::market(side, asset, amount)
        }
    }

    pub fn with_order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = Some(tif);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }
}

/// Fields of an open order a caller may change in place.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderPatch {
    pub amount: Option<Decimal>,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub priority: Option<Priority>,
    pub slippage_tolerance: Option<Decimal>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub asset: String,
    pub amount: Decimal,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub fills: Vec<OrderFill>,
    pub total_fees: Decimal,
    pub average_fill_price: Decimal,
    pub slippage_tolerance: Decimal,
    pub estimated_cost: Decimal,
    pub required_balance: Decimal,
    /// Portion of `required_balance` still held against this order in the ledger.
    pub reserved: Decimal,
    pub metadata: OrderMetadata,
}

impl Order {
    /// Moves the order to `next`, refusing edges the lifecycle does not allow.
    pub fn transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::IllegalTransition {
                order_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Returns a copy of this order with `new_fills` appended and every aggregate
    /// recomputed over the full fill history.
    ///
    /// The status becomes `filled` once `remaining <= dust`, `partially_filled` if
    /// anything has filled, and is otherwise left alone.
    pub fn with_fills(
        &self,
        new_fills: &[OrderFill],
        dust: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Order, CoreError> {
        let mut next = self.clone();
        if new_fills.is_empty() {
            return Ok(next);
        }

        let incoming: Decimal = new_fills.iter().map(|f| f.amount).sum();
        if incoming > self.remaining {
            return Err(CoreError::InvalidInput(
                "fills".to_string(),
                format!(
                    "order {} has {} remaining but received {}",
                    self.id, self.remaining, incoming
                ),
            ));
        }

        next.fills.extend_from_slice(new_fills);
        next.filled = next.fills.iter().map(|f| f.amount).sum();
        next.remaining = next.amount - next.filled;
        next.total_fees = next.fills.iter().map(|f| f.fee).sum();
        let notional: Decimal = next.fills.iter().map(OrderFill::notional).sum();
        next.average_fill_price = if next.filled.is_zero() {
            Decimal::ZERO
        } else {
            notional / next.filled
        };

        let status = if next.remaining <= dust {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        next.transition(status, now)?;
        Ok(next)
    }

    /// Sum of `amount * price` over every fill.
    pub fn filled_notional(&self) -> Decimal {
        self.fills.iter().map(OrderFill::notional).sum()
    }

    /// Merges an edit into the order. `remaining` follows a changed `amount`.
    pub fn apply_patch(&mut self, patch: &OrderPatch, now: DateTime<Utc>) {
        if let Some(amount) = patch.amount {
            self.amount = amount;
            self.remaining = amount - self.filled;
        }
        if let Some(price) = patch.price {
            self.price = Some(price);
        }
        if let Some(stop_price) = patch.stop_price {
            self.stop_price = Some(stop_price);
        }
        if let Some(tif) = patch.time_in_force {
            self.time_in_force = tif;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(tolerance) = patch.slippage_tolerance {
            self.slippage_tolerance = tolerance;
        }
        if let Some(expires_at) = patch.expires_at {
            self.expires_at = Some(expires_at);
        }
        self.updated_at = now;
    }
}

/// The aggregate of one execution batch, handed to the portfolio accountant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub order_id: String,
    pub asset: String,
    pub quote_asset: String,
    pub side: OrderSide,
    /// Units of `asset` exchanged.
    pub quantity: Decimal,
    /// `Σ amount * price` of the batch, in the quote asset.
    pub notional: Decimal,
    pub fees: Decimal,
    pub average_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    pub fn from_asset(&self) -> &str {
        match self.side {
            OrderSide::Buy => &self.quote_asset,
            OrderSide::Sell => &self.asset,
        }
    }

    /// What leaves the account. A buy pays notional plus fees.
    pub fn from_amount(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => self.notional + self.fees,
            OrderSide::Sell => self.quantity,
        }
    }

    pub fn to_asset(&self) -> &str {
        match self.side {
            OrderSide::Buy => &self.asset,
            OrderSide::Sell => &self.quote_asset,
        }
    }

    /// What arrives in the account. A sell receives notional net of fees.
    pub fn to_amount(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => self.quantity,
            OrderSide::Sell => self.notional - self.fees,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub balance: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
}

/// An open position in one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioAsset {
    pub symbol: String,
    pub amount: Decimal,
    pub average_price: Decimal,
    pub current_price: Decimal,
    pub current_value: Decimal,
    pub total_invested: Decimal,
    pub cost_basis: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub profit_loss: Decimal,
    pub profit_loss_percent: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl PortfolioAsset {
    /// Recomputes every price-dependent field from `amount`, `total_invested` and `price`.
    pub fn revalue(&mut self, price: Decimal, now: DateTime<Utc>) {
        self.current_price = price;
        self.current_value = self.amount * price;
        self.cost_basis = self.total_invested;
        self.unrealized_pnl = self.current_value - self.total_invested;
        self.profit_loss = self.realized_pnl + self.unrealized_pnl;
        self.profit_loss_percent = if self.total_invested.is_zero() {
            Decimal::ZERO
        } else {
            self.profit_loss / self.total_invested * Decimal::ONE_HUNDRED
        };
        self.last_updated = now;
    }
}

/// A position that decayed to dust, kept so its realized P&L is not lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub exit_price: Decimal,
    pub total_invested: Decimal,
    pub realized_pnl: Decimal,
    pub closed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn open_order(amount: Decimal) -> Order {
        let now = Utc::now();
        Order {
            id: "order_1".to_string(),
            order_type: OrderType::Limit,
            side: OrderSide::Buy,
            status: OrderStatus::Open,
            asset: "ETH".to_string(),
            amount,
            filled: Decimal::ZERO,
            remaining: amount,
            price: Some(dec!(100)),
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            priority: Priority::Medium,
            created_at: now,
            updated_at: now,
            expires_at: None,
            fills: Vec::new(),
            total_fees: Decimal::ZERO,
            average_fill_price: Decimal::ZERO,
            slippage_tolerance: dec!(0.5),
            estimated_cost: Decimal::ZERO,
            required_balance: Decimal::ZERO,
            reserved: Decimal::ZERO,
            metadata: OrderMetadata::default(),
        }
    }

    fn fill(amount: Decimal, price: Decimal) -> OrderFill {
        OrderFill { amount, price, fee: amount * price * dec!(0.003), timestamp: Utc::now() }
    }

    #[test]
    fn average_price_spans_every_batch() {
        let order = open_order(dec!(10));
        let order = order.with_fills(&[fill(dec!(2), dec!(100))], dec!(0.001), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        let order = order
            .with_fills(&[fill(dec!(3), dec!(110)), fill(dec!(5), dec!(120))], dec!(0.001), Utc::now())
            .unwrap();

        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled, dec!(10));
        assert_eq!(order.remaining, Decimal::ZERO);
        // (200 + 330 + 600) / 10
        assert_eq!(order.average_fill_price, dec!(113));
        assert_eq!(order.total_fees, order.fills.iter().map(|f| f.fee).sum::<Decimal>());
    }

    #[test]
    fn remaining_within_dust_counts_as_filled() {
        let order = open_order(dec!(1));
        let order = order.with_fills(&[fill(dec!(0.9995), dec!(100))], dec!(0.001), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled + order.remaining, order.amount);
    }

    #[test]
    fn overfill_is_refused() {
        let order = open_order(dec!(1));
        let err = order.with_fills(&[fill(dec!(2), dec!(100))], dec!(0.001), Utc::now());
        assert!(err.is_err());
    }

    #[test]
    fn filled_orders_reject_further_fills() {
        let order = open_order(dec!(1));
        let order = order.with_fills(&[fill(dec!(1), dec!(100))], dec!(0.001), Utc::now()).unwrap();
        let mut cancelled = order.clone();
        assert!(cancelled.transition(OrderStatus::Cancelled, Utc::now()).is_err());
        assert_eq!(cancelled.status, OrderStatus::Filled);
    }

    #[test]
    fn patch_keeps_fill_invariant() {
        let mut order = open_order(dec!(5));
        order.apply_patch(
            &OrderPatch { amount: Some(dec!(8)), price: Some(dec!(95)), ..Default::default() },
            Utc::now(),
        );
        assert_eq!(order.remaining, dec!(8));
        assert_eq!(order.price, Some(dec!(95)));
    }

    #[test]
    fn trade_legs_follow_side() {
        let trade = Trade {
            order_id: "o".to_string(),
            asset: "ETH".to_string(),
            quote_asset: "USDC".to_string(),
            side: OrderSide::Sell,
            quantity: dec!(2),
            notional: dec!(200),
            fees: dec!(0.6),
            average_price: dec!(100),
            timestamp: Utc::now(),
        };
        assert_eq!(trade.from_asset(), "ETH");
        assert_eq!(trade.from_amount(), dec!(2));
        assert_eq!(trade.to_asset(), "USDC");
        assert_eq!(trade.to_amount(), dec!(199.4));
    }
}
