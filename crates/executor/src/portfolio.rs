use crate::error::ExecutorError;
use crate::ledger::BalanceLedger;
use chrono::{DateTime, Utc};
use core_types::{ClosedPosition, OrderSide, PortfolioAsset, Trade};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Aggregates derived from the position list on every read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub positions: Vec<PortfolioAsset>,
    pub closed_positions: Vec<ClosedPosition>,
    pub total_value: Decimal,
    pub total_invested: Decimal,
    /// Realized P&L of open positions plus everything booked on closed ones.
    pub total_realized_pnl: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub total_profit_loss: Decimal,
    pub total_profit_loss_percent: Decimal,
}

/// Turns settled trades into balance movements and per-asset positions.
///
/// Positions are long-only and keyed by symbol. The quote asset is cash and is
/// tracked by the ledger alone, never as a position.
#[derive(Debug, Clone)]
pub struct PortfolioAccountant {
    quote_asset: String,
    dust: Decimal,
    positions: BTreeMap<String, PortfolioAsset>,
    closed_positions: Vec<ClosedPosition>,
}

impl PortfolioAccountant {
    pub fn new(quote_asset: impl Into<String>, dust: Decimal) -> Self {
        Self {
            quote_asset: quote_asset.into(),
            dust,
            positions: BTreeMap::new(),
            closed_positions: Vec::new(),
        }
    }

    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    pub fn get_position(&self, symbol: &str) -> Option<&PortfolioAsset> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &PortfolioAsset> {
        self.positions.values()
    }

    pub fn closed_positions(&self) -> &[ClosedPosition] {
        &self.closed_positions
    }

    /// Settles `trade`: moves both legs through the ledger, then updates positions.
    ///
    /// `reserved_for_trade` is the part of the order's reservation that this trade
    /// consumes; it is released before the debit so reserved funds are spendable
    /// by the order that owns them. Sufficiency is checked before anything is
    /// mutated, so an error leaves ledger and positions untouched.
    pub fn execute_trade_with_balance_update(
        &mut self,
        ledger: &mut BalanceLedger,
        trade: &Trade,
        prices: &HashMap<String, Decimal>,
        reserved_for_trade: Decimal,
    ) -> Result<(), ExecutorError> {
        let from_asset = trade.from_asset();
        let from_amount = trade.from_amount();
        let reserved = reserved_for_trade.min(ledger.get_reserved(from_asset));
        let spendable = ledger.get_available_balance(from_asset) + reserved;
        if from_amount > spendable {
            return Err(ExecutorError::InsufficientBalance {
                asset: from_asset.to_string(),
                required: from_amount,
                available: spendable,
            });
        }

        ledger.release_reservation(from_asset, reserved);
        ledger.update_balance(from_asset, -from_amount);
        ledger.update_balance(trade.to_asset(), trade.to_amount());

        self.apply_trade(trade, prices);

        tracing::info!(
            order_id = %trade.order_id,
            asset = %trade.asset,
            side = %trade.side,
            quantity = %trade.quantity,
            average_price = %trade.average_price,
            fees = %trade.fees,
            "Trade settled."
        );
        Ok(())
    }

    /// Updates the position touched by `trade`. Balances are not involved.
    pub fn apply_trade(&mut self, trade: &Trade, prices: &HashMap<String, Decimal>) {
        if trade.asset == self.quote_asset || trade.quantity <= Decimal::ZERO {
            return;
        }
        let mark = prices.get(&trade.asset).copied().unwrap_or(trade.average_price);
        match trade.side {
            OrderSide::Buy => self.increase(trade, mark),
            OrderSide::Sell => self.reduce(trade, mark),
        }
    }

    fn increase(&mut self, trade: &Trade, mark: Decimal) {
        let investment = trade.notional;
        let position = self
            .positions
            .entry(trade.asset.clone())
            .or_insert_with(|| PortfolioAsset {
                symbol: trade.asset.clone(),
                amount: Decimal::ZERO,
                average_price: trade.average_price,
                current_price: mark,
                current_value: Decimal::ZERO,
                total_invested: Decimal::ZERO,
                cost_basis: Decimal::ZERO,
                realized_pnl: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
                profit_loss: Decimal::ZERO,
                profit_loss_percent: Decimal::ZERO,
                last_updated: trade.timestamp,
            });

        let new_amount = position.amount + trade.quantity;
        position.total_invested += investment;
        position.average_price = position.total_invested / new_amount;
        position.amount = new_amount;
        position.revalue(mark, trade.timestamp);
    }

    fn reduce(&mut self, trade: &Trade, mark: Decimal) {
        let Some(position) = self.positions.get_mut(&trade.asset) else {
            tracing::debug!(
                asset = %trade.asset,
                quantity = %trade.quantity,
                "Sell without a tracked position, no cost basis to realize against."
            );
            return;
        };

        let old_amount = position.amount;
        let sold = trade.quantity.min(old_amount);
        let realized = (trade.average_price - position.average_price) * sold;
        let new_amount = old_amount - sold;

        if new_amount <= self.dust {
            let closed = ClosedPosition {
                symbol: position.symbol.clone(),
                quantity: old_amount,
                average_price: position.average_price,
                exit_price: trade.average_price,
                total_invested: position.total_invested,
                realized_pnl: position.realized_pnl + realized,
                closed_at: trade.timestamp,
            };
            tracing::info!(
                asset = %closed.symbol,
                realized_pnl = %closed.realized_pnl,
                "Position closed."
            );
            self.positions.remove(&trade.asset);
            self.closed_positions.push(closed);
            return;
        }

        position.total_invested = position.total_invested * new_amount / old_amount;
        position.amount = new_amount;
        position.realized_pnl += realized;
        position.revalue(mark, trade.timestamp);
    }

    /// Revalues every open position whose price is in `prices`.
    pub fn mark_to_market(&mut self, prices: &HashMap<String, Decimal>, now: DateTime<Utc>) {
        for position in self.positions.values_mut() {
            if let Some(price) = prices.get(&position.symbol) {
                position.revalue(*price, now);
            }
        }
    }

    pub fn summary(&self) -> PortfolioSummary {
        let positions: Vec<PortfolioAsset> = self.positions.values().cloned().collect();
        let total_value = positions.iter().map(|p| p.current_value).sum();
        let total_invested: Decimal = positions.iter().map(|p| p.total_invested).sum();
        let total_realized_pnl = positions.iter().map(|p| p.realized_pnl).sum::<Decimal>()
            + self.closed_positions.iter().map(|c| c.realized_pnl).sum::<Decimal>();
        let total_unrealized_pnl: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();
        let total_profit_loss = total_realized_pnl + total_unrealized_pnl;
        let total_profit_loss_percent = if total_invested.is_zero() {
            Decimal::ZERO
        } else {
            total_profit_loss / total_invested * Decimal::ONE_HUNDRED
        };

        PortfolioSummary {
            positions,
            closed_positions: self.closed_positions.clone(),
            total_value,
            total_invested,
            total_realized_pnl,
            total_unrealized_pnl,
            total_profit_loss,
            total_profit_loss_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryBalanceStore;
    use rust_decimal_macros::dec;

    fn trade(side: OrderSide, quantity: Decimal, price: Decimal) -> Trade {
        let notional = quantity * price;
        Trade {
            order_id: "order_1".to_string(),
            asset: "ETH".to_string(),
            quote_asset: "USDC".to_string(),
            side,
            quantity,
            notional,
            fees: notional * dec!(0.003),
            average_price: price,
            timestamp: Utc::now(),
        }
    }

    fn ledger(usdc: Decimal) -> BalanceLedger {
        BalanceLedger::new(Box::new(InMemoryBalanceStore::new([("USDC", usdc)])))
    }

    fn prices(eth: Decimal) -> HashMap<String, Decimal> {
        HashMap::from([("ETH".to_string(), eth)])
    }

    #[test]
    fn buys_build_weighted_average() {
        let mut accountant = PortfolioAccountant::new("USDC", dec!(0.001));
        accountant.apply_trade(&trade(OrderSide::Buy, dec!(10), dec!(100)), &prices(dec!(100)));
        accountant.apply_trade(&trade(OrderSide::Buy, dec!(10), dec!(200)), &prices(dec!(200)));

        let position = accountant.get_position("ETH").unwrap();
        assert_eq!(position.amount, dec!(20));
        assert_eq!(position.average_price, dec!(150));
        assert_eq!(position.total_invested, dec!(3000));
        assert_eq!(position.current_value, dec!(4000));
        assert_eq!(position.unrealized_pnl, position.current_value - position.total_invested);
    }

    #[test]
    fn partial_sell_scales_invested_and_realizes() {
        let mut accountant = PortfolioAccountant::new("USDC", dec!(0.001));
        accountant.apply_trade(&trade(OrderSide::Buy, dec!(10), dec!(100)), &prices(dec!(100)));
        accountant.apply_trade(&trade(OrderSide::Sell, dec!(4), dec!(120)), &prices(dec!(120)));

        let position = accountant.get_position("ETH").unwrap();
        assert_eq!(position.amount, dec!(6));
        assert_eq!(position.total_invested, dec!(600));
        assert_eq!(position.realized_pnl, dec!(80));
        assert_eq!(position.unrealized_pnl, dec!(120));
        assert_eq!(position.profit_loss, dec!(200));
    }

    #[test]
    fn closing_keeps_realized_pnl() {
        let mut accountant = PortfolioAccountant::new("USDC", dec!(0.001));
        accountant.apply_trade(&trade(OrderSide::Buy, dec!(2), dec!(100)), &prices(dec!(100)));
        accountant.apply_trade(&trade(OrderSide::Sell, dec!(1.9995), dec!(110)), &prices(dec!(110)));

        assert!(accountant.get_position("ETH").is_none());
        let summary = accountant.summary();
        assert_eq!(summary.closed_positions.len(), 1);
        assert_eq!(summary.total_realized_pnl, dec!(19.995));
        assert_eq!(summary.total_value, Decimal::ZERO);
    }

    #[test]
    fn settlement_moves_both_legs() {
        let mut accountant = PortfolioAccountant::new("USDC", dec!(0.001));
        let mut ledger = ledger(dec!(1000));
        let buy = trade(OrderSide::Buy, dec!(2), dec!(100));
        ledger.reserve_balance("USDC", dec!(300)).unwrap();

        accountant
            .execute_trade_with_balance_update(&mut ledger, &buy, &prices(dec!(100)), dec!(300))
            .unwrap();

        assert_eq!(ledger.get_balance("USDC"), dec!(1000) - dec!(200.6));
        assert_eq!(ledger.get_reserved("USDC"), Decimal::ZERO);
        assert_eq!(ledger.get_balance("ETH"), dec!(2));
    }

    #[test]
    fn failed_settlement_mutates_nothing() {
        let mut accountant = PortfolioAccountant::new("USDC", dec!(0.001));
        let mut ledger = ledger(dec!(100));
        let buy = trade(OrderSide::Buy, dec!(2), dec!(100));

        let err = accountant
            .execute_trade_with_balance_update(&mut ledger, &buy, &prices(dec!(100)), Decimal::ZERO)
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InsufficientBalance { .. }));
        assert_eq!(ledger.get_balance("USDC"), dec!(100));
        assert!(accountant.get_position("ETH").is_none());
    }

    #[test]
    fn mark_to_market_revalues() {
        let mut accountant = PortfolioAccountant::new("USDC", dec!(0.001));
        accountant.apply_trade(&trade(OrderSide::Buy, dec!(1), dec!(100)), &prices(dec!(100)));
        accountant.mark_to_market(&prices(dec!(90)), Utc::now());

        let summary = accountant.summary();
        assert_eq!(summary.total_unrealized_pnl, dec!(-10));
        assert_eq!(summary.total_profit_loss_percent, dec!(-10));
    }
}
