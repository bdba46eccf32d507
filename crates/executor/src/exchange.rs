use chrono::{DateTime, Utc};
use configuration::EstimationSettings;
use core_types::{BookLevel, Order, OrderBook, OrderFill, OrderSide, OrderType, Priority};
use rust_decimal::Decimal;
use serde::Serialize;

/// Fills an order would receive, plus what is left unfilled.
#[derive(Debug, Clone, PartialEq)]
pub struct FillOutcome {
    pub fills: Vec<OrderFill>,
    pub remaining: Decimal,
}

impl FillOutcome {
    fn empty(remaining: Decimal) -> Self {
        Self {
            fills: Vec::new(),
            remaining,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
    }

    pub fn filled(&self) -> Decimal {
        self.fills.iter().map(|f| f.amount).sum()
    }

    pub fn notional(&self) -> Decimal {
        self.fills.iter().map(OrderFill::notional).sum()
    }

    pub fn fees(&self) -> Decimal {
        self.fills.iter().map(|f| f.fee).sum()
    }

    pub fn average_price(&self) -> Decimal {
        let filled = self.filled();
        if filled.is_zero() {
            Decimal::ZERO
        } else {
            self.notional() / filled
        }
    }
}

/// Competition assumptions fed into a cost estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimationParams {
    pub participant_count: u32,
    pub priority: Priority,
}

/// Expected economics of executing `amount` against the current book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEstimate {
    pub average_price: Decimal,
    /// Quantity the book can absorb right now.
    pub fillable_amount: Decimal,
    pub notional: Decimal,
    pub fees: Decimal,
    pub estimated_gas: Decimal,
    /// `notional + fees + estimated_gas` over the fillable quantity.
    pub total_cost: Decimal,
    /// Percent deviation of the average price from the reference price.
    pub price_impact: Decimal,
    /// Percent deviation of the average price from the best price.
    pub slippage: Decimal,
    pub fully_fillable: bool,
}

/// The "virtual exchange": computes fills against a book snapshot.
///
/// Every method is a pure function of its inputs. Nothing here mutates the
/// book, an order or a balance; the caller applies the returned fills.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    taker_fee_pct: Decimal,
    estimation: EstimationSettings,
}

impl SimulatedExecutor {
    pub fn new(taker_fee_pct: Decimal, estimation: EstimationSettings) -> Self {
        Self {
            taker_fee_pct,
            estimation,
        }
    }

    pub fn taker_fee_pct(&self) -> Decimal {
        self.taker_fee_pct
    }

    /// Consumes `levels` from the best price outward until `amount` is filled,
    /// the book runs out, or a level is worse than `limit`.
    fn walk_levels(
        &self,
        side: OrderSide,
        levels: &[BookLevel],
        amount: Decimal,
        limit: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> FillOutcome {
        let mut remaining = amount;
        let mut fills = Vec::new();

        for level in levels {
            if remaining <= Decimal::ZERO {
                break;
            }
            if let Some(limit) = limit {
                let beyond_limit = match side {
                    OrderSide::Buy => level.price > limit,
                    OrderSide::Sell => level.price < limit,
                };
                if beyond_limit {
                    break;
                }
            }

            let take = remaining.min(level.size);
            if take <= Decimal::ZERO {
                continue;
            }
            fills.push(OrderFill {
                amount: take,
                price: level.price,
                fee: take * level.price * self.taker_fee_pct,
                timestamp: now,
            });
            remaining -= take;
        }

        FillOutcome { fills, remaining }
    }

    /// Walks the book for a market order.
    ///
    /// `remaining` is non-zero only when the book does not hold enough depth.
    pub fn execute_market(
        &self,
        side: OrderSide,
        amount: Decimal,
        book: &OrderBook,
        now: DateTime<Utc>,
    ) -> FillOutcome {
        let outcome = self.walk_levels(side, book.opposite_levels(side), amount, None, now);
        tracing::debug!(
            asset = %book.asset,
            side = %side,
            requested = %amount,
            filled = %outcome.filled(),
            average_price = %outcome.average_price(),
            "Market walk complete."
        );
        outcome
    }

    /// Whether the best opposite price satisfies the order's trigger condition.
    ///
    /// Limit-style orders (limit, oco, iceberg) cross when the book trades at or
    /// better than `price`. Stop-style orders (stop, trailing stop) trigger when
    /// the book trades through `stop_price`.
    pub fn should_fill(&self, order: &Order, book: &OrderBook) -> bool {
        let Some(best) = book.best_price_for(order.side) else {
            return false;
        };
        match order.order_type {
            OrderType::Market => true,
            OrderType::Stop | OrderType::TrailingStop => match order.stop_price {
                Some(stop) => match order.side {
                    OrderSide::Buy => best >= stop,
                    OrderSide::Sell => best <= stop,
                },
                None => false,
            },
            OrderType::Limit | OrderType::Oco | OrderType::Iceberg => match order.price {
                Some(limit) => match order.side {
                    OrderSide::Buy => best <= limit,
                    OrderSide::Sell => best >= limit,
                },
                None => false,
            },
        }
    }

    /// The price bound a resting order's fills must respect, if any.
    fn price_bound(order: &Order) -> Option<Decimal> {
        match order.order_type {
            OrderType::Market => None,
            // A stop with a price is a stop-limit; without one it fills like a market order.
            _ => order.price,
        }
    }

    /// Fills for a non-market order: nothing unless it crosses, then the liquidity
    /// at or better than its bound, capped at `order.remaining`.
    pub fn execute_resting(&self, order: &Order, book: &OrderBook, now: DateTime<Utc>) -> FillOutcome {
        if !self.should_fill(order, book) {
            return FillOutcome::empty(order.remaining);
        }
        let outcome = self.walk_levels(
            order.side,
            book.opposite_levels(order.side),
            order.remaining,
            Self::price_bound(order),
            now,
        );
        tracing::debug!(
            order_id = %order.id,
            asset = %book.asset,
            filled = %outcome.filled(),
            remaining = %outcome.remaining,
            "Resting order crossed."
        );
        outcome
    }

    /// Size available to a taker on `side` at or better than `limit`.
    pub fn available_liquidity(&self, side: OrderSide, book: &OrderBook, limit: Option<Decimal>) -> Decimal {
        book.opposite_levels(side)
            .iter()
            .take_while(|l| match (limit, side) {
                (None, _) => true,
                (Some(limit), OrderSide::Buy) => l.price <= limit,
                (Some(limit), OrderSide::Sell) => l.price >= limit,
            })
            .map(|l| l.size)
            .sum()
    }

    /// Prices `amount` against the book without consuming it.
    pub fn estimate_execution_cost(
        &self,
        side: OrderSide,
        amount: Decimal,
        book: &OrderBook,
        params: &EstimationParams,
    ) -> CostEstimate {
        let outcome = self.walk_levels(side, book.opposite_levels(side), amount, None, book.generated_at);
        let fillable_amount = outcome.filled();
        let notional = outcome.notional();
        let fees = outcome.fees();
        let estimated_gas = self.estimation.gas_per_participant
            * Decimal::from(params.participant_count)
            * self.estimation.priority_multiplier(params.priority);

        let (average_price, price_impact, slippage) = if fillable_amount.is_zero() {
            (book.reference_price, Decimal::ZERO, Decimal::ZERO)
        } else {
            let average = outcome.average_price();
            let impact = percent_deviation(average, book.reference_price);
            let slip = book
                .best_price_for(side)
                .map(|best| percent_deviation(average, best))
                .unwrap_or(Decimal::ZERO);
            (average, impact, slip)
        };

        CostEstimate {
            average_price,
            fillable_amount,
            notional,
            fees,
            estimated_gas,
            total_cost: notional + fees + estimated_gas,
            price_impact,
            slippage,
            fully_fillable: outcome.remaining <= Decimal::ZERO,
        }
    }
}

/// `|value - reference| / reference`, in percent.
pub fn percent_deviation(value: Decimal, reference: Decimal) -> Decimal {
    if reference.is_zero() {
        return Decimal::ZERO;
    }
    ((value - reference) / reference).abs() * Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{OrderMetadata, OrderStatus, TimeInForce};
    use rust_decimal_macros::dec;

    fn executor() -> SimulatedExecutor {
        SimulatedExecutor::new(dec!(0.003), EstimationSettings::default())
    }

    fn book() -> OrderBook {
        OrderBook {
            asset: "ETH".to_string(),
            reference_price: dec!(100),
            bids: vec![
                BookLevel { price: dec!(99), size: dec!(5) },
                BookLevel { price: dec!(98), size: dec!(5) },
                BookLevel { price: dec!(95), size: dec!(10) },
            ],
            asks: vec![
                BookLevel { price: dec!(101), size: dec!(5) },
                BookLevel { price: dec!(102), size: dec!(5) },
                BookLevel { price: dec!(105), size: dec!(10) },
            ],
            generated_at: Utc::now(),
        }
    }

    fn resting(order_type: OrderType, side: OrderSide, amount: Decimal) -> Order {
        let now = Utc::now();
        Order {
            id: "order_1".to_string(),
            order_type,
            side,
            status: OrderStatus::Open,
            asset: "ETH".to_string(),
            amount,
            filled: Decimal::ZERO,
            remaining: amount,
            price: None,
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

    #[test]
    fn market_buy_walks_asks() {
        let outcome = executor().execute_market(OrderSide::Buy, dec!(8), &book(), Utc::now());
        assert_eq!(outcome.remaining, Decimal::ZERO);
        assert_eq!(outcome.fills.len(), 2);
        assert_eq!(outcome.fills[0].price, dec!(101));
        assert_eq!(outcome.fills[1].amount, dec!(3));
        // (5*101 + 3*102) / 8
        assert_eq!(outcome.average_price(), dec!(101.375));
        assert_eq!(outcome.fills[0].fee, dec!(5) * dec!(101) * dec!(0.003));
    }

    #[test]
    fn market_sell_reports_shortfall() {
        let outcome = executor().execute_market(OrderSide::Sell, dec!(25), &book(), Utc::now());
        assert_eq!(outcome.filled(), dec!(20));
        assert_eq!(outcome.remaining, dec!(5));
    }

    #[test]
    fn limit_below_best_ask_does_not_cross() {
        let mut order = resting(OrderType::Limit, OrderSide::Buy, dec!(4));
        order.price = Some(dec!(100.5));
        let outcome = executor().execute_resting(&order, &book(), Utc::now());
        assert!(outcome.is_empty());
        assert_eq!(outcome.remaining, dec!(4));
    }

    #[test]
    fn crossing_limit_only_takes_levels_within_price() {
        let mut order = resting(OrderType::Limit, OrderSide::Buy, dec!(20));
        order.price = Some(dec!(102));
        let outcome = executor().execute_resting(&order, &book(), Utc::now());
        assert_eq!(outcome.filled(), dec!(10));
        assert_eq!(outcome.remaining, dec!(10));
        assert!(outcome.fills.iter().all(|f| f.price <= dec!(102)));
    }

    #[test]
    fn sell_stop_triggers_when_bid_falls_through() {
        let mut order = resting(OrderType::Stop, OrderSide::Sell, dec!(3));
        order.stop_price = Some(dec!(98));
        assert!(!executor().should_fill(&order, &book()));

        order.stop_price = Some(dec!(99.5));
        let outcome = executor().execute_resting(&order, &book(), Utc::now());
        assert_eq!(outcome.filled(), dec!(3));
        assert_eq!(outcome.fills[0].price, dec!(99));
    }

    #[test]
    fn liquidity_within_limit() {
        let liquidity = executor().available_liquidity(OrderSide::Sell, &book(), Some(dec!(98)));
        assert_eq!(liquidity, dec!(10));
        assert_eq!(executor().available_liquidity(OrderSide::Buy, &book(), None), dec!(20));
    }

    #[test]
    fn estimate_reports_impact_and_gas() {
        let params = EstimationParams { participant_count: 3, priority: Priority::Medium };
        let estimate = executor().estimate_execution_cost(OrderSide::Buy, dec!(8), &book(), &params);
        assert!(estimate.fully_fillable);
        assert_eq!(estimate.average_price, dec!(101.375));
        assert_eq!(estimate.price_impact, dec!(1.375));
        assert_eq!(estimate.estimated_gas, dec!(1.5));
        assert_eq!(estimate.total_cost, estimate.notional + estimate.fees + dec!(1.5));
    }

    #[test]
    fn estimate_on_empty_side() {
        let mut empty = book();
        empty.asks.clear();
        let params = EstimationParams { participant_count: 1, priority: Priority::Low };
        let estimate = executor().estimate_execution_cost(OrderSide::Buy, dec!(1), &empty, &params);
        assert!(!estimate.fully_fillable);
        assert_eq!(estimate.fillable_amount, Decimal::ZERO);
        assert_eq!(estimate.price_impact, Decimal::ZERO);
    }
}
