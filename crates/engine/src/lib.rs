//! # Orderflow Engine
//!
//! The order lifecycle manager. `OrderManager` owns every piece of mutable
//! state (orders, books, the balance ledger and the portfolio) and exposes the
//! operations callers drive it with. `LimitOrderMatcher` is the only autonomous
//! activity: a periodic task that re-evaluates resting orders.
//!
//! Every fill is applied as one transaction: the order, the ledger, the
//! positions and the book change together or not at all.

use chrono::{DateTime, Utc};
use configuration::{Config, EngineSettings, OrderBookSettings};
use core_types::{
    Balance, CoreError, Order, OrderBook, OrderFill, OrderMetadata, OrderParams, OrderPatch,
    OrderStatus, OrderType, TimeInForce, Trade,
};
use events::{EngineEvent, PortfolioState};
use executor::{
    BalanceLedger, BalanceStore, EstimationParams, FillOutcome, PortfolioAccountant, PortfolioSummary,
    PriceSource, SimulatedExecutor, generate_order_book, update_order_book_after_execution,
};
use risk::{OrderValidator, PreTradeValidator, ValidationContext};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub mod clock;
pub mod error;
pub mod matcher;
pub mod stats;

pub use clock::{
    Clock, ManualClock, OrderIdGenerator, SequentialIdGenerator, SystemClock, UuidIdGenerator,
    end_of_local_day,
};
pub use error::EngineError;
pub use matcher::{LimitOrderMatcher, MatcherHandle, TickOutcome};
pub use stats::OrderStats;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// The result of a call that may have executed an order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub order_id: String,
    pub status: OrderStatus,
    /// Fills produced by this call only.
    pub fills: Vec<OrderFill>,
    pub remaining_amount: Decimal,
    /// Notional plus fees of this call's fills.
    pub total_cost: Decimal,
    /// Non-blocking validation warnings, set when the order was just created.
    pub warnings: Vec<String>,
}

impl ExecutionReport {
    fn unfilled(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            status: order.status,
            fills: Vec::new(),
            remaining_amount: order.remaining,
            total_cost: Decimal::ZERO,
            warnings: Vec::new(),
        }
    }
}

/// What one pass of the limit-order matcher did.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchReport {
    pub evaluated: usize,
    /// Orders that received at least one fill.
    pub filled: usize,
    pub expired: usize,
    pub rejected: usize,
}

pub struct OrderManager {
    settings: EngineSettings,
    book_settings: OrderBookSettings,
    assets: Vec<String>,
    executor: SimulatedExecutor,
    validator: Box<dyn OrderValidator>,
    ledger: BalanceLedger,
    accountant: PortfolioAccountant,
    prices: Arc<dyn PriceSource>,
    books: HashMap<String, OrderBook>,
    orders: Vec<Order>,
    index: HashMap<String, usize>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn OrderIdGenerator>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl OrderManager {
    /// Builds a manager over `store` and `prices`. The tradable assets are the
    /// priced symbols of `config.market` other than the quote asset; their books
    /// are generated immediately.
    pub fn new(
        config: &Config,
        store: Box<dyn BalanceStore>,
        prices: Arc<dyn PriceSource>,
    ) -> Result<Self, EngineError> {
        let validator = PreTradeValidator::new(config.risk.clone(), config.engine.taker_fee_pct)?;
        let assets = config
            .market
            .prices
            .keys()
            .filter(|symbol| **symbol != config.engine.quote_asset)
            .cloned()
            .collect();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let mut manager = Self {
            settings: config.engine.clone(),
            book_settings: config.order_book.clone(),
            assets,
            executor: SimulatedExecutor::new(config.engine.taker_fee_pct, config.estimation.clone()),
            validator: Box::new(validator),
            ledger: BalanceLedger::new(store),
            accountant: PortfolioAccountant::new(
                config.engine.quote_asset.clone(),
                config.engine.dust_threshold,
            ),
            prices,
            books: HashMap::new(),
            orders: Vec::new(),
            index: HashMap::new(),
            clock: Arc::new(SystemClock),
            ids: Box::new(SequentialIdGenerator::default()),
            event_tx,
        };
        manager.refresh_order_books();
        Ok(manager)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Box<dyn OrderIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_validator(mut self, validator: Box<dyn OrderValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn matcher_interval(&self) -> Duration {
        Duration::from_secs(self.settings.matcher_interval_secs)
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    fn publish(&self, event: EngineEvent) {
        // No subscribers is not an error.
        let _ = self.event_tx.send(event);
    }

    fn publish_portfolio_state(&self, now: DateTime<Utc>) {
        let cash = self.ledger.get_balance(&self.settings.quote_asset);
        let summary = self.accountant.summary();
        self.publish(EngineEvent::PortfolioState(PortfolioState {
            timestamp: now,
            cash,
            total_value: cash + summary.total_value,
            positions: summary.positions,
        }));
    }

    fn position_of(&self, order_id: &str) -> Result<usize, EngineError> {
        self.index
            .get(order_id)
            .copied()
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))
    }

    /// Validates `params`, records the order and, depending on type and
    /// time-in-force, executes it immediately.
    ///
    /// Market orders execute in the same call. Resting orders are returned
    /// `open` unless they are IOC or FOK, which act at once and cancel whatever
    /// they could not fill.
    pub fn create_order(&mut self, params: OrderParams) -> Result<ExecutionReport, EngineError> {
        let now = self.clock.now();
        let priority = params.priority.unwrap_or(self.settings.default_priority);
        let market_price = self.prices.get_price(&params.asset);
        let estimate = match self.books.get(&params.asset) {
            Some(book) if params.amount > Decimal::ZERO => Some(self.executor.estimate_execution_cost(
                params.side,
                params.amount,
                book,
                &EstimationParams {
                    participant_count: self.settings.participant_count,
                    priority,
                },
            )),
            _ => None,
        };

        let validation = self.validator.validate(
            &params,
            &ValidationContext {
                quote_asset: &self.settings.quote_asset,
                market_price,
                estimate: estimate.as_ref(),
                balances: &self.ledger,
            },
        );
        if !validation.is_valid {
            tracing::warn!(
                asset = %params.asset,
                side = %params.side,
                order_type = %params.order_type,
                errors = %validation.errors.join("; "),
                "Order failed validation."
            );
            return Err(EngineError::Validation(validation.errors));
        }

        let time_in_force = params.time_in_force.unwrap_or_default();
        let is_market = params.order_type == OrderType::Market;
        let mut order = Order {
            id: self.ids.next_id(),
            order_type: params.order_type,
            side: params.side,
            status: if is_market { OrderStatus::Pending } else { OrderStatus::Open },
            asset: params.asset.clone(),
            amount: params.amount,
            filled: Decimal::ZERO,
            remaining: params.amount,
            price: params.price,
            stop_price: params.stop_price,
            time_in_force,
            priority,
            created_at: now,
            updated_at: now,
            expires_at: (time_in_force == TimeInForce::Day).then(|| end_of_local_day(now)),
            fills: Vec::new(),
            total_fees: Decimal::ZERO,
            average_fill_price: Decimal::ZERO,
            slippage_tolerance: params
                .slippage_tolerance
                .unwrap_or(self.settings.default_slippage_tolerance_pct),
            estimated_cost: validation.estimated_cost,
            required_balance: validation.required_balance,
            reserved: Decimal::ZERO,
            metadata: OrderMetadata {
                from_asset: validation.from_asset.clone(),
                original_amount: params.amount,
                estimated_gas: estimate.as_ref().map(|e| e.estimated_gas).unwrap_or_default(),
                price_impact: validation.price_impact,
            },
        };

        if !is_market && self.settings.reserve_on_create && order.required_balance > Decimal::ZERO {
            self.ledger
                .reserve_balance(&order.metadata.from_asset, order.required_balance)?;
            order.reserved = order.required_balance;
        }

        let order_id = order.id.clone();
        tracing::info!(
            order_id = %order_id,
            asset = %order.asset,
            side = %order.side,
            order_type = %order.order_type,
            amount = %order.amount,
            time_in_force = ?order.time_in_force,
            "Order created."
        );
        self.index.insert(order_id.clone(), self.orders.len());
        self.orders.push(order.clone());
        self.publish(EngineEvent::OrderCreated(order));

        let idx = self.orders.len() - 1;
        let mut report = match time_in_force {
            TimeInForce::Fok if !self.fill_or_kill_possible(idx) => {
                if is_market {
                    let asset = params.asset.clone();
                    self.reject_order(idx, "Fill-or-kill order cannot be filled in full", now);
                    return Err(EngineError::InsufficientLiquidity(asset));
                }
                self.cancel_order(&order_id)?;
                ExecutionReport::unfilled(&self.orders[idx])
            }
            TimeInForce::Ioc => {
                let report = self.execute_order(&order_id)?;
                if self.orders[idx].status.is_active() {
                    self.cancel_order(&order_id)?;
                }
                report
            }
            _ if is_market => self.execute_order(&order_id)?,
            TimeInForce::Fok => self.execute_order(&order_id)?,
            TimeInForce::Gtc | TimeInForce::Day => ExecutionReport::unfilled(&self.orders[idx]),
        };

        report.status = self.orders[idx].status;
        report.warnings = validation.warnings;
        Ok(report)
    }

    /// Whether the book can fill the whole of the order right now.
    fn fill_or_kill_possible(&self, idx: usize) -> bool {
        let order = &self.orders[idx];
        let Some(book) = self.books.get(&order.asset) else {
            return false;
        };
        let (crosses, bound) = match order.order_type {
            OrderType::Market => (true, None),
            _ => (self.executor.should_fill(order, book), order.price),
        };
        crosses && self.executor.available_liquidity(order.side, book, bound) >= order.remaining
    }

    /// Runs one execution attempt for `order_id` against its asset's book.
    ///
    /// A resting order that does not cross comes back unchanged. Failures
    /// reject the order before the error is returned; terminal orders are
    /// refused without being touched.
    pub fn execute_order(&mut self, order_id: &str) -> Result<ExecutionReport, EngineError> {
        let idx = self.position_of(order_id)?;
        let now = self.clock.now();
        let order = &self.orders[idx];
        if order.status.is_terminal() {
            return Err(CoreError::InvalidInput(
                "order_id".to_string(),
                format!("order {} is {} and cannot be executed", order.id, order.status),
            )
            .into());
        }

        let Some(book) = self.books.get(&order.asset) else {
            let asset = order.asset.clone();
            self.reject_order(idx, &format!("Order book unavailable for {asset}"), now);
            return Err(EngineError::OrderBookUnavailable(asset));
        };

        let outcome = match order.order_type {
            OrderType::Market => self.executor.execute_market(order.side, order.remaining, book, now),
            _ => self.executor.execute_resting(order, book, now),
        };

        if outcome.is_empty() {
            if order.order_type == OrderType::Market {
                let asset = order.asset.clone();
                self.reject_order(idx, &format!("No liquidity available for {asset}"), now);
                return Err(EngineError::InsufficientLiquidity(asset));
            }
            return Ok(ExecutionReport::unfilled(order));
        }

        self.apply_fills(idx, outcome, now)
    }

    /// Applies a fill batch to the order at `idx`, settles the trade and
    /// depletes the book. Either all of it happens or none of it does.
    fn apply_fills(
        &mut self,
        idx: usize,
        outcome: FillOutcome,
        now: DateTime<Utc>,
    ) -> Result<ExecutionReport, EngineError> {
        let mut updated = match self.orders[idx].with_fills(&outcome.fills, self.settings.dust_threshold, now) {
            Ok(order) => order,
            Err(e) => {
                self.reject_order(idx, &e.to_string(), now);
                return Err(e.into());
            }
        };

        let trade = Trade {
            order_id: updated.id.clone(),
            asset: updated.asset.clone(),
            quote_asset: self.settings.quote_asset.clone(),
            side: updated.side,
            quantity: outcome.filled(),
            notional: outcome.notional(),
            fees: outcome.fees(),
            average_price: outcome.average_price(),
            timestamp: now,
        };
        let reserved_for_trade = if updated.status == OrderStatus::Filled {
            updated.reserved
        } else {
            updated.reserved.min(trade.from_amount())
        };

        let marks = self.prices.get_prices(&HashSet::from([trade.asset.clone()]));
        if let Err(e) = self.accountant.execute_trade_with_balance_update(
            &mut self.ledger,
            &trade,
            &marks,
            reserved_for_trade,
        ) {
            self.reject_order(idx, &e.to_string(), now);
            return Err(e.into());
        }

        // Settled: from here on nothing can fail.
        updated.reserved -= reserved_for_trade;
        if let Some(book) = self.books.get(&updated.asset) {
            let depleted = update_order_book_after_execution(book, updated.side, &outcome.fills);
            self.books.insert(updated.asset.clone(), depleted);
        }
        self.orders[idx] = updated.clone();

        tracing::info!(
            order_id = %updated.id,
            asset = %updated.asset,
            status = %updated.status,
            filled = %updated.filled,
            remaining = %updated.remaining,
            average_fill_price = %updated.average_fill_price,
            "Order filled."
        );

        let report = ExecutionReport {
            order_id: updated.id.clone(),
            status: updated.status,
            total_cost: trade.notional + trade.fees,
            fills: outcome.fills,
            remaining_amount: updated.remaining,
            warnings: Vec::new(),
        };
        self.publish(EngineEvent::OrderUpdated(updated));
        self.publish(EngineEvent::TradeExecuted(trade));
        self.publish_portfolio_state(now);
        Ok(report)
    }

    fn release_reservation(ledger: &mut BalanceLedger, order: &mut Order) {
        if order.reserved > Decimal::ZERO {
            let released = ledger.release_reservation(&order.metadata.from_asset, order.reserved);
            tracing::debug!(order_id = %order.id, released = %released, "Released reservation.");
            order.reserved = Decimal::ZERO;
        }
    }

    fn reject_order(&mut self, idx: usize, reason: &str, now: DateTime<Utc>) {
        let order = &mut self.orders[idx];
        if let Err(e) = order.transition(OrderStatus::Rejected, now) {
            tracing::warn!(order_id = %order.id, error = %e, "Could not reject order.");
            return;
        }
        Self::release_reservation(&mut self.ledger, order);
        let snapshot = order.clone();

        tracing::warn!(order_id = %snapshot.id, reason = %reason, "Order rejected.");
        self.publish(EngineEvent::OrderRejected {
            order_id: snapshot.id.clone(),
            reason: reason.to_string(),
        });
        self.publish(EngineEvent::OrderUpdated(snapshot));
    }

    /// Cancels an active order. Returns `false` when the order is already
    /// terminal (or otherwise not cancellable) and leaves it untouched.
    pub fn cancel_order(&mut self, order_id: &str) -> Result<bool, EngineError> {
        let idx = self.position_of(order_id)?;
        let now = self.clock.now();
        let order = &mut self.orders[idx];
        if !order.status.can_transition_to(OrderStatus::Cancelled) {
            tracing::debug!(order_id = %order_id, status = %order.status, "Order not cancellable.");
            return Ok(false);
        }
        order.transition(OrderStatus::Cancelled, now)?;
        Self::release_reservation(&mut self.ledger, order);
        let snapshot = order.clone();

        tracing::info!(order_id = %order_id, filled = %snapshot.filled, "Order cancelled.");
        self.publish(EngineEvent::OrderUpdated(snapshot));
        Ok(true)
    }

    /// Merges `patch` into an `open` order. The patched fields are not re-validated.
    pub fn modify_order(&mut self, order_id: &str, patch: OrderPatch) -> Result<bool, EngineError> {
        let idx = self.position_of(order_id)?;
        let now = self.clock.now();
        let order = &mut self.orders[idx];
        if order.status != OrderStatus::Open {
            return Ok(false);
        }
        order.apply_patch(&patch, now);
        let snapshot = order.clone();

        tracing::info!(order_id = %order_id, "Order modified.");
        self.publish(EngineEvent::OrderUpdated(snapshot));
        Ok(true)
    }

    /// One matcher pass: expire stale DAY orders, then give every resting
    /// active order a chance to cross the current books.
    ///
    /// Fills are computed against `remaining`, so a pass never re-applies what a
    /// previous pass already recorded.
    pub fn process_limit_orders(&mut self) -> MatchReport {
        let now = self.clock.now();
        let mut report = MatchReport::default();
        if self.settings.expire_day_orders {
            report.expired = self.expire_day_orders_at(now);
        }

        let candidates: Vec<usize> = self
            .orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.status.is_active() && o.order_type != OrderType::Market)
            .map(|(i, _)| i)
            .collect();

        for idx in candidates {
            report.evaluated += 1;
            let order = &self.orders[idx];
            let Some(book) = self.books.get(&order.asset) else {
                continue;
            };
            let outcome = self.executor.execute_resting(order, book, now);
            if outcome.is_empty() {
                continue;
            }
            match self.apply_fills(idx, outcome, now) {
                Ok(_) => report.filled += 1,
                Err(e) => {
                    report.rejected += 1;
                    tracing::warn!(order_id = %self.orders[idx].id, error = %e, "Matcher fill failed.");
                }
            }
        }

        if report.filled > 0 || report.expired > 0 || report.rejected > 0 {
            tracing::info!(
                evaluated = report.evaluated,
                filled = report.filled,
                expired = report.expired,
                rejected = report.rejected,
                "Limit order pass complete."
            );
        }
        report
    }

    /// Cancels every active DAY order whose `expires_at` has passed.
    pub fn expire_day_orders(&mut self) -> usize {
        let now = self.clock.now();
        self.expire_day_orders_at(now)
    }

    fn expire_day_orders_at(&mut self, now: DateTime<Utc>) -> usize {
        let mut expired = Vec::new();
        for order in self.orders.iter_mut() {
            let stale = order.status.is_active()
                && order.time_in_force == TimeInForce::Day
                && order.expires_at.is_some_and(|at| now > at);
            if !stale || order.transition(OrderStatus::Cancelled, now).is_err() {
                continue;
            }
            Self::release_reservation(&mut self.ledger, order);
            tracing::info!(order_id = %order.id, "DAY order expired.");
            expired.push(order.clone());
        }

        let count = expired.len();
        for order in expired {
            self.publish(EngineEvent::OrderUpdated(order));
        }
        count
    }

    /// Regenerates every book from the price source and marks positions to market.
    /// Assets without a usable price lose their book until the next refresh.
    pub fn refresh_order_books(&mut self) {
        let now = self.clock.now();
        let symbols: HashSet<String> = self.assets.iter().cloned().collect();
        let prices = self.prices.get_prices(&symbols);

        for asset in &self.assets {
            let Some(price) = prices.get(asset) else {
                tracing::warn!(asset = %asset, "No reference price, book withdrawn.");
                self.books.remove(asset);
                continue;
            };
            match generate_order_book(asset, *price, &self.book_settings, now) {
                Ok(book) => {
                    self.books.insert(asset.clone(), book);
                }
                Err(e) => {
                    tracing::warn!(asset = %asset, error = %e, "Book generation failed, book withdrawn.");
                    self.books.remove(asset);
                }
            }
        }
        self.accountant.mark_to_market(&prices, now);
    }

    pub fn order_book(&self, asset: &str) -> Option<&OrderBook> {
        self.books.get(asset)
    }

    pub fn get_order(&self, order_id: &str) -> Option<&Order> {
        self.index.get(order_id).map(|&idx| &self.orders[idx])
    }

    /// Every order ever created, newest first, optionally only those for `asset`.
    pub fn get_order_history(&self, asset: Option<&str>) -> Vec<Order> {
        self.orders
            .iter()
            .rev()
            .filter(|o| asset.is_none_or(|a| o.asset == a))
            .cloned()
            .collect()
    }

    /// `open` and `partially_filled` orders, newest first, optionally only those for `asset`.
    pub fn get_active_orders(&self, asset: Option<&str>) -> Vec<Order> {
        self.orders
            .iter()
            .rev()
            .filter(|o| o.status.is_active() && asset.is_none_or(|a| o.asset == a))
            .cloned()
            .collect()
    }

    pub fn has_active_orders(&self) -> bool {
        self.orders.iter().any(|o| o.status.is_active())
    }

    pub fn order_stats(&self) -> OrderStats {
        OrderStats::from_orders(&self.orders)
    }

    pub fn portfolio_summary(&self) -> PortfolioSummary {
        self.accountant.summary()
    }

    pub fn balance(&self, asset: &str) -> Balance {
        self.ledger.balance(asset)
    }
}
