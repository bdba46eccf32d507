use crate::error::ConfigError;
use core_types::Priority;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::BTreeMap;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineSettings,
    pub order_book: OrderBookSettings,
    pub risk: RiskSettings,
    pub estimation: EstimationSettings,
    pub market: MarketSettings,
    pub account: AccountSettings,
}

impl Config {
    /// Rejects parameter combinations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.engine;
        if e.taker_fee_pct < Decimal::ZERO || e.taker_fee_pct >= Decimal::ONE {
            return Err(ConfigError::ValidationError(
                "engine.taker_fee_pct must be in [0, 1)".to_string(),
            ));
        }
        if e.dust_threshold <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "engine.dust_threshold must be greater than 0".to_string(),
            ));
        }
        if e.matcher_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "engine.matcher_interval_secs must be at least 1".to_string(),
            ));
        }
        if e.participant_count == 0 {
            return Err(ConfigError::ValidationError(
                "engine.participant_count must be at least 1".to_string(),
            ));
        }
        if e.quote_asset.is_empty() {
            return Err(ConfigError::ValidationError(
                "engine.quote_asset must not be empty".to_string(),
            ));
        }

        let b = &self.order_book;
        if b.levels == 0 {
            return Err(ConfigError::ValidationError(
                "order_book.levels must be at least 1".to_string(),
            ));
        }
        if b.depth_decay <= Decimal::ZERO || b.depth_decay > Decimal::ONE {
            return Err(ConfigError::ValidationError(
                "order_book.depth_decay must be in (0, 1]".to_string(),
            ));
        }
        if b.base_level_notional <= Decimal::ZERO || b.half_spread_pct < Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "order_book.base_level_notional must be positive and half_spread_pct non-negative"
                    .to_string(),
            ));
        }

        if b.level_spacing_pct <= Decimal::ZERO || b.spacing_growth_pct < Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "order_book.level_spacing_pct must be positive and spacing_growth_pct non-negative"
                    .to_string(),
            ));
        }

        let r = &self.risk;
        if r.max_price_impact_pct <= Decimal::ZERO
            || r.max_slippage_pct <= Decimal::ZERO
            || r.max_limit_deviation_pct <= Decimal::ZERO
        {
            return Err(ConfigError::ValidationError(
                "risk thresholds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters of the order lifecycle and accounting.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// The asset every order is priced and settled in (e.g., "USDC").
    pub quote_asset: String,
    /// Flat taker fee charged per fill. 0.003 corresponds to 0.3%.
    pub taker_fee_pct: Decimal,
    /// Quantities at or below this are treated as zero.
    pub dust_threshold: Decimal,
    /// Period of the background limit-order matcher.
    pub matcher_interval_secs: u64,
    /// Competing participants assumed by the cost estimator.
    pub participant_count: u32,
    pub default_priority: Priority,
    /// Percent, applied when an order does not carry its own tolerance.
    pub default_slippage_tolerance_pct: Decimal,
    /// Hold `required_balance` against resting orders from the moment they are created.
    pub reserve_on_create: bool,
    /// Cancel `DAY` orders once their `expires_at` has passed.
    pub expire_day_orders: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            quote_asset: "USDC".to_string(),
            taker_fee_pct: dec!(0.003),
            dust_threshold: dec!(0.001),
            matcher_interval_secs: 5,
            participant_count: 3,
            default_priority: Priority::Medium,
            default_slippage_tolerance_pct: dec!(0.5),
            reserve_on_create: true,
            expire_day_orders: true,
        }
    }
}

/// Shape of the synthetic ladder generated around a reference price.
///
/// Level `i` (0-based) sits at a relative distance of
/// `half_spread_pct + level_spacing_pct * i + spacing_growth_pct * i^2` from the
/// reference price and carries `base_level_notional * depth_decay^i` worth of size.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrderBookSettings {
    pub levels: usize,
    pub half_spread_pct: Decimal,
    pub level_spacing_pct: Decimal,
    pub spacing_growth_pct: Decimal,
    /// Quote-asset value resting on the level nearest the mid.
    pub base_level_notional: Decimal,
    pub depth_decay: Decimal,
}

impl Default for OrderBookSettings {
    fn default() -> Self {
        Self {
            levels: 20,
            half_spread_pct: dec!(0.0005),
            level_spacing_pct: dec!(0.001),
            spacing_growth_pct: dec!(0.0001),
            base_level_notional: dec!(25000),
            depth_decay: dec!(0.85),
        }
    }
}

/// Thresholds of the pre-trade checks. All values are percentages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub max_price_impact_pct: Decimal,
    pub max_slippage_pct: Decimal,
    pub max_limit_deviation_pct: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_price_impact_pct: dec!(5),
            max_slippage_pct: dec!(3),
            max_limit_deviation_pct: dec!(10),
        }
    }
}

/// Inputs of the execution cost estimate.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EstimationSettings {
    /// Network cost attributed to each competing participant, in the quote asset.
    pub gas_per_participant: Decimal,
    pub low_priority_multiplier: Decimal,
    pub medium_priority_multiplier: Decimal,
    pub high_priority_multiplier: Decimal,
}

impl EstimationSettings {
    pub fn priority_multiplier(&self, priority: Priority) -> Decimal {
        match priority {
            Priority::Low => self.low_priority_multiplier,
            Priority::Medium => self.medium_priority_multiplier,
            Priority::High => self.high_priority_multiplier,
        }
    }
}

impl Default for EstimationSettings {
    fn default() -> Self {
        Self {
            gas_per_participant: dec!(0.5),
            low_priority_multiplier: dec!(0.8),
            medium_priority_multiplier: dec!(1.0),
            high_priority_multiplier: dec!(1.5),
        }
    }
}

/// Reference prices served by the static price source.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    pub prices: BTreeMap<String, Decimal>,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            prices: BTreeMap::from([
                ("BTC".to_string(), dec!(60000)),
                ("ETH".to_string(), dec!(2500)),
                ("SOL".to_string(), dec!(150)),
                ("USDC".to_string(), dec!(1)),
            ]),
        }
    }
}

/// Opening balances of the simulated account.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccountSettings {
    pub balances: BTreeMap<String, Decimal>,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            balances: BTreeMap::from([
                ("USDC".to_string(), dec!(100000)),
                ("ETH".to_string(), dec!(10)),
            ]),
        }
    }
}
