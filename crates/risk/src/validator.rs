use crate::OrderValidator;
use crate::error::RiskError;
use configuration::RiskSettings;
use core_types::{OrderParams, OrderSide};
use executor::{BalanceLedger, CostEstimate, ExecutorError};
use rust_decimal::Decimal;
use serde::Serialize;

/// What the validator needs to know about the world at submission time.
pub struct ValidationContext<'a> {
    pub quote_asset: &'a str,
    /// Current reference price of the order's asset, if the asset is priced.
    pub market_price: Option<Decimal>,
    /// Cost estimate against the current book, if one exists.
    pub estimate: Option<&'a CostEstimate>,
    pub balances: &'a BalanceLedger,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Asset the order spends.
    pub from_asset: String,
    pub required_balance: Decimal,
    pub estimated_cost: Decimal,
    pub price_impact: Decimal,
    pub slippage: Decimal,
}

/// The asset an order pays with: the quote asset for a buy, the traded asset for a sell.
pub fn spend_asset<'a>(side: OrderSide, asset: &'a str, quote_asset: &'a str) -> &'a str {
    match side {
        OrderSide::Buy => quote_asset,
        OrderSide::Sell => asset,
    }
}

/// Funds of the spent asset an order needs: `amount * price * (1 + fee)` of the
/// quote asset for a buy, `amount` of the base asset for a sell.
///
/// `None` when the product does not fit in a `Decimal`.
pub fn calculate_required_balance(
    side: OrderSide,
    amount: Decimal,
    price: Decimal,
    taker_fee_pct: Decimal,
) -> Option<Decimal> {
    match side {
        OrderSide::Buy => amount
            .checked_mul(price)?
            .checked_mul(Decimal::ONE.checked_add(taker_fee_pct)?),
        OrderSide::Sell => Some(amount),
    }
}

/// Blocking checks plus threshold warnings, driven by `RiskSettings`.
#[derive(Debug, Clone)]
pub struct PreTradeValidator {
    settings: RiskSettings,
    taker_fee_pct: Decimal,
}

impl PreTradeValidator {
    pub fn new(settings: RiskSettings, taker_fee_pct: Decimal) -> Result<Self, RiskError> {
        if settings.max_price_impact_pct <= Decimal::ZERO
            || settings.max_slippage_pct <= Decimal::ZERO
            || settings.max_limit_deviation_pct <= Decimal::ZERO
        {
            return Err(RiskError::InvalidParameters(
                "warning thresholds must be greater than 0".to_string(),
            ));
        }
        if taker_fee_pct < Decimal::ZERO {
            return Err(RiskError::InvalidParameters(
                "taker_fee_pct must not be negative".to_string(),
            ));
        }
        Ok(Self {
            settings,
            taker_fee_pct,
        })
    }

    /// The per-unit price the balance requirement is computed at.
    ///
    /// An explicit limit wins; a stop without one is priced at its trigger; a
    /// market order uses the estimated average fill, falling back to the
    /// reference price when the book offers nothing.
    fn pricing_basis(&self, params: &OrderParams, ctx: &ValidationContext<'_>) -> Option<Decimal> {
        if params.order_type.requires_limit_price() {
            return params.price;
        }
        if params.order_type.is_stop_like() {
            return params.price.or(params.stop_price);
        }
        ctx.estimate
            .filter(|e| e.fillable_amount > Decimal::ZERO)
            .map(|e| e.average_price)
            .or(ctx.market_price)
    }
}

impl OrderValidator for PreTradeValidator {
    fn validate(&self, params: &OrderParams, ctx: &ValidationContext<'_>) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let from_asset = spend_asset(params.side, &params.asset, ctx.quote_asset).to_string();

        let market_price = ctx.market_price.filter(|p| *p > Decimal::ZERO);
        // The quote asset is priced but never gets a book of its own.
        if market_price.is_none() || params.asset == ctx.quote_asset {
            errors.push(format!("Unsupported asset: {}", params.asset));
        }
        if params.amount <= Decimal::ZERO {
            errors.push("Amount must be greater than 0".to_string());
        }

        if params.order_type.requires_limit_price() {
            match params.price {
                None => errors.push(format!("Limit price is required for {} orders", params.order_type)),
                Some(p) if p <= Decimal::ZERO => errors.push("Limit price must be greater than 0".to_string()),
                Some(_) => {}
            }
        }
        if params.order_type.is_stop_like() {
            match params.stop_price {
                None => errors.push(format!("Stop price is required for {} orders", params.order_type)),
                Some(p) if p <= Decimal::ZERO => errors.push("Stop price must be greater than 0".to_string()),
                Some(_) => {}
            }
            if params.price.is_some_and(|p| p <= Decimal::ZERO) {
                errors.push("Limit price must be greater than 0".to_string());
            }
        }

        let required_balance = match self.pricing_basis(params, ctx) {
            Some(price) if price > Decimal::ZERO && params.amount > Decimal::ZERO => {
                calculate_required_balance(params.side, params.amount, price, self.taker_fee_pct)
            }
            _ => Some(Decimal::ZERO),
        };
        let available = ctx.balances.get_available_balance(&from_asset);
        let required_balance = match required_balance {
            Some(required) => required,
            None => {
                errors.push("Amount too large".to_string());
                Decimal::ZERO
            }
        };
        if required_balance > available {
            let err = ExecutorError::InsufficientBalance {
                asset: from_asset.clone(),
                required: required_balance,
                available,
            };
            errors.push(err.to_string());
        }

        let (estimated_cost, price_impact, slippage) = ctx
            .estimate
            .map(|e| (e.total_cost, e.price_impact, e.slippage))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO, Decimal::ZERO));

        if price_impact > self.settings.max_price_impact_pct {
            warnings.push(format!(
                "High price impact: {:.2}% exceeds {}%",
                price_impact, self.settings.max_price_impact_pct
            ));
        }
        if slippage > self.settings.max_slippage_pct {
            warnings.push(format!(
                "High slippage: {:.2}% exceeds {}%",
                slippage, self.settings.max_slippage_pct
            ));
        }
        if let (true, Some(limit), Some(market)) =
            (params.order_type.requires_limit_price(), params.price, market_price)
        {
            let direction = if limit < market { "below" } else { "above" };
            match (limit - market)
                .checked_div(market)
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            {
                Some(deviation) if deviation.abs() > self.settings.max_limit_deviation_pct => {
                    warnings.push(format!(
                        "Limit price is {:.2}% {} market price",
                        deviation.abs(),
                        direction
                    ));
                }
                Some(_) => {}
                // Too far off to represent is certainly beyond the threshold.
                None => warnings.push(format!("Limit price is far {direction} market price")),
            }
        }

        if !errors.is_empty() {
            tracing::debug!(asset = %params.asset, errors = ?errors, "Order failed validation.");
        }
        for warning in &warnings {
            tracing::warn!(asset = %params.asset, warning = %warning, "Order validation warning.");
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            from_asset,
            required_balance,
            estimated_cost,
            price_impact,
            slippage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{OrderType, Priority};
    use executor::InMemoryBalanceStore;
    use rust_decimal_macros::dec;

    fn validator() -> PreTradeValidator {
        PreTradeValidator::new(RiskSettings::default(), dec!(0.003)).unwrap()
    }

    fn balances(usdc: Decimal, eth: Decimal) -> BalanceLedger {
        BalanceLedger::new(Box::new(InMemoryBalanceStore::new([("USDC", usdc), ("ETH", eth)])))
    }

    fn context<'a>(ledger: &'a BalanceLedger, estimate: Option<&'a CostEstimate>) -> ValidationContext<'a> {
        ValidationContext {
            quote_asset: "USDC",
            market_price: Some(dec!(2500)),
            estimate,
            balances: ledger,
        }
    }

    fn huge(exponent: u32) -> Decimal {
        Decimal::from_scientific(&format!("1e{exponent}")).unwrap()
    }

    fn estimate(average_price: Decimal, impact: Decimal, slippage: Decimal) -> CostEstimate {
        CostEstimate {
            average_price,
            fillable_amount: dec!(1),
            notional: average_price,
            fees: Decimal::ZERO,
            estimated_gas: Decimal::ZERO,
            total_cost: average_price,
            price_impact: impact,
            slippage,
            fully_fillable: true,
        }
    }

    #[test]
    fn rejects_non_positive_thresholds() {
        let settings = RiskSettings { max_slippage_pct: Decimal::ZERO, ..Default::default() };
        assert!(PreTradeValidator::new(settings, dec!(0.003)).is_err());
    }

    #[test]
    fn required_balance_by_side() {
        assert_eq!(
            calculate_required_balance(OrderSide::Buy, dec!(2), dec!(100), dec!(0.003)),
            Some(dec!(200.6))
        );
        assert_eq!(
            calculate_required_balance(OrderSide::Sell, dec!(2), dec!(100), dec!(0.003)),
            Some(dec!(2))
        );
        assert_eq!(
            calculate_required_balance(OrderSide::Buy, dec!(1000), huge(27), dec!(0.003)),
            None
        );
    }

    #[test]
    fn oversized_buy_is_an_error_not_a_panic() {
        let ledger = balances(dec!(100000), dec!(10));
        let params = OrderParams::limit(OrderSide::Buy, "ETH", dec!(1000), huge(27));
        let result = validator().validate(&params, &context(&ledger, None));
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["Amount too large".to_string()]);
        assert_eq!(result.required_balance, Decimal::ZERO);

        let huge_market = OrderParams::market(OrderSide::Buy, "ETH", huge(26));
        let result = validator().validate(&huge_market, &context(&ledger, None));
        assert_eq!(result.errors, vec!["Amount too large".to_string()]);
    }

    #[test]
    fn quote_asset_is_not_tradable() {
        let ledger = balances(dec!(100000), dec!(10));
        let ctx = ValidationContext { market_price: Some(dec!(1)), ..context(&ledger, None) };
        let params = OrderParams::limit(OrderSide::Buy, "USDC", dec!(10), dec!(1));
        let result = validator().validate(&params, &ctx);
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["Unsupported asset: USDC".to_string()]);
    }

    #[test]
    fn collects_every_blocking_error() {
        let ledger = balances(dec!(1000), dec!(0));
        let params = OrderParams {
            price: None,
            ..OrderParams::limit(OrderSide::Buy, "ETH", dec!(0), dec!(1))
        };
        let result = validator().validate(&params, &context(&ledger, None));
        assert!(!result.is_valid);
        assert!(result.errors.contains(&"Amount must be greater than 0".to_string()));
        assert!(result.errors.iter().any(|e| e.starts_with("Limit price is required")));
    }

    #[test]
    fn unpriced_asset_is_unsupported() {
        let ledger = balances(dec!(1000), dec!(0));
        let ctx = ValidationContext { market_price: None, ..context(&ledger, None) };
        let result = validator().validate(&OrderParams::market(OrderSide::Buy, "DOGE", dec!(1)), &ctx);
        assert_eq!(result.errors, vec!["Unsupported asset: DOGE".to_string()]);
    }

    #[test]
    fn stop_price_must_be_positive() {
        let ledger = balances(dec!(100000), dec!(10));
        let params = OrderParams::stop(OrderSide::Sell, "ETH", dec!(1), dec!(-5));
        let result = validator().validate(&params, &context(&ledger, None));
        assert_eq!(result.errors, vec!["Stop price must be greater than 0".to_string()]);
    }

    #[test]
    fn insufficient_balance_uses_available() {
        let mut ledger = balances(dec!(3000), dec!(0));
        ledger.reserve_balance("USDC", dec!(1000)).unwrap();
        let params = OrderParams::limit(OrderSide::Buy, "ETH", dec!(1), dec!(2400));
        let result = validator().validate(&params, &context(&ledger, None));

        assert!(!result.is_valid);
        assert_eq!(result.from_asset, "USDC");
        assert_eq!(result.required_balance, dec!(2407.2));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("Insufficient USDC balance."));
        assert!(result.errors[0].ends_with("Available: 2000"));
    }

    #[test]
    fn market_buy_priced_at_estimated_average() {
        let ledger = balances(dec!(100000), dec!(0));
        let est = estimate(dec!(2510), dec!(0.4), dec!(0.1));
        let params = OrderParams::market(OrderSide::Buy, "ETH", dec!(1)).with_priority(Priority::High);
        let result = validator().validate(&params, &context(&ledger, Some(&est)));
        assert!(result.is_valid);
        assert_eq!(result.required_balance, dec!(2510) * dec!(1.003));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn impact_and_slippage_warn_without_blocking() {
        let ledger = balances(dec!(1000000), dec!(0));
        let est = estimate(dec!(2700), dec!(8), dec!(4));
        let params = OrderParams::market(OrderSide::Buy, "ETH", dec!(1));
        let result = validator().validate(&params, &context(&ledger, Some(&est)));
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.price_impact, dec!(8));
    }

    #[test]
    fn far_limit_price_warns() {
        let ledger = balances(dec!(100000), dec!(10));
        let params = OrderParams::limit(OrderSide::Buy, "ETH", dec!(1), dec!(2125));
        let result = validator().validate(&params, &context(&ledger, None));
        assert!(result.is_valid);
        assert_eq!(result.warnings, vec!["Limit price is 15.00% below market price".to_string()]);

        let iceberg = OrderParams::limit(OrderSide::Sell, "ETH", dec!(1), dec!(3000))
            .with_order_type(OrderType::Iceberg);
        let result = validator().validate(&iceberg, &context(&ledger, None));
        assert_eq!(result.warnings, vec!["Limit price is 20.00% above market price".to_string()]);
    }
}
