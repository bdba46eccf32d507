use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Reference prices for the assets the engine trades.
///
/// Lookups are synchronous and carry no staleness guarantee; whoever owns the
/// source refreshes it on their own cadence.
pub trait PriceSource: Send + Sync {
    /// Prices for the requested symbols. Unknown symbols are simply absent.
    fn get_prices(&self, symbols: &HashSet<String>) -> HashMap<String, Decimal>;

    fn get_price(&self, symbol: &str) -> Option<Decimal> {
        let symbols = HashSet::from([symbol.to_string()]);
        self.get_prices(&symbols).remove(symbol)
    }
}

/// A price table held in memory and updated by hand.
#[derive(Debug, Default)]
pub struct StaticPriceSource {
    prices: RwLock<HashMap<String, Decimal>>,
}

impl StaticPriceSource {
    pub fn new<I, S>(prices: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        Self {
            prices: RwLock::new(prices.into_iter().map(|(s, p)| (s.into(), p)).collect()),
        }
    }

    pub fn set_price(&self, symbol: impl Into<String>, price: Decimal) {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        prices.insert(symbol.into(), price);
    }

    /// Every symbol with a known price.
    pub fn symbols(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        prices.keys().cloned().collect()
    }
}

impl PriceSource for StaticPriceSource {
    fn get_prices(&self, symbols: &HashSet<String>) -> HashMap<String, Decimal> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        symbols
            .iter()
            .filter_map(|s| prices.get(s).map(|p| (s.clone(), *p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn returns_only_known_symbols() {
        let source = StaticPriceSource::new([("ETH", dec!(2500)), ("BTC", dec!(60000))]);
        let wanted = HashSet::from(["ETH".to_string(), "DOGE".to_string()]);
        let prices = source.get_prices(&wanted);
        assert_eq!(prices.len(), 1);
        assert_eq!(prices["ETH"], dec!(2500));
        assert_eq!(source.get_price("DOGE"), None);
    }

    #[test]
    fn set_price_overrides() {
        let source = StaticPriceSource::new([("ETH", dec!(2500))]);
        source.set_price("ETH", dec!(2600));
        assert_eq!(source.get_price("ETH"), Some(dec!(2600)));
    }
}
