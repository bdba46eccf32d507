use crate::error::ExecutorError;
use core_types::Balance;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// The authoritative store of raw balances.
///
/// The ledger reads and writes every balance through this interface; a real
/// deployment would back it with persistent storage.
pub trait BalanceStore: Send + Sync {
    /// Raw balance held for `asset`, before any ledger reservation is subtracted.
    fn get_available(&self, asset: &str) -> Decimal;

    /// Adds `delta` to the balance of `asset` and returns the new balance.
    fn apply_delta(&mut self, asset: &str, delta: Decimal) -> Decimal;
}

/// A `BalanceStore` that lives in memory, seeded from configuration.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBalanceStore {
    balances: HashMap<String, Decimal>,
}

impl InMemoryBalanceStore {
    pub fn new<I, S>(initial: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        Self {
            balances: initial.into_iter().map(|(a, b)| (a.into(), b)).collect(),
        }
    }
}

impl BalanceStore for InMemoryBalanceStore {
    fn get_available(&self, asset: &str) -> Decimal {
        self.balances.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    fn apply_delta(&mut self, asset: &str, delta: Decimal) -> Decimal {
        let entry = self.balances.entry(asset.to_string()).or_insert(Decimal::ZERO);
        *entry += delta;
        *entry
    }
}

/// Per-asset balance, reserved and available bookkeeping.
///
/// Invariants: `reserved <= balance` and `available = balance - reserved >= 0`.
/// Callers serialize mutations; the ledger itself has no locking.
pub struct BalanceLedger {
    store: Box<dyn BalanceStore>,
    reserved: HashMap<String, Decimal>,
}

impl BalanceLedger {
    pub fn new(store: Box<dyn BalanceStore>) -> Self {
        Self {
            store,
            reserved: HashMap::new(),
        }
    }

    pub fn get_balance(&self, asset: &str) -> Decimal {
        self.store.get_available(asset)
    }

    pub fn get_reserved(&self, asset: &str) -> Decimal {
        self.reserved.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn get_available_balance(&self, asset: &str) -> Decimal {
        (self.get_balance(asset) - self.get_reserved(asset)).max(Decimal::ZERO)
    }

    pub fn balance(&self, asset: &str) -> Balance {
        Balance {
            asset: asset.to_string(),
            balance: self.get_balance(asset),
            reserved: self.get_reserved(asset),
            available: self.get_available_balance(asset),
        }
    }

    /// Applies `delta` to the raw balance, flooring the result at zero.
    /// Returns the new balance.
    pub fn update_balance(&mut self, asset: &str, delta: Decimal) -> Decimal {
        let current = self.get_balance(asset);
        let applied = if current + delta < Decimal::ZERO {
            tracing::warn!(
                asset = %asset,
                balance = %current,
                delta = %delta,
                "Balance update would go negative, flooring at zero."
            );
            -current
        } else {
            delta
        };
        let updated = self.store.apply_delta(asset, applied);

        // A shrinking balance may not leave more reserved than held.
        if let Some(reserved) = self.reserved.get_mut(asset) {
            if *reserved > updated {
                *reserved = updated;
            }
        }
        updated
    }

    /// Earmarks `amount` of `asset`, moving it from available to reserved.
    pub fn reserve_balance(&mut self, asset: &str, amount: Decimal) -> Result<(), ExecutorError> {
        let available = self.get_available_balance(asset);
        if amount > available {
            return Err(ExecutorError::InsufficientBalance {
                asset: asset.to_string(),
                required: amount,
                available,
            });
        }
        *self.reserved.entry(asset.to_string()).or_insert(Decimal::ZERO) += amount;
        tracing::debug!(asset = %asset, amount = %amount, "Reserved balance.");
        Ok(())
    }

    /// Returns up to `amount` of reserved `asset` to available. Returns what was released.
    pub fn release_reservation(&mut self, asset: &str, amount: Decimal) -> Decimal {
        let Some(reserved) = self.reserved.get_mut(asset) else {
            return Decimal::ZERO;
        };
        let released = amount.min(*reserved).max(Decimal::ZERO);
        *reserved -= released;
        if reserved.is_zero() {
            self.reserved.remove(asset);
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ledger() -> BalanceLedger {
        BalanceLedger::new(Box::new(InMemoryBalanceStore::new([
            ("USDC", dec!(1000)),
            ("ETH", dec!(2)),
        ])))
    }

    #[test]
    fn available_is_balance_minus_reserved() {
        let mut ledger = ledger();
        ledger.reserve_balance("USDC", dec!(300)).unwrap();
        let b = ledger.balance("USDC");
        assert_eq!(b.balance, dec!(1000));
        assert_eq!(b.reserved, dec!(300));
        assert_eq!(b.available, dec!(700));
    }

    #[test]
    fn reserving_more_than_available_fails() {
        let mut ledger = ledger();
        ledger.reserve_balance("USDC", dec!(800)).unwrap();
        let err = ledger.reserve_balance("USDC", dec!(300)).unwrap_err();
        assert_eq!(
            err,
            ExecutorError::InsufficientBalance {
                asset: "USDC".to_string(),
                required: dec!(300),
                available: dec!(200),
            }
        );
        assert_eq!(ledger.get_reserved("USDC"), dec!(800));
    }

    #[test]
    fn update_floors_at_zero() {
        let mut ledger = ledger();
        assert_eq!(ledger.update_balance("ETH", dec!(-5)), Decimal::ZERO);
        assert_eq!(ledger.get_balance("ETH"), Decimal::ZERO);
        assert_eq!(ledger.update_balance("SOL", dec!(3)), dec!(3));
    }

    #[test]
    fn shrinking_balance_clamps_reservation() {
        let mut ledger = ledger();
        ledger.reserve_balance("ETH", dec!(2)).unwrap();
        ledger.update_balance("ETH", dec!(-1.5));
        assert_eq!(ledger.get_reserved("ETH"), dec!(0.5));
        assert_eq!(ledger.get_available_balance("ETH"), Decimal::ZERO);
    }

    #[test]
    fn release_never_exceeds_reservation() {
        let mut ledger = ledger();
        ledger.reserve_balance("USDC", dec!(100)).unwrap();
        assert_eq!(ledger.release_reservation("USDC", dec!(250)), dec!(100));
        assert_eq!(ledger.get_reserved("USDC"), Decimal::ZERO);
        assert_eq!(ledger.release_reservation("BTC", dec!(1)), Decimal::ZERO);
    }
}
