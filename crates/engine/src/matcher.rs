use crate::{MatchReport, OrderManager};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// What a single matcher tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Another tick was still running; this one did nothing.
    Skipped,
    /// No active orders, nothing to evaluate.
    Idle,
    Processed(MatchReport),
}

/// The background limit-order matcher.
///
/// Runs in its own task and periodically refreshes the books from the price
/// source, then lets every resting order try to cross. It shares the manager
/// with callers through a mutex, so a tick always sees and leaves a consistent
/// snapshot. An in-flight flag turns an overlapping tick into a no-op.
pub struct LimitOrderMatcher {
    manager: Arc<Mutex<OrderManager>>,
    period: Duration,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag even if the tick future is dropped mid-way.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl LimitOrderMatcher {
    pub fn new(manager: Arc<Mutex<OrderManager>>, period: Duration) -> Self {
        Self {
            manager,
            period,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Runs one matching pass unless another is still in progress.
    pub async fn tick(&self) -> TickOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            tracing::warn!("Previous matcher tick still running, skipping.");
            return TickOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let mut manager = self.manager.lock().await;
        if !manager.has_active_orders() {
            return TickOutcome::Idle;
        }
        manager.refresh_order_books();
        TickOutcome::Processed(manager.process_limit_orders())
    }

    /// Moves the matcher onto its own task. The first pass runs one period
    /// after spawning.
    pub fn spawn(self) -> MatcherHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let matcher = self;

        let join = tokio::spawn(async move {
            tracing::info!(period_ms = matcher.period.as_millis() as u64, "Limit order matcher started.");
            let mut timer = interval(matcher.period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick is immediate.
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let TickOutcome::Processed(report) = matcher.tick().await {
                            tracing::debug!(
                                evaluated = report.evaluated,
                                filled = report.filled,
                                "Matcher tick complete."
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Limit order matcher stopped.");
        });

        MatcherHandle { shutdown_tx, join }
    }
}

/// Owner's handle on a spawned matcher.
pub struct MatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MatcherHandle {
    /// Stops the matcher after any tick in progress and waits for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Limit order matcher task failed.");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configuration::Config;
    use core_types::{OrderParams, OrderSide};
    use executor::{InMemoryBalanceStore, StaticPriceSource};
    use rust_decimal_macros::dec;

    fn manager() -> Arc<Mutex<OrderManager>> {
        let config = Config::default();
        let store = InMemoryBalanceStore::new(config.account.balances.clone());
        let prices = StaticPriceSource::new(config.market.prices.clone());
        let manager = OrderManager::new(&config, Box::new(store), Arc::new(prices)).unwrap();
        Arc::new(Mutex::new(manager))
    }

    #[tokio::test]
    async fn idle_without_active_orders() {
        let matcher = LimitOrderMatcher::new(manager(), Duration::from_secs(5));
        assert_eq!(matcher.tick().await, TickOutcome::Idle);
        assert!(!matcher.is_ticking());
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let shared = manager();
        shared
            .lock()
            .await
            .create_order(OrderParams::limit(OrderSide::Buy, "ETH", dec!(1), dec!(2400)))
            .unwrap();
        let matcher = Arc::new(LimitOrderMatcher::new(Arc::clone(&shared), Duration::from_secs(5)));

        let held = shared.lock().await;
        let first = {
            let matcher = Arc::clone(&matcher);
            tokio::spawn(async move { matcher.tick().await })
        };
        while !matcher.is_ticking() {
            tokio::task::yield_now().await;
        }
        assert_eq!(matcher.tick().await, TickOutcome::Skipped);
        drop(held);

        let outcome = first.await.unwrap();
        assert!(matches!(outcome, TickOutcome::Processed(ref r) if r.evaluated == 1 && r.filled == 0));
        assert!(!matcher.is_ticking());
    }

    #[tokio::test]
    async fn shutdown_stops_the_task() {
        let handle = LimitOrderMatcher::new(manager(), Duration::from_millis(10)).spawn();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }
}
