use core_types::{Order, OrderStatus};
use rust_decimal::Decimal;

/// Aggregate counters over the full order history.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderStats {
    pub total_orders: usize,
    pub active_orders: usize,
    pub filled_orders: usize,
    pub cancelled_orders: usize,
    pub rejected_orders: usize,
    /// Quote-asset notional across every fill of every order.
    pub total_volume: Decimal,
    /// Mean time from creation to the final fill, over filled orders.
    pub average_fill_time_ms: i64,
}

impl OrderStats {
    pub fn from_orders<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Self {
        let mut stats = OrderStats::default();
        let mut fill_time_total_ms: i64 = 0;

        for order in orders {
            stats.total_orders += 1;
            stats.total_volume += order.filled_notional();
            match order.status {
                OrderStatus::Open | OrderStatus::PartiallyFilled => stats.active_orders += 1,
                OrderStatus::Filled => {
                    stats.filled_orders += 1;
                    if let Some(last) = order.fills.last() {
                        fill_time_total_ms += (last.timestamp - order.created_at).num_milliseconds();
                    }
                }
                OrderStatus::Cancelled => stats.cancelled_orders += 1,
                OrderStatus::Rejected => stats.rejected_orders += 1,
                OrderStatus::Pending => {}
            }
        }

        if stats.filled_orders > 0 {
            stats.average_fill_time_ms = fill_time_total_ms / stats.filled_orders as i64;
        }
        stats
    }
}
