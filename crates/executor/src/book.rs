//! The synthetic order book: one aggregated liquidity curve per asset.
//!
//! Levels near the reference price are tight and deep, far levels wide and
//! shallow, so small trades barely move the price while large ones walk far
//! into the ladder. Generation is deterministic: the same reference price and
//! settings always yield the same ladder.

use crate::error::ExecutorError;
use chrono::{DateTime, Utc};
use configuration::OrderBookSettings;
use core_types::{BookLevel, OrderBook, OrderFill, OrderSide};
use rust_decimal::Decimal;

const PRICE_DP: u32 = 8;
const SIZE_DP: u32 = 8;

/// Builds a fresh ladder around `reference_price`.
pub fn generate_order_book(
    asset: &str,
    reference_price: Decimal,
    settings: &OrderBookSettings,
    now: DateTime<Utc>,
) -> Result<OrderBook, ExecutorError> {
    if reference_price <= Decimal::ZERO {
        return Err(ExecutorError::InvalidReferencePrice {
            asset: asset.to_string(),
            price: reference_price,
        });
    }

    let mut bids = Vec::with_capacity(settings.levels);
    let mut asks = Vec::with_capacity(settings.levels);
    let mut level_notional = settings.base_level_notional;

    for i in 0..settings.levels {
        let step = Decimal::from(i as u64);
        let distance = settings.half_spread_pct
            + settings.level_spacing_pct * step
            + settings.spacing_growth_pct * step * step;
        let size = (level_notional / reference_price).round_dp(SIZE_DP);

        if size > Decimal::ZERO {
            asks.push(BookLevel {
                price: (reference_price * (Decimal::ONE + distance)).round_dp(PRICE_DP),
                size,
            });
            // Bids cannot reach zero; the ladder just ends early on that side.
            if distance < Decimal::ONE {
                bids.push(BookLevel {
                    price: (reference_price * (Decimal::ONE - distance)).round_dp(PRICE_DP),
                    size,
                });
            }
        }

        level_notional *= settings.depth_decay;
    }

    tracing::debug!(
        asset = %asset,
        reference_price = %reference_price,
        levels = asks.len(),
        "Generated order book."
    );

    Ok(OrderBook {
        asset: asset.to_string(),
        reference_price,
        bids,
        asks,
        generated_at: now,
    })
}

/// Returns a copy of `book` with the liquidity consumed by `fills` removed.
///
/// A taker buy consumes asks and a taker sell consumes bids. Fills arrive in
/// the order the ladder was walked, so depletion follows the same order: each
/// fill starts at the first unexhausted level at its price at or after the
/// previous one, and any excess carries over to the next levels. Levels that
/// share a price are therefore consumed one after the other. Exhausted levels
/// are dropped and no level is ever left with negative size.
pub fn update_order_book_after_execution(
    book: &OrderBook,
    side: OrderSide,
    fills: &[OrderFill],
) -> OrderBook {
    let mut next = book.clone();
    let levels = match side {
        OrderSide::Buy => &mut next.asks,
        OrderSide::Sell => &mut next.bids,
    };

    let mut cursor = 0;
    for fill in fills {
        let Some(offset) = levels[cursor..]
            .iter()
            .position(|l| l.price == fill.price && l.size > Decimal::ZERO)
        else {
            tracing::warn!(
                asset = %book.asset,
                price = %fill.price,
                "Fill price not present in book, nothing to deplete."
            );
            continue;
        };
        cursor += offset;

        let mut left = fill.amount;
        while left > Decimal::ZERO && cursor < levels.len() {
            let level = &mut levels[cursor];
            let take = left.min(level.size);
            level.size -= take;
            left -= take;
            if level.size <= Decimal::ZERO {
                cursor += 1;
            }
        }
    }
    levels.retain(|l| l.size > Decimal::ZERO);

    next
}
