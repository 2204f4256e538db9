//! Market registry and oracle-price admission rules.
//!
//! A market carries the last accepted oracle price plus the parameters that
//! gate how far a single update may move it. The price daemon reports
//! per-exchange prices; the engine medians them and then runs the proposed
//! price through the min-change and index-directionality rules below.

use crate::math::{abs_diff, big_int_mul_ppm, ONE_MILLION};
use crate::types::MarketId;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    /// Human-readable pair, e.g. "BTC-USD".
    pub pair: String,
    /// Price is `price * 10^exponent` in quote units.
    pub exponent: i32,
    /// Minimum price movement required to accept an update, in ppm of the
    /// current price. Must be in (0, 1_000_000].
    pub min_price_change_ppm: u32,
    /// Last accepted oracle price. Zero means never set.
    pub price: u64,
    /// Exchange feeds allowed to report for this market.
    pub exchanges: BTreeSet<u32>,
    /// How many exchange feeds must report before an update is considered.
    pub min_exchanges: u32,
}

impl Market {
    pub fn validate(&self) -> Result<(), PricesError> {
        if self.min_price_change_ppm == 0 || self.min_price_change_ppm as u64 > ONE_MILLION {
            return Err(PricesError::InvalidMarketParams {
                market_id: self.id,
                reason: "min_price_change_ppm must be in (0, 1_000_000]",
            });
        }
        if (self.min_exchanges as usize) > self.exchanges.len() {
            return Err(PricesError::InvalidMarketParams {
                market_id: self.id,
                reason: "min_exchanges exceeds configured exchanges",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricesError {
    #[error("market {0:?} does not exist")]
    UnknownMarket(MarketId),

    #[error("market {market_id:?}: price change from {old_price} to {new_price} is below the required minimum")]
    PriceChangeBelowMinimum {
        market_id: MarketId,
        old_price: u64,
        new_price: u64,
    },

    #[error("market {market_id:?}: price change from {old_price} to {new_price} moves away from the index price {index_price}")]
    PriceMovesAwayFromIndex {
        market_id: MarketId,
        old_price: u64,
        new_price: u64,
        index_price: u64,
    },

    #[error("market {market_id:?}: {reason}")]
    InvalidMarketParams {
        market_id: MarketId,
        reason: &'static str,
    },
}

/// Price change needed to trigger an update, per the market's ppm setting.
///
/// Comparisons happen without the market exponent, so no scaling is applied.
fn min_price_change_amount(market: &Market) -> u64 {
    let big_min_change = big_int_mul_ppm(
        &BigInt::from(market.price),
        i64::from(market.min_price_change_ppm),
    );
    u64::try_from(&big_min_change).unwrap_or_else(|_| {
        // Only reachable with min_price_change_ppm > 1e6, which market
        // validation rejects.
        panic!("min price change amount exceeds u64 for market {:?}", market.id)
    })
}

fn is_above_required_min_price_change(market: &Market, new_price: u64) -> bool {
    abs_diff(market.price, new_price) >= min_price_change_amount(market)
}

/// New price lies in the closed interval between the current and index price.
fn is_towards_index_price(old_price: u64, new_price: u64, index_price: u64) -> bool {
    new_price <= old_price.max(index_price) && new_price >= old_price.min(index_price)
}

/// Index price lies strictly between the current and the new price.
fn is_crossing_index_price(old_price: u64, new_price: u64, index_price: u64) -> bool {
    index_price < old_price.max(new_price) && index_price > old_price.min(new_price)
}

/// tick_size scaled by 1e6: `old_price * min_price_change_ppm`. Keeping the
/// ppm factor around avoids divisions and the rounding they would bring.
fn compute_tick_size_ppm(old_price: u64, min_price_change_ppm: u32) -> BigInt {
    BigInt::from(old_price) * BigInt::from(min_price_change_ppm)
}

fn price_delta_is_within_one_tick(price_delta: &BigInt, tick_size_ppm: &BigInt) -> bool {
    let price_delta_ppm = price_delta * BigInt::from(ONE_MILLION);
    price_delta_ppm <= *tick_size_ppm
}

/// Acceptance condition when the new price crosses the index price and the
/// old price sits more than one tick away from the index.
///
/// Valid when new_ticks <= sqrt(old_ticks). Refactored to stay in integers:
/// new_delta * new_delta * 1_000_000 <= old_delta * tick_size_ppm
fn new_price_meets_sqrt_condition(
    old_delta: &BigInt,
    new_delta: &BigInt,
    tick_size_ppm: &BigInt,
) -> bool {
    let new_delta_squared_ppm = new_delta * new_delta * BigInt::from(ONE_MILLION);
    let old_delta_times_tick_size_ppm = old_delta * tick_size_ppm;
    new_delta_squared_ppm <= old_delta_times_tick_size_ppm
}

/// Runs a proposed price through the admission rules against the market's
/// current price and the daemon index price.
pub fn validate_price_update(
    market: &Market,
    index_price: u64,
    new_price: u64,
) -> Result<(), PricesError> {
    if !is_above_required_min_price_change(market, new_price) {
        return Err(PricesError::PriceChangeBelowMinimum {
            market_id: market.id,
            old_price: market.price,
            new_price,
        });
    }

    let old_price = market.price;

    if is_towards_index_price(old_price, new_price, index_price) {
        return Ok(());
    }

    let tick_size_ppm = compute_tick_size_ppm(old_price, market.min_price_change_ppm);
    let old_delta = BigInt::from(abs_diff(old_price, index_price));

    // When the old price already sits within one tick of the index, direction
    // carries no signal and the min-change gate is the only constraint.
    if price_delta_is_within_one_tick(&old_delta, &tick_size_ppm) {
        return Ok(());
    }

    if is_crossing_index_price(old_price, new_price, index_price) {
        let new_delta = BigInt::from(abs_diff(new_price, index_price));
        if new_price_meets_sqrt_condition(&old_delta, &new_delta, &tick_size_ppm) {
            return Ok(());
        }
    }

    Err(PricesError::PriceMovesAwayFromIndex {
        market_id: market.id,
        old_price,
        new_price,
        index_price,
    })
}

/// Median of the reported exchange prices. Even counts average the two middle
/// values, rounding half up.
pub fn median_price(prices: &[u64]) -> Option<u64> {
    if prices.is_empty() {
        return None;
    }
    let mut sorted = prices.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        let low = sorted[mid - 1] as u128;
        let high = sorted[mid] as u128;
        Some(((low + high + 1) / 2) as u64)
    }
}
