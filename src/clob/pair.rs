//! CLOB pair configuration: the static parameters of one order book.
//!
//! `size_quote_quantums = subticks * base_quantums * 10^quantum_conversion_exponent`
//! ties the price and size domains together; everything here is bookkeeping
//! around that identity.

use crate::math::{big_mul_pow10, big_rat_floor, big_rat_round_half_up};
use crate::prices::Market;
use crate::perpetuals::{Perpetual, QUOTE_ATOMIC_RESOLUTION};
use crate::types::{BaseQuantums, ClobPairId, PerpetualId, Subticks};
use crate::clob::order::Order;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::Signed;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClobPairStatus {
    /// Created but not yet tradable.
    Initializing,
    Active,
    Paused,
    /// Placement rejected; cancels still processed.
    CancelOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClobPair {
    pub id: ClobPairId,
    pub perpetual_id: PerpetualId,
    /// Fill amounts must be positive multiples of this.
    pub step_base_quantums: BaseQuantums,
    /// Smallest order size; at least one step.
    pub min_order_base_quantums: BaseQuantums,
    pub quantum_conversion_exponent: i32,
    /// Prices must be positive multiples of this.
    pub subticks_per_tick: u32,
    pub maker_fee_ppm: i32,
    pub taker_fee_ppm: i32,
    pub status: ClobPairStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderValidationError {
    #[error("order size {quantums} below minimum {min}")]
    OrderSizeBelowMinimum {
        quantums: BaseQuantums,
        min: BaseQuantums,
    },

    #[error("order size {quantums} not a multiple of step size {step}")]
    OrderSizeNotMultipleOfStep {
        quantums: BaseQuantums,
        step: BaseQuantums,
    },

    #[error("order subticks {subticks} not a positive multiple of {subticks_per_tick}")]
    InvalidSubticks {
        subticks: Subticks,
        subticks_per_tick: u32,
    },

    #[error("order flags do not match its good-til field")]
    GoodTilMismatch,

    #[error("subaccount number {0} is out of range")]
    InvalidSubaccountNumber(u32),

    #[error("good-til-block {good_til_block} is behind block height {block_height}")]
    GoodTilBlockInPast {
        good_til_block: u32,
        block_height: u32,
    },

    #[error("good-til-block {good_til_block} is too far past block height {block_height}")]
    GoodTilBlockTooFarInFuture {
        good_til_block: u32,
        block_height: u32,
    },

    #[error("good-til-time {good_til_time} is not after block time {block_time}")]
    GoodTilTimeInPast { good_til_time: u64, block_time: u64 },

    #[error("clob pair {0:?} is not accepting orders")]
    ClobPairNotActive(ClobPairId),
}

impl ClobPair {
    pub fn validate(&self) -> Result<(), ClobPairConfigError> {
        if self.step_base_quantums.is_zero() {
            return Err(ClobPairConfigError::ZeroStepSize(self.id));
        }
        if self.min_order_base_quantums < self.step_base_quantums {
            return Err(ClobPairConfigError::MinOrderBelowStep(self.id));
        }
        if self.subticks_per_tick == 0 {
            return Err(ClobPairConfigError::ZeroSubticksPerTick(self.id));
        }
        Ok(())
    }

    pub fn fee_ppm(&self, is_taker: bool) -> i32 {
        if is_taker {
            self.taker_fee_ppm
        } else {
            self.maker_fee_ppm
        }
    }

    pub fn accepts_orders(&self) -> bool {
        self.status == ClobPairStatus::Active
    }

    pub fn accepts_cancels(&self) -> bool {
        matches!(self.status, ClobPairStatus::Active | ClobPairStatus::CancelOnly)
    }

    /// Stateless order checks against this pair's size and price grids.
    pub fn validate_order(&self, order: &Order) -> Result<(), OrderValidationError> {
        if !self.accepts_orders() {
            return Err(OrderValidationError::ClobPairNotActive(self.id));
        }
        if order.id.subaccount_id.number >= crate::types::MAX_SUBACCOUNT_NUMBER {
            return Err(OrderValidationError::InvalidSubaccountNumber(
                order.id.subaccount_id.number,
            ));
        }
        if !order.flags_match_good_til() {
            return Err(OrderValidationError::GoodTilMismatch);
        }
        if order.quantums < self.min_order_base_quantums {
            return Err(OrderValidationError::OrderSizeBelowMinimum {
                quantums: order.quantums,
                min: self.min_order_base_quantums,
            });
        }
        if order.quantums.value() % self.step_base_quantums.value() != 0 {
            return Err(OrderValidationError::OrderSizeNotMultipleOfStep {
                quantums: order.quantums,
                step: self.step_base_quantums,
            });
        }
        if order.subticks.value() == 0
            || order.subticks.value() % u64::from(self.subticks_per_tick) != 0
        {
            return Err(OrderValidationError::InvalidSubticks {
                subticks: order.subticks,
                subticks_per_tick: self.subticks_per_tick,
            });
        }
        Ok(())
    }

    /// Quote quantums exchanged for `fill_amount` at `subticks`, rounded
    /// half up: `subticks * fill_amount * 10^quantum_conversion_exponent`.
    pub fn fill_quote_quantums(&self, subticks: Subticks, fill_amount: BaseQuantums) -> BigInt {
        let product = BigInt::from(subticks.value()) * BigInt::from(fill_amount.value());
        let scaled = big_mul_pow10(&product, self.quantum_conversion_exponent);
        big_rat_round_half_up(&scaled)
    }

    /// A price from the prices module expressed on this pair's subtick
    /// grid, as an exact rational:
    /// `subticks = price * 10^(exponent - qce + base_resolution - quote_resolution)`
    ///
    /// Takes the raw price so callers can convert either the oracle price
    /// or a daemon index price at the market's exponent.
    pub fn price_to_subticks(
        &self,
        price: u64,
        market: &Market,
        perpetual: &Perpetual,
    ) -> BigRational {
        let exponent = market.exponent - self.quantum_conversion_exponent
            + perpetual.atomic_resolution
            - QUOTE_ATOMIC_RESOLUTION;
        big_mul_pow10(&BigInt::from(price), exponent)
    }

    /// Snaps a rational subtick value onto this pair's price grid. Sells
    /// round down (so resting buyers can fill) and buys round up; the result
    /// is floored at one tick and capped at the largest representable
    /// multiple.
    ///
    /// Panics on a negative price: a liquidation with a negative fillable
    /// price means the block is invalid.
    pub fn aligned_subticks(&self, subticks: &BigRational, round_up: bool) -> Subticks {
        assert!(
            !subticks.is_negative(),
            "cannot align a negative subticks value: {subticks}"
        );
        let spt = BigInt::from(self.subticks_per_tick);
        let ticks = subticks / BigRational::from_integer(spt.clone());
        let ticks = if round_up {
            ticks.ceil().to_integer()
        } else {
            big_rat_floor(&ticks)
        };
        let max_multiple =
            BigInt::from(u64::MAX - u64::MAX % u64::from(self.subticks_per_tick));
        let aligned = (ticks * &spt).max(spt).min(max_multiple);
        Subticks(u64::try_from(&aligned).expect("aligned subticks capped at u64 range"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClobPairConfigError {
    #[error("clob pair {0:?}: step size must be positive")]
    ZeroStepSize(ClobPairId),

    #[error("clob pair {0:?}: min order size below step size")]
    MinOrderBelowStep(ClobPairId),

    #[error("clob pair {0:?}: subticks per tick must be positive")]
    ZeroSubticksPerTick(ClobPairId),
}
