//! Perpetual definitions, liquidity tiers, and margin math.
//!
//! A perpetual binds a market's oracle price to a base-quantum position
//! domain. Liquidity tiers hold the ppm margin parameters; above the tier's
//! base position notional the initial-margin ppm scales with the square root
//! of the notional, so large positions post proportionally more margin.

use crate::math::{
    big_int_mul_ppm_ceil, big_int_sqrt, big_mul_pow10, big_rat_round_half_up, ONE_MILLION,
};
use crate::prices::Market;
use crate::types::{MarketId, PerpetualId};
use num_bigint::BigInt;
use num_traits::Signed;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Quote asset atomic resolution: one quote quantum is 10^-6 of the quote
/// currency.
pub const QUOTE_ATOMIC_RESOLUTION: i32 = -6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Perpetual {
    pub id: PerpetualId,
    /// Market whose oracle price values this perpetual.
    pub market_id: MarketId,
    /// One base quantum is 10^atomic_resolution of the base currency.
    pub atomic_resolution: i32,
    pub default_funding_ppm: i32,
    pub liquidity_tier: u32,
    /// Cumulative funding index. Mutated by the funding module only.
    pub funding_index: i128,
}

impl Perpetual {
    pub fn validate(&self) -> Result<(), PerpetualsError> {
        if !(-10..=10).contains(&self.atomic_resolution) {
            return Err(PerpetualsError::InvalidAtomicResolution {
                perpetual_id: self.id,
                atomic_resolution: self.atomic_resolution,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityTier {
    /// Initial margin in ppm of position notional. At most 1e6.
    pub initial_margin_ppm: u32,
    /// Maintenance margin as a ppm fraction of initial margin. At most 1e6,
    /// which keeps maintenance <= initial by construction.
    pub maintenance_fraction_ppm: u32,
    /// Notional (quote quantums) above which the margin ppm scales up.
    pub base_position_notional: u64,
}

impl LiquidityTier {
    pub fn validate(&self) -> Result<(), PerpetualsError> {
        if self.initial_margin_ppm as u64 > ONE_MILLION {
            return Err(PerpetualsError::PpmOutOfBounds("initial_margin_ppm"));
        }
        if self.maintenance_fraction_ppm as u64 > ONE_MILLION {
            return Err(PerpetualsError::PpmOutOfBounds("maintenance_fraction_ppm"));
        }
        if self.base_position_notional == 0 {
            return Err(PerpetualsError::ZeroBasePositionNotional);
        }
        Ok(())
    }

    /// Initial-margin ppm adjusted for position size: above the base
    /// notional, scaled by sqrt(notional / base), capped at 1e6.
    pub fn adjusted_initial_margin_ppm(&self, notional: &BigInt) -> u32 {
        let base = BigInt::from(self.base_position_notional);
        if *notional <= base {
            return self.initial_margin_ppm;
        }
        // adjustment_ppm = sqrt(notional / base) * 1e6 = sqrt(notional * 1e12 / base)
        let million = BigInt::from(ONE_MILLION);
        let adjustment_ppm = big_int_sqrt(&(notional * &million * &million / base));
        let adjusted = BigInt::from(self.initial_margin_ppm) * adjustment_ppm / million;
        u32::try_from(&adjusted).map_or(ONE_MILLION as u32, |ppm| {
            ppm.min(ONE_MILLION as u32)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PerpetualsError {
    #[error("perpetual {perpetual_id:?}: atomic resolution {atomic_resolution} outside [-10, 10]")]
    InvalidAtomicResolution {
        perpetual_id: PerpetualId,
        atomic_resolution: i32,
    },

    #[error("liquidity tier: {0} exceeds 1_000_000")]
    PpmOutOfBounds(&'static str),

    #[error("liquidity tier: base position notional must be positive")]
    ZeroBasePositionNotional,
}

/// Signed quote-quantum value of `quantums` base quantums at the market's
/// oracle price, exact:
///
/// quote = quantums * price * 10^(market.exponent + atomic_resolution - quote_resolution)
pub fn net_notional_rat(
    perpetual: &Perpetual,
    market: &Market,
    quantums: i128,
) -> num_rational::BigRational {
    let exponent = market.exponent + perpetual.atomic_resolution - QUOTE_ATOMIC_RESOLUTION;
    big_mul_pow10(&(BigInt::from(quantums) * BigInt::from(market.price)), exponent)
}

/// As `net_notional_rat`, rounded half up to whole quote quantums.
pub fn net_notional_quote_quantums(
    perpetual: &Perpetual,
    market: &Market,
    quantums: i128,
) -> BigInt {
    big_rat_round_half_up(&net_notional_rat(perpetual, market, quantums))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarginRequirements {
    pub initial: BigInt,
    pub maintenance: BigInt,
}

/// Initial and maintenance margin for a position, in quote quantums.
/// Both round toward the exchange.
pub fn margin_requirements(
    perpetual: &Perpetual,
    tier: &LiquidityTier,
    market: &Market,
    quantums: i128,
) -> MarginRequirements {
    let notional = net_notional_quote_quantums(perpetual, market, quantums).abs();
    let im_ppm = tier.adjusted_initial_margin_ppm(&notional);
    let initial = big_int_mul_ppm_ceil(&notional, im_ppm);
    let maintenance = big_int_mul_ppm_ceil(&initial, tier.maintenance_fraction_ppm);
    MarginRequirements {
        initial,
        maintenance,
    }
}
