//! Liquidation engine configuration.
//!
//! Every limit here caps damage per block: how much of a position one pass
//! may close, how much notional one subaccount may lose per block, and how
//! much the insurance fund may bleed before deleveraging takes over.

use crate::math::ONE_MILLION;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounds on how much of a single position one liquidation may close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionBlockLimits {
    /// Lower bound on the notional closed per liquidation, so dust positions
    /// close in one pass. Never exceeds the actual position notional.
    pub min_position_notional_liquidated: u64,
    /// Upper bound as a ppm fraction of the position size.
    pub max_position_portion_liquidated_ppm: u32,
}

/// Per-subaccount, per-block damage caps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubaccountBlockLimits {
    /// Max notional liquidated across all of a subaccount's positions per block.
    pub max_notional_liquidated: u64,
    /// Max quote quantums the insurance fund may lose to one subaccount per block.
    pub max_quantums_insurance_lost: u64,
}

/// Parameters of the fillable-price spread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillablePriceConfig {
    /// Weight on the bankruptcy-distance term. At least 1e6.
    pub bankruptcy_adjustment_ppm: u32,
    /// Weight on the maintenance-margin-ratio term.
    pub spread_to_maintenance_margin_ratio_ppm: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationsConfig {
    /// Cap on the liquidation fee the insurance fund collects, in ppm of the
    /// fill quote quantums.
    pub max_liquidation_fee_ppm: u32,
    pub position_block_limits: PositionBlockLimits,
    pub subaccount_block_limits: SubaccountBlockLimits,
    pub fillable_price_config: FillablePriceConfig,
    /// Insurance-fund balance below which a fund-negative fill triggers
    /// deleveraging instead of matching.
    pub max_insurance_fund_quantums_for_deleveraging: u64,
}

impl Default for LiquidationsConfig {
    fn default() -> Self {
        Self {
            max_liquidation_fee_ppm: 5_000,
            position_block_limits: PositionBlockLimits {
                min_position_notional_liquidated: 1_000,
                max_position_portion_liquidated_ppm: ONE_MILLION as u32,
            },
            subaccount_block_limits: SubaccountBlockLimits {
                max_notional_liquidated: u64::MAX,
                max_quantums_insurance_lost: u64::MAX,
            },
            fillable_price_config: FillablePriceConfig {
                bankruptcy_adjustment_ppm: ONE_MILLION as u32,
                spread_to_maintenance_margin_ratio_ppm: 100_000,
            },
            max_insurance_fund_quantums_for_deleveraging: 0,
        }
    }
}

impl LiquidationsConfig {
    /// Test-friendly preset with no block limits and no deleveraging
    /// threshold.
    pub fn no_limits() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), LiquidationsConfigError> {
        if self.max_liquidation_fee_ppm == 0
            || u64::from(self.max_liquidation_fee_ppm) > ONE_MILLION
        {
            return Err(LiquidationsConfigError::PpmOutOfBounds("max_liquidation_fee_ppm"));
        }
        let portion = self.position_block_limits.max_position_portion_liquidated_ppm;
        if portion == 0 || u64::from(portion) > ONE_MILLION {
            return Err(LiquidationsConfigError::PpmOutOfBounds(
                "max_position_portion_liquidated_ppm",
            ));
        }
        if u64::from(self.fillable_price_config.bankruptcy_adjustment_ppm) < ONE_MILLION {
            return Err(LiquidationsConfigError::BankruptcyAdjustmentBelowOne);
        }
        if self.fillable_price_config.spread_to_maintenance_margin_ratio_ppm == 0 {
            return Err(LiquidationsConfigError::PpmOutOfBounds(
                "spread_to_maintenance_margin_ratio_ppm",
            ));
        }
        if self.subaccount_block_limits.max_notional_liquidated == 0 {
            return Err(LiquidationsConfigError::ZeroSubaccountLimit(
                "max_notional_liquidated",
            ));
        }
        if self.subaccount_block_limits.max_quantums_insurance_lost == 0 {
            return Err(LiquidationsConfigError::ZeroSubaccountLimit(
                "max_quantums_insurance_lost",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiquidationsConfigError {
    #[error("liquidations config: {0} must be in (0, 1_000_000]")]
    PpmOutOfBounds(&'static str),

    #[error("liquidations config: bankruptcy_adjustment_ppm must be at least 1_000_000")]
    BankruptcyAdjustmentBelowOne,

    #[error("liquidations config: {0} must be positive")]
    ZeroSubaccountLimit(&'static str),
}
