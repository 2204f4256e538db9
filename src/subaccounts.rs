//! Subaccount ledger: positions, collateral evaluation, and the atomic
//! multi-subaccount update path.
//!
//! `update_subaccounts` is all-or-nothing. Each update is evaluated against
//! the margin rules below; if any update fails, nothing is written. A
//! subaccount that is already below initial margin may still apply an update
//! that does not worsen its collateral-to-maintenance ratio, which is what
//! lets liquidation fills (clamped by the bankruptcy price) pass.

use crate::perpetuals::{margin_requirements, net_notional_quote_quantums, LiquidityTier, Perpetual};
use crate::prices::Market;
use crate::types::{AssetId, MarketId, PerpetualId, SignedQuantums, SubaccountId, QUOTE_ASSET_ID};
use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subaccount {
    pub id: SubaccountId,
    /// At most one entry per asset; zero entries are purged on write.
    pub asset_positions: BTreeMap<AssetId, i128>,
    /// At most one entry per perpetual; zero entries are purged on write.
    pub perpetual_positions: BTreeMap<PerpetualId, SignedQuantums>,
}

impl Subaccount {
    pub fn new(id: SubaccountId) -> Self {
        Self {
            id,
            asset_positions: BTreeMap::new(),
            perpetual_positions: BTreeMap::new(),
        }
    }

    pub fn quote_balance(&self) -> i128 {
        self.asset_positions.get(&QUOTE_ASSET_ID).copied().unwrap_or(0)
    }

    pub fn perpetual_position(&self, perpetual_id: PerpetualId) -> Option<SignedQuantums> {
        self.perpetual_positions.get(&perpetual_id).copied()
    }

    pub fn has_perpetual_positions(&self) -> bool {
        !self.perpetual_positions.is_empty()
    }
}

/// What kind of state change an update represents. Withdrawals and transfers
/// are subject to the chain-safety gate; liquidations get the maintenance
/// margin exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateType {
    Match,
    Liquidation,
    Deposit,
    Withdrawal,
    Transfer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetUpdate {
    pub asset_id: AssetId,
    pub quantums_delta: i128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerpetualUpdate {
    pub perpetual_id: PerpetualId,
    pub quantums_delta: i128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub subaccount_id: SubaccountId,
    pub asset_updates: Vec<AssetUpdate>,
    pub perpetual_updates: Vec<PerpetualUpdate>,
    pub update_type: UpdateType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateResult {
    Success,
    NewlyUndercollateralized,
    StillUndercollateralized,
    WithdrawalsAndTransfersBlocked,
    UpdateCausedError,
}

impl UpdateResult {
    pub fn is_success(&self) -> bool {
        matches!(self, UpdateResult::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubaccountsError {
    #[error("perpetual {0:?} does not exist")]
    UnknownPerpetual(PerpetualId),

    #[error("liquidity tier {0} does not exist")]
    UnknownLiquidityTier(u32),

    #[error("market {0:?} does not exist")]
    UnknownMarket(MarketId),
}

/// Read-only view over the registries the margin math needs. The store
/// splits its fields into this so the subaccount map can be borrowed
/// mutably alongside it.
#[derive(Clone, Copy)]
pub struct PerpetualView<'a> {
    pub perpetuals: &'a BTreeMap<PerpetualId, Perpetual>,
    pub liquidity_tiers: &'a BTreeMap<u32, LiquidityTier>,
    pub markets: &'a BTreeMap<MarketId, Market>,
}

impl<'a> PerpetualView<'a> {
    pub fn lookup(
        &self,
        perpetual_id: PerpetualId,
    ) -> Result<(&'a Perpetual, &'a LiquidityTier, &'a Market), SubaccountsError> {
        let perpetual = self
            .perpetuals
            .get(&perpetual_id)
            .ok_or(SubaccountsError::UnknownPerpetual(perpetual_id))?;
        let tier = self
            .liquidity_tiers
            .get(&perpetual.liquidity_tier)
            .ok_or(SubaccountsError::UnknownLiquidityTier(perpetual.liquidity_tier))?;
        let market = self
            .markets
            .get(&perpetual.market_id)
            .ok_or(SubaccountsError::UnknownMarket(perpetual.market_id))?;
        Ok((perpetual, tier, market))
    }
}

/// Net collateral and margin requirements of one subaccount, in quote
/// quantums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Risk {
    pub net_collateral: BigInt,
    pub initial_margin: BigInt,
    pub maintenance_margin: BigInt,
}

pub fn risk_of(subaccount: &Subaccount, view: PerpetualView<'_>) -> Result<Risk, SubaccountsError> {
    let mut net_collateral = BigInt::from(subaccount.quote_balance());
    let mut initial_margin = BigInt::zero();
    let mut maintenance_margin = BigInt::zero();

    for (perpetual_id, quantums) in &subaccount.perpetual_positions {
        let (perpetual, tier, market) = view.lookup(*perpetual_id)?;
        net_collateral += net_notional_quote_quantums(perpetual, market, quantums.value());
        let req = margin_requirements(perpetual, tier, market, quantums.value());
        initial_margin += req.initial;
        maintenance_margin += req.maintenance;
    }

    Ok(Risk {
        net_collateral,
        initial_margin,
        maintenance_margin,
    })
}

/// A subaccount with no perpetual positions is never liquidatable: a bare
/// negative quote balance is a debt, not a position to close.
pub fn is_liquidatable(
    subaccount: &Subaccount,
    view: PerpetualView<'_>,
) -> Result<bool, SubaccountsError> {
    if !subaccount.has_perpetual_positions() {
        return Ok(false);
    }
    let risk = risk_of(subaccount, view)?;
    Ok(risk.net_collateral < risk.maintenance_margin)
}

fn apply_deltas(subaccount: &Subaccount, update: &Update) -> Subaccount {
    let mut updated = subaccount.clone();
    for asset_update in &update.asset_updates {
        let entry = updated.asset_positions.entry(asset_update.asset_id).or_insert(0);
        *entry = entry.checked_add(asset_update.quantums_delta).unwrap_or_else(|| {
            panic!(
                "asset position overflow for {}: {} + {}",
                subaccount.id, entry, asset_update.quantums_delta
            )
        });
        if *entry == 0 {
            updated.asset_positions.remove(&asset_update.asset_id);
        }
    }
    for perp_update in &update.perpetual_updates {
        let current = updated
            .perpetual_positions
            .get(&perp_update.perpetual_id)
            .copied()
            .unwrap_or_else(SignedQuantums::zero);
        let next = current.value().checked_add(perp_update.quantums_delta).unwrap_or_else(|| {
            panic!(
                "perpetual position overflow for {}: {} + {}",
                subaccount.id,
                current.value(),
                perp_update.quantums_delta
            )
        });
        if next == 0 {
            updated.perpetual_positions.remove(&perp_update.perpetual_id);
        } else {
            updated
                .perpetual_positions
                .insert(perp_update.perpetual_id, SignedQuantums::new(next));
        }
    }
    updated
}

fn evaluate_update(
    current: &Subaccount,
    updated: &Subaccount,
    update: &Update,
    view: PerpetualView<'_>,
    withdrawals_blocked: bool,
) -> UpdateResult {
    if withdrawals_blocked
        && matches!(update.update_type, UpdateType::Withdrawal | UpdateType::Transfer)
    {
        return UpdateResult::WithdrawalsAndTransfersBlocked;
    }

    let (risk_before, risk_after) = match (risk_of(current, view), risk_of(updated, view)) {
        (Ok(before), Ok(after)) => (before, after),
        _ => return UpdateResult::UpdateCausedError,
    };

    // Liquidation updates only need to restore maintenance margin.
    let required_after = if update.update_type == UpdateType::Liquidation {
        &risk_after.maintenance_margin
    } else {
        &risk_after.initial_margin
    };
    if risk_after.net_collateral >= *required_after {
        return UpdateResult::Success;
    }

    if risk_before.net_collateral >= risk_before.initial_margin {
        return UpdateResult::NewlyUndercollateralized;
    }

    // Already undercollateralized: allow the update only when the
    // collateral-to-maintenance ratio does not get worse, compared
    // cross-multiplied to stay in integers.
    let ratio_not_worse = &risk_after.net_collateral * &risk_before.maintenance_margin
        >= &risk_before.net_collateral * &risk_after.maintenance_margin;
    let requirement_not_higher = risk_after.maintenance_margin <= risk_before.maintenance_margin;
    if ratio_not_worse && requirement_not_higher {
        UpdateResult::Success
    } else {
        UpdateResult::StillUndercollateralized
    }
}

/// Applies a batch of updates atomically. Returns overall success plus the
/// per-update results in input order; on any failure no state is written.
pub fn update_subaccounts(
    subaccounts: &mut BTreeMap<SubaccountId, Subaccount>,
    view: PerpetualView<'_>,
    updates: &[Update],
    withdrawals_blocked: bool,
) -> (bool, Vec<UpdateResult>) {
    let mut results = Vec::with_capacity(updates.len());
    let mut staged: Vec<Subaccount> = Vec::with_capacity(updates.len());

    // Stage sequentially so later updates in the batch observe earlier ones.
    let mut working: BTreeMap<SubaccountId, Subaccount> = BTreeMap::new();
    for update in updates {
        let current = working
            .get(&update.subaccount_id)
            .cloned()
            .or_else(|| subaccounts.get(&update.subaccount_id).cloned())
            .unwrap_or_else(|| Subaccount::new(update.subaccount_id.clone()));

        let updated = apply_deltas(&current, update);
        let result = evaluate_update(&current, &updated, update, view, withdrawals_blocked);
        results.push(result);

        working.insert(update.subaccount_id.clone(), updated.clone());
        staged.push(updated);
    }

    let success = results.iter().all(UpdateResult::is_success);
    if success {
        for updated in staged {
            subaccounts.insert(updated.id.clone(), updated);
        }
    }
    (success, results)
}
