//! Versioned in-memory state store.
//!
//! The store owns every persistent entity. Handlers run against a
//! transaction overlay: `begin_tx` snapshots committed state, writes land on
//! the overlay, and `commit_tx`/`revert_tx` decide whether they stick. That
//! is the check-vs-deliver split: both contexts see their own writes,
//! including insurance-fund movements from earlier fills in the same
//! transaction.

use crate::clob::{ClobPair, Order, OrderId};
use crate::config::LiquidationsConfig;
use crate::math::max_u32;
use crate::perpetuals::{LiquidityTier, Perpetual};
use crate::prices::Market;
use crate::subaccounts::{PerpetualView, Subaccount};
use crate::types::{BaseQuantums, ClobPairId, MarketId, PerpetualId, SubaccountId};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-order fill bookkeeping. Short-term orders carry a pruning height;
/// stateful orders use `u32::MAX` and are removed by good-til-time instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillState {
    pub filled_quantums: BaseQuantums,
    pub prune_at_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatefulOrderPlacement {
    pub order: Order,
    pub placed_at_height: u32,
}

/// Per-block record of liquidation damage to one subaccount. Reset at block
/// commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubaccountLiquidationInfo {
    pub perpetuals_liquidated: Vec<PerpetualId>,
    pub notional_liquidated: u64,
    pub quantums_insurance_lost: u64,
}

impl SubaccountLiquidationInfo {
    pub fn has_liquidated(&self, perpetual_id: PerpetualId) -> bool {
        self.perpetuals_liquidated.contains(&perpetual_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    pub markets: BTreeMap<MarketId, Market>,
    pub index_prices: BTreeMap<MarketId, u64>,
    pub perpetuals: BTreeMap<PerpetualId, Perpetual>,
    pub liquidity_tiers: BTreeMap<u32, LiquidityTier>,
    pub clob_pairs: BTreeMap<ClobPairId, ClobPair>,
    pub subaccounts: BTreeMap<SubaccountId, Subaccount>,
    pub fill_amounts: BTreeMap<OrderId, FillState>,
    pub stateful_orders: BTreeMap<OrderId, StatefulOrderPlacement>,
    pub orders_for_pruning: BTreeMap<u32, Vec<OrderId>>,
    pub liquidation_info: BTreeMap<SubaccountId, SubaccountLiquidationInfo>,
    pub liquidations_config: LiquidationsConfig,
    pub insurance_fund_balance: i128,
    pub fee_collector_balance: i128,
    pub withdrawals_blocked: bool,
}

impl State {
    pub fn perpetual_view(&self) -> PerpetualView<'_> {
        PerpetualView {
            perpetuals: &self.perpetuals,
            liquidity_tiers: &self.liquidity_tiers,
            markets: &self.markets,
        }
    }

    pub fn clob_pair(&self, id: ClobPairId) -> Option<&ClobPair> {
        self.clob_pairs.get(&id)
    }

    /// Current fill amount and pruning height for an order; zeros when the
    /// order has never been filled.
    pub fn order_fill_amount(&self, order_id: &OrderId) -> FillState {
        self.fill_amounts.get(order_id).copied().unwrap_or_default()
    }

    pub fn set_order_fill_amount(
        &mut self,
        order_id: &OrderId,
        filled_quantums: BaseQuantums,
        prune_at_height: u32,
    ) {
        self.fill_amounts.insert(
            order_id.clone(),
            FillState {
                filled_quantums,
                prune_at_height,
            },
        );
    }

    pub fn add_order_for_pruning(&mut self, order_id: OrderId, height: u32) {
        let ids = self.orders_for_pruning.entry(height).or_default();
        if !ids.contains(&order_id) {
            ids.push(order_id);
        }
    }

    /// Drops fill state for orders whose pruning height has arrived.
    /// An order re-added at a later height survives the earlier entry.
    pub fn prune_order_fills(&mut self, height: u32) -> Vec<OrderId> {
        let mut pruned = Vec::new();
        let due: Vec<u32> = self
            .orders_for_pruning
            .range(..=height)
            .map(|(h, _)| *h)
            .collect();
        for h in due {
            if let Some(ids) = self.orders_for_pruning.remove(&h) {
                for order_id in ids {
                    let fill = self.order_fill_amount(&order_id);
                    if fill.prune_at_height <= height {
                        self.fill_amounts.remove(&order_id);
                        pruned.push(order_id);
                    }
                }
            }
        }
        pruned
    }

    /// Atomic multi-subaccount update against this state's registries.
    pub fn update_subaccounts(
        &mut self,
        updates: &[crate::subaccounts::Update],
    ) -> (bool, Vec<crate::subaccounts::UpdateResult>) {
        let view = PerpetualView {
            perpetuals: &self.perpetuals,
            liquidity_tiers: &self.liquidity_tiers,
            markets: &self.markets,
        };
        crate::subaccounts::update_subaccounts(
            &mut self.subaccounts,
            view,
            updates,
            self.withdrawals_blocked,
        )
    }

    pub fn liquidation_info(&self, subaccount_id: &SubaccountId) -> SubaccountLiquidationInfo {
        self.liquidation_info
            .get(subaccount_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Moves quote quantums between the subaccounts pool and the insurance
    /// fund. A negative delta drains the fund; callers must have verified
    /// solvency, so going negative here means the block is invalid.
    pub fn transfer_insurance_fund_payment(&mut self, delta: &BigInt) {
        let delta = i128::try_from(delta).unwrap_or_else(|_| {
            panic!("insurance fund delta exceeds bounded magnitude: {delta}")
        });
        let next = self
            .insurance_fund_balance
            .checked_add(delta)
            .unwrap_or_else(|| panic!("insurance fund balance overflow"));
        assert!(
            next >= 0,
            "insurance fund balance went negative: {} + {}",
            self.insurance_fund_balance,
            delta
        );
        self.insurance_fund_balance = next;
    }

    /// Moves collected fees to the fee-collector module account. The engine
    /// never produces a transfer the pool cannot cover, so failure halts.
    pub fn transfer_fees_to_collector(&mut self, total_fee_quantums: &BigInt) {
        let delta = i128::try_from(total_fee_quantums).unwrap_or_else(|_| {
            panic!("fee transfer exceeds bounded magnitude: {total_fee_quantums}")
        });
        let next = self
            .fee_collector_balance
            .checked_add(delta)
            .unwrap_or_else(|| panic!("fee collector balance overflow"));
        assert!(
            next >= 0,
            "fee transfer failed: collector balance went negative ({} + {})",
            self.fee_collector_balance,
            delta
        );
        self.fee_collector_balance = next;
    }
}

/// The versioned map. One transaction at a time; no nesting.
#[derive(Debug, Default)]
pub struct StateStore {
    committed: State,
    overlay: Option<State>,
}

impl StateStore {
    pub fn new(genesis: State) -> Self {
        Self {
            committed: genesis,
            overlay: None,
        }
    }

    pub fn state(&self) -> &State {
        self.overlay.as_ref().unwrap_or(&self.committed)
    }

    pub fn state_mut(&mut self) -> &mut State {
        self.overlay.as_mut().unwrap_or(&mut self.committed)
    }

    pub fn in_tx(&self) -> bool {
        self.overlay.is_some()
    }

    pub fn begin_tx(&mut self) {
        assert!(self.overlay.is_none(), "state transaction already open");
        self.overlay = Some(self.committed.clone());
    }

    pub fn commit_tx(&mut self) {
        let overlay = self.overlay.take().expect("no state transaction to commit");
        self.committed = overlay;
    }

    pub fn revert_tx(&mut self) {
        assert!(self.overlay.take().is_some(), "no state transaction to revert");
    }
}

/// Pruning height for a short-term order after a fill: the later of its
/// good-til-block plus the short block window and any height already
/// scheduled.
pub fn next_prune_height(good_til_block: u32, current_prune_height: u32) -> u32 {
    max_u32(
        good_til_block.saturating_add(crate::types::SHORT_BLOCK_WINDOW),
        current_prune_height,
    )
}
