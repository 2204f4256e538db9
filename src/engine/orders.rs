//! Order handlers and the matching loop.
//!
//! `place_order` is the taker entry point for standing orders;
//! `run_match_loop` is shared with the liquidation engine. The loop evicts
//! makers that fail collateralization, aborts when the taker fails, and
//! stops early on liquidation statuses.

use super::core::Engine;
use super::matching::{remaining_quantums, MatchWithOrders};
use super::results::{ClobError, MatchOutcome, PlaceOrderResult, PlaceOrderStatus};
use crate::clob::{
    crosses, LiquidationOrder, MatchableOrder, Order, OrderId, OrderValidationError, TimeInForce,
};
use crate::events::{OffchainUpdate, OffchainUpdates, OrderRemoveReason};
use crate::msgs::{
    MatchOrders, MatchPerpetualLiquidation, MsgCancelOrder, MsgPlaceOrder, MsgProposedOperations,
    Operation,
};
use crate::state::StatefulOrderPlacement;
use crate::subaccounts::UpdateResult;
use crate::types::{BaseQuantums, Side, SHORT_BLOCK_WINDOW};

/// Why the matching loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum MatchLoopStop {
    /// Taker filled, book exhausted, or prices no longer cross.
    Exhausted,
    /// The taker failed collateralization; the caller drops the order.
    TakerFailed(UpdateResult),
    Deleveraging,
    BlockLimit,
}

#[derive(Debug, Clone)]
pub(super) struct LoopFill {
    pub maker_order_id: OrderId,
    pub fill_amount: BaseQuantums,
}

#[derive(Debug)]
pub(super) struct MatchLoopOutcome {
    pub filled: BaseQuantums,
    pub stop: MatchLoopStop,
    pub fills: Vec<LoopFill>,
    pub offchain: OffchainUpdates,
    /// Summed signed insurance-fund movement across the loop's fills.
    pub insurance_fund_delta: i128,
}

impl Engine {
    /// Places a standing order: validation, optional stateful persistence,
    /// matching, and resting of any remainder.
    pub fn place_order(
        &mut self,
        msg: &MsgPlaceOrder,
    ) -> Result<(PlaceOrderResult, OffchainUpdates), ClobError> {
        self.transactional(|this| this.place_order_inner(&msg.order))
    }

    fn place_order_inner(
        &mut self,
        order: &Order,
    ) -> Result<(PlaceOrderResult, OffchainUpdates), ClobError> {
        let clob_pair = self
            .store
            .state()
            .clob_pair(order.id.clob_pair_id)
            .cloned()
            .ok_or(ClobError::InvalidClob(order.id.clob_pair_id))?;
        clob_pair.validate_order(order)?;
        self.validate_good_til(order)?;

        if self.memclob.get_order(&order.id).is_some() && !order.is_stateful() {
            return Err(ClobError::DuplicateOrder(order.id.clone()));
        }

        let mut offchain = OffchainUpdates::new();
        let reject = |status: PlaceOrderStatus| {
            Ok((
                PlaceOrderResult {
                    status,
                    filled_quantums: BaseQuantums(0),
                    remaining_quantums: order.quantums,
                    rested: false,
                },
                OffchainUpdates::new(),
            ))
        };

        // Gates that reject before any state is touched.
        if order.reduce_only && !self.reduce_only_allowed(order, &clob_pair) {
            return reject(PlaceOrderStatus::ReduceOnlyBlocked);
        }
        if order.time_in_force == TimeInForce::PostOnly && self.would_cross(order)? {
            return reject(PlaceOrderStatus::PostOnlyWouldCross);
        }
        if order.time_in_force == TimeInForce::FillOrKill
            && self.crossing_liquidity(order)? < order.quantums
        {
            return reject(PlaceOrderStatus::ImmediateOrCancelWouldRest);
        }

        // Stateful orders persist before matching so later orders in the
        // block validate against them. A replacement must extend the
        // good-til-time; the replaced order leaves the book.
        if order.is_stateful() {
            if let Some(existing) = self.store.state().stateful_orders.get(&order.id) {
                let extends = match (order.good_til_time(), existing.order.good_til_time()) {
                    (Some(new), Some(old)) => new > old,
                    _ => false,
                };
                if !extends {
                    return Err(ClobError::InvalidStatefulOrderReplacement {
                        order_id: order.id.clone(),
                    });
                }
                if self.memclob.remove_order(&order.id).is_some() {
                    offchain.add(OffchainUpdate::OrderRemove {
                        order_id: order.id.clone(),
                        reason: OrderRemoveReason::UserCanceled,
                    });
                }
            }
            let placement = StatefulOrderPlacement {
                order: order.clone(),
                placed_at_height: self.block_height,
            };
            self.store
                .state_mut()
                .stateful_orders
                .insert(order.id.clone(), placement);
        }

        // Post-only orders rest without matching.
        let outcome = if order.time_in_force == TimeInForce::PostOnly {
            MatchLoopOutcome {
                filled: BaseQuantums(0),
                stop: MatchLoopStop::Exhausted,
                fills: Vec::new(),
                offchain: OffchainUpdates::new(),
                insurance_fund_delta: 0,
            }
        } else {
            let taker = MatchableOrder::Order(order.clone());
            self.run_match_loop(&taker)?
        };
        offchain.extend(outcome.offchain);

        if let MatchLoopStop::TakerFailed(_) = outcome.stop {
            // Fills already persisted stand; the order itself is dropped.
            if order.is_stateful() {
                self.store.state_mut().stateful_orders.remove(&order.id);
            }
            let filled = self.store.state().order_fill_amount(&order.id).filled_quantums;
            return Ok((
                PlaceOrderResult {
                    status: PlaceOrderStatus::Undercollateralized,
                    filled_quantums: outcome.filled,
                    remaining_quantums: remaining_quantums(order, filled),
                    rested: false,
                },
                offchain,
            ));
        }

        let filled = self.store.state().order_fill_amount(&order.id).filled_quantums;
        let remaining = remaining_quantums(order, filled);

        let mut rested = false;
        let mut status = PlaceOrderStatus::Success;
        if !remaining.is_zero() {
            match order.time_in_force {
                TimeInForce::GoodTilTime | TimeInForce::PostOnly => {
                    self.memclob.insert_order(order.clone())?;
                    offchain.add(OffchainUpdate::OrderPlace {
                        order: order.clone(),
                    });
                    rested = true;
                }
                TimeInForce::ImmediateOrCancel | TimeInForce::FillOrKill => {
                    status = PlaceOrderStatus::ImmediateOrCancelWouldRest;
                    if order.is_stateful() {
                        self.store.state_mut().stateful_orders.remove(&order.id);
                    }
                }
            }
        } else if order.is_stateful() {
            // Fully filled; nothing left to protect in state.
            self.store.state_mut().stateful_orders.remove(&order.id);
        }

        Ok((
            PlaceOrderResult {
                status,
                filled_quantums: outcome.filled,
                remaining_quantums: remaining,
                rested,
            },
            offchain,
        ))
    }

    /// Cancels a resting and/or stateful order.
    pub fn cancel_order(&mut self, msg: &MsgCancelOrder) -> Result<OffchainUpdates, ClobError> {
        self.transactional(|this| this.cancel_order_inner(msg))
    }

    fn cancel_order_inner(&mut self, msg: &MsgCancelOrder) -> Result<OffchainUpdates, ClobError> {
        let order_id = &msg.order_id;
        let clob_pair_id = order_id.clob_pair_id;
        let clob_pair = self
            .store
            .state()
            .clob_pair(clob_pair_id)
            .ok_or(ClobError::InvalidClob(clob_pair_id))?;
        if !clob_pair.accepts_cancels() {
            return Err(ClobError::InvalidOrder(
                OrderValidationError::ClobPairNotActive(clob_pair_id),
            ));
        }

        let rested = self.memclob.remove_order(order_id).is_some();
        let stateful = self
            .store
            .state_mut()
            .stateful_orders
            .remove(order_id)
            .is_some();
        if !rested && !stateful {
            return Err(ClobError::OrderNotFound(order_id.clone()));
        }

        let mut offchain = OffchainUpdates::new();
        offchain.add(OffchainUpdate::OrderRemove {
            order_id: order_id.clone(),
            reason: OrderRemoveReason::UserCanceled,
        });
        Ok(offchain)
    }

    /// Replays the proposer's ordered operation queue atomically: any
    /// invalid operation reverts the whole message.
    pub fn process_proposed_operations(
        &mut self,
        msg: &MsgProposedOperations,
    ) -> Result<OffchainUpdates, ClobError> {
        self.transactional(|this| {
            let mut all_updates = OffchainUpdates::new();
            for operation in &msg.operations {
                match operation {
                    Operation::PlaceOrder(place) => {
                        let (_, updates) = this.place_order_inner(&place.order)?;
                        all_updates.extend(updates);
                    }
                    Operation::CancelOrder(cancel) => {
                        all_updates.extend(this.cancel_order_inner(cancel)?);
                    }
                    Operation::MatchOrders(matches) => {
                        all_updates.extend(this.process_proposed_match(matches)?);
                    }
                    Operation::MatchPerpetualLiquidation(liquidation) => {
                        all_updates.extend(this.process_proposed_liquidation(liquidation)?);
                    }
                }
            }
            Ok(all_updates)
        })
    }

    fn process_proposed_match(
        &mut self,
        matches: &MatchOrders,
    ) -> Result<OffchainUpdates, ClobError> {
        let taker = self
            .resolve_order(&matches.taker_order_id)?
            .ok_or_else(|| ClobError::OrderNotFound(matches.taker_order_id.clone()))?;
        let mut offchain = OffchainUpdates::new();
        for fill in &matches.fills {
            let maker = self
                .resolve_order(&fill.maker_order_id)?
                .ok_or_else(|| ClobError::OrderNotFound(fill.maker_order_id.clone()))?;
            let matched = MatchWithOrders {
                maker,
                taker: MatchableOrder::Order(taker.clone()),
                fill_amount: fill.fill_amount,
            };
            let (outcome, updates) = self.process_single_match(&matched)?;
            match outcome {
                MatchOutcome::Applied { .. } => offchain.extend(updates),
                _ => {
                    return Err(ClobError::ProposedMatchFailed {
                        taker_order_id: matches.taker_order_id.clone(),
                        maker_order_id: fill.maker_order_id.clone(),
                    });
                }
            }
        }
        Ok(offchain)
    }

    fn process_proposed_liquidation(
        &mut self,
        proposed: &MatchPerpetualLiquidation,
    ) -> Result<OffchainUpdates, ClobError> {
        let info = self.store.state().liquidation_info(&proposed.liquidated);
        if info.has_liquidated(proposed.perpetual_id) {
            panic!(
                "subaccount {} has already liquidated perpetual {:?} in this block",
                proposed.liquidated, proposed.perpetual_id
            );
        }
        self.store
            .state_mut()
            .liquidation_info
            .entry(proposed.liquidated.clone())
            .or_default()
            .perpetuals_liquidated
            .push(proposed.perpetual_id);

        let side = if proposed.is_buy { Side::Buy } else { Side::Sell };
        let mut offchain = OffchainUpdates::new();
        for fill in &proposed.fills {
            let maker = self
                .resolve_order(&fill.maker_order_id)?
                .ok_or_else(|| ClobError::OrderNotFound(fill.maker_order_id.clone()))?;
            // The fill executes at the maker's price; the synthesized
            // order's own limit is whatever the proposer accepted.
            let liquidation = LiquidationOrder {
                liquidated: proposed.liquidated.clone(),
                perpetual_id: proposed.perpetual_id,
                clob_pair_id: proposed.clob_pair_id,
                side,
                quantums: proposed.total_size,
                subticks: maker.subticks,
            };
            let matched = MatchWithOrders {
                maker,
                taker: MatchableOrder::Liquidation(liquidation),
                fill_amount: fill.fill_amount,
            };
            let (outcome, updates) = self.process_single_match(&matched)?;
            match outcome {
                MatchOutcome::Applied { .. } => offchain.extend(updates),
                MatchOutcome::RequiresDeleveraging | MatchOutcome::BlockLimitReached => break,
                MatchOutcome::CollateralizationFailed { .. } => {
                    return Err(ClobError::ProposedMatchFailed {
                        taker_order_id: OrderId {
                            subaccount_id: proposed.liquidated.clone(),
                            client_id: 0,
                            clob_pair_id: proposed.clob_pair_id,
                            flags: crate::clob::OrderFlags::ShortTerm,
                        },
                        maker_order_id: fill.maker_order_id.clone(),
                    });
                }
            }
        }
        Ok(offchain)
    }

    fn resolve_order(&self, order_id: &OrderId) -> Result<Option<Order>, ClobError> {
        if let Some(resting) = self.memclob.get_order(order_id) {
            return Ok(Some(resting.order.clone()));
        }
        Ok(self
            .store
            .state()
            .stateful_orders
            .get(order_id)
            .map(|p| p.order.clone()))
    }

    // 10.2: the matching loop. while the taker has size and the top of the
    // opposite book crosses, fill against the best maker one step at a time.
    pub(super) fn run_match_loop(
        &mut self,
        taker: &MatchableOrder,
    ) -> Result<MatchLoopOutcome, ClobError> {
        let clob_pair_id = taker.clob_pair_id();
        let taker_side = taker.side();
        let step = self
            .store
            .state()
            .clob_pair(clob_pair_id)
            .ok_or(ClobError::InvalidClob(clob_pair_id))?
            .step_base_quantums;

        let mut offchain = OffchainUpdates::new();
        let mut fills: Vec<LoopFill> = Vec::new();
        let mut loop_filled = BaseQuantums(0);
        let mut insurance_total: i128 = 0;

        let stop = loop {
            let remaining = match taker {
                MatchableOrder::Order(order) => {
                    let filled = self.store.state().order_fill_amount(&order.id).filled_quantums;
                    remaining_quantums(order, filled)
                }
                MatchableOrder::Liquidation(liquidation) => liquidation
                    .quantums
                    .checked_sub(loop_filled)
                    .unwrap_or(BaseQuantums(0)),
            };
            if remaining.is_zero() {
                break MatchLoopStop::Exhausted;
            }

            let Some(best) = self.memclob.best_opposing(clob_pair_id, taker_side)? else {
                break MatchLoopStop::Exhausted;
            };
            if !crosses(taker_side, taker.subticks(), best.order.subticks) {
                break MatchLoopStop::Exhausted;
            }
            let maker = best.order.clone();

            // A taker never trades with itself; the older resting order loses.
            if maker.id.subaccount_id == *taker.subaccount_id() {
                self.remove_maker(&maker.id, OrderRemoveReason::SelfTrade, &mut offchain);
                continue;
            }

            let maker_filled = self.store.state().order_fill_amount(&maker.id).filled_quantums;
            let maker_remaining = remaining_quantums(&maker, maker_filled);
            if maker_remaining.is_zero() {
                self.remove_maker(&maker.id, OrderRemoveReason::FullyFilled, &mut offchain);
                continue;
            }

            let mut fill_amount = remaining.min(maker_remaining);
            fill_amount = BaseQuantums(fill_amount.value() - fill_amount.value() % step.value());
            if fill_amount.is_zero() {
                break MatchLoopStop::Exhausted;
            }

            let matched = MatchWithOrders {
                maker: maker.clone(),
                taker: taker.clone(),
                fill_amount,
            };
            let (outcome, fill_updates) = self.process_single_match(&matched)?;
            match outcome {
                MatchOutcome::Applied {
                    insurance_fund_delta,
                    ..
                } => {
                    offchain.extend(fill_updates);
                    loop_filled = BaseQuantums(loop_filled.value() + fill_amount.value());
                    insurance_total += insurance_fund_delta;
                    fills.push(LoopFill {
                        maker_order_id: maker.id.clone(),
                        fill_amount,
                    });

                    let maker_filled =
                        self.store.state().order_fill_amount(&maker.id).filled_quantums;
                    if remaining_quantums(&maker, maker_filled).is_zero() {
                        self.remove_maker(&maker.id, OrderRemoveReason::FullyFilled, &mut offchain);
                    }
                }
                MatchOutcome::CollateralizationFailed {
                    taker_result,
                    maker_result,
                } => {
                    if !maker_result.is_success() {
                        self.remove_maker(
                            &maker.id,
                            OrderRemoveReason::Undercollateralized,
                            &mut offchain,
                        );
                        continue;
                    }
                    break MatchLoopStop::TakerFailed(taker_result);
                }
                MatchOutcome::RequiresDeleveraging => break MatchLoopStop::Deleveraging,
                MatchOutcome::BlockLimitReached => break MatchLoopStop::BlockLimit,
            }
        };

        Ok(MatchLoopOutcome {
            filled: loop_filled,
            stop,
            fills,
            offchain,
            insurance_fund_delta: insurance_total,
        })
    }

    fn remove_maker(
        &mut self,
        order_id: &OrderId,
        reason: OrderRemoveReason,
        offchain: &mut OffchainUpdates,
    ) {
        if self.memclob.remove_order(order_id).is_some() {
            self.store.state_mut().stateful_orders.remove(order_id);
            offchain.add(OffchainUpdate::OrderRemove {
                order_id: order_id.clone(),
                reason,
            });
        }
    }

    /// Short-term good-til-blocks must land within the short block window;
    /// stateful good-til-times must be in the future.
    fn validate_good_til(&self, order: &Order) -> Result<(), ClobError> {
        match order.good_til {
            crate::clob::GoodTil::Block(height) => {
                if height < self.block_height {
                    return Err(ClobError::InvalidOrder(
                        OrderValidationError::GoodTilBlockInPast {
                            good_til_block: height,
                            block_height: self.block_height,
                        },
                    ));
                }
                if height > self.block_height.saturating_add(SHORT_BLOCK_WINDOW) {
                    return Err(ClobError::InvalidOrder(
                        OrderValidationError::GoodTilBlockTooFarInFuture {
                            good_til_block: height,
                            block_height: self.block_height,
                        },
                    ));
                }
            }
            crate::clob::GoodTil::Time(time) => {
                if time <= self.block_time {
                    return Err(ClobError::InvalidOrder(
                        OrderValidationError::GoodTilTimeInPast {
                            good_til_time: time,
                            block_time: self.block_time,
                        },
                    ));
                }
            }
        }
        Ok(())
    }

    /// Reduce-only orders must oppose the position and not flip it.
    fn reduce_only_allowed(&self, order: &Order, clob_pair: &crate::clob::ClobPair) -> bool {
        let position = self
            .store
            .state()
            .subaccounts
            .get(&order.id.subaccount_id)
            .and_then(|s| s.perpetual_position(clob_pair.perpetual_id))
            .unwrap_or_else(crate::types::SignedQuantums::zero);
        match position.closing_side() {
            Some(closing) => {
                order.side == closing && u128::from(order.quantums.value()) <= position.abs()
            }
            None => false,
        }
    }

    fn would_cross(&self, order: &Order) -> Result<bool, ClobError> {
        Ok(self
            .memclob
            .best_opposing(order.id.clob_pair_id, order.side)?
            .is_some_and(|best| crosses(order.side, order.subticks, best.order.subticks)))
    }

    /// Total crossing maker size available to this taker, for fill-or-kill.
    fn crossing_liquidity(&self, order: &Order) -> Result<BaseQuantums, ClobError> {
        let mut total: u64 = 0;
        for resting in self
            .memclob
            .orders(order.id.clob_pair_id, order.side.opposite())?
        {
            if !crosses(order.side, order.subticks, resting.order.subticks) {
                break;
            }
            if resting.order.id.subaccount_id == order.id.subaccount_id {
                continue;
            }
            let filled = self
                .store
                .state()
                .order_fill_amount(&resting.order.id)
                .filled_quantums;
            total = total.saturating_add(remaining_quantums(&resting.order, filled).value());
        }
        Ok(BaseQuantums(total))
    }
}
