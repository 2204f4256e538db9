//! `process_single_match`: persist one fill between a maker order and a
//! taker (standing order or liquidation).
//!
//! Both subaccounts update atomically, then the insurance-fund and fee
//! transfers land, then fill amounts and pruning heights. A
//! collateralization failure persists nothing and reports which side failed
//! so the matching loop can evict the right order.

use super::core::Engine;
use super::liquidations::LiquidationValidation;
use super::results::{ClobError, MatchOutcome};
use crate::clob::{MatchableOrder, Order};
use crate::events::{OffchainUpdate, OffchainUpdates};
use crate::math::big_int_mul_ppm;
use crate::state::next_prune_height;
use crate::subaccounts::{AssetUpdate, PerpetualUpdate, Update, UpdateType};
use crate::types::{BaseQuantums, QUOTE_ASSET_ID, SHORT_BLOCK_WINDOW};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use tracing::info;

/// A single proposed fill: taker takes the maker's price.
#[derive(Debug, Clone)]
pub struct MatchWithOrders {
    pub maker: Order,
    pub taker: MatchableOrder,
    pub fill_amount: BaseQuantums,
}

impl Engine {
    /// Validates and persists one match. Returns the outcome plus the
    /// off-chain updates it produced; `Err` means the proposal itself is
    /// malformed.
    pub fn process_single_match(
        &mut self,
        matched: &MatchWithOrders,
    ) -> Result<(MatchOutcome, OffchainUpdates), ClobError> {
        let clob_pair_id = matched.maker.id.clob_pair_id;
        let clob_pair = self
            .store
            .state()
            .clob_pair(clob_pair_id)
            .cloned()
            .ok_or(ClobError::InvalidClob(clob_pair_id))?;

        let fill_amount = matched.fill_amount;
        if fill_amount.is_zero()
            || fill_amount.value() % clob_pair.step_base_quantums.value() != 0
        {
            return Err(ClobError::FillAmountNotDivisibleByStepSize {
                fill_amount,
                step: clob_pair.step_base_quantums,
            });
        }

        // The maker's price sets the trade price.
        let fill_quote = clob_pair.fill_quote_quantums(matched.maker.subticks, fill_amount);
        let perpetual_id = clob_pair.perpetual_id;

        // Liquidations pay the liquidation fee instead of trading fees.
        let taker_fee_ppm = if matched.taker.is_liquidation() {
            0
        } else {
            clob_pair.fee_ppm(true)
        };
        let maker_fee_ppm = clob_pair.fee_ppm(false);

        let mut insurance_fund_delta = BigInt::zero();
        if let MatchableOrder::Liquidation(liquidation) = &matched.taker {
            match self.validate_matched_liquidation(liquidation, fill_amount, &fill_quote)? {
                LiquidationValidation::Delta(delta) => insurance_fund_delta = delta,
                LiquidationValidation::RequiresDeleveraging => {
                    return Ok((MatchOutcome::RequiresDeleveraging, OffchainUpdates::new()));
                }
                LiquidationValidation::BlockLimitReached => {
                    return Ok((MatchOutcome::BlockLimitReached, OffchainUpdates::new()));
                }
            }
        }

        // Fill-amount accounting happens before any state write so an
        // overfilled proposal rejects cleanly. Liquidation orders cannot be
        // replayed, so only standing orders track fill state.
        let maker_fill_state = self.store.state().order_fill_amount(&matched.maker.id);
        let new_maker_total =
            updated_fill_amount(&matched.maker, maker_fill_state.filled_quantums, fill_amount)?;

        let taker_fill_info = match &matched.taker {
            MatchableOrder::Order(taker_order) => {
                let fill_state = self.store.state().order_fill_amount(&taker_order.id);
                let new_total =
                    updated_fill_amount(taker_order, fill_state.filled_quantums, fill_amount)?;
                Some((taker_order.clone(), fill_state.prune_at_height, new_total))
            }
            MatchableOrder::Liquidation(_) => None,
        };

        // Quote flows to the seller, base to the buyer; each side also pays
        // its fee, and a liquidation taker settles its insurance-fund delta.
        let big_fill = BigInt::from(fill_amount.value());
        let (taker_quote_sign, taker_perp_sign) = if matched.taker.is_buy() {
            (-1i32, 1i32)
        } else {
            (1i32, -1i32)
        };

        let taker_fee = big_int_mul_ppm(&fill_quote, i64::from(taker_fee_ppm));
        let maker_fee = big_int_mul_ppm(&fill_quote, i64::from(maker_fee_ppm));
        if matched.taker.is_liquidation() && !taker_fee.is_zero() {
            panic!(
                "liquidation taker must never pay taker fees: {} for {}",
                taker_fee,
                matched.taker.subaccount_id()
            );
        }

        let taker_quote_delta =
            &fill_quote * BigInt::from(taker_quote_sign) - &taker_fee - &insurance_fund_delta;
        let maker_quote_delta = &fill_quote * BigInt::from(-taker_quote_sign) - &maker_fee;
        let taker_perp_delta = &big_fill * BigInt::from(taker_perp_sign);
        let maker_perp_delta = &big_fill * BigInt::from(-taker_perp_sign);

        debug_assert!(
            (&taker_quote_delta + &maker_quote_delta + &taker_fee + &maker_fee
                + &insurance_fund_delta)
                .is_zero(),
            "quote quantums must be conserved across a match"
        );

        let updates = [
            Update {
                subaccount_id: matched.taker.subaccount_id().clone(),
                asset_updates: vec![AssetUpdate {
                    asset_id: QUOTE_ASSET_ID,
                    quantums_delta: to_i128(&taker_quote_delta),
                }],
                perpetual_updates: vec![PerpetualUpdate {
                    perpetual_id,
                    quantums_delta: to_i128(&taker_perp_delta),
                }],
                update_type: if matched.taker.is_liquidation() {
                    UpdateType::Liquidation
                } else {
                    UpdateType::Match
                },
            },
            Update {
                subaccount_id: matched.maker.id.subaccount_id.clone(),
                asset_updates: vec![AssetUpdate {
                    asset_id: QUOTE_ASSET_ID,
                    quantums_delta: to_i128(&maker_quote_delta),
                }],
                perpetual_updates: vec![PerpetualUpdate {
                    perpetual_id,
                    quantums_delta: to_i128(&maker_perp_delta),
                }],
                update_type: UpdateType::Match,
            },
        ];

        let (success, results) = self.store.state_mut().update_subaccounts(&updates);
        let taker_result = results[0];
        let maker_result = results[1];

        if !success {
            return Ok((
                MatchOutcome::CollateralizationFailed {
                    taker_result,
                    maker_result,
                },
                OffchainUpdates::new(),
            ));
        }

        let state = self.store.state_mut();
        state.transfer_insurance_fund_payment(&insurance_fund_delta);
        state.transfer_fees_to_collector(&(&taker_fee + &maker_fee));

        if let MatchableOrder::Liquidation(liquidation) = &matched.taker {
            self.record_liquidation_fill(liquidation, &fill_quote, &insurance_fund_delta);
        }

        let mut offchain = OffchainUpdates::new();
        if let Some((taker_order, prune_height, new_total)) = taker_fill_info {
            self.set_fill_amount_and_pruning(&taker_order, new_total, prune_height, &mut offchain);
        }
        self.set_fill_amount_and_pruning(
            &matched.maker,
            new_maker_total,
            maker_fill_state.prune_at_height,
            &mut offchain,
        );

        Ok((
            MatchOutcome::Applied {
                taker_result,
                maker_result,
                insurance_fund_delta: to_i128(&insurance_fund_delta),
            },
            offchain,
        ))
    }

    /// Records the new total fill amount and, for short-term orders, the
    /// height at which that record can be pruned.
    fn set_fill_amount_and_pruning(
        &mut self,
        order: &Order,
        new_total: BaseQuantums,
        current_prune_height: u32,
        offchain: &mut OffchainUpdates,
    ) {
        let prune_at = match order.good_til_block() {
            // Stateful orders are removed by good-til-time, never pruned.
            None => u32::MAX,
            Some(good_til_block) => {
                if current_prune_height > good_til_block.saturating_add(SHORT_BLOCK_WINDOW) {
                    info!(
                        order_id = %order.id,
                        "order fill seen with a lower good-til-block than an earlier fill; \
                         a lower-priority replacement may have reached the book"
                    );
                }
                let height = next_prune_height(good_til_block, current_prune_height);
                self.store
                    .state_mut()
                    .add_order_for_pruning(order.id.clone(), height);
                height
            }
        };
        self.store
            .state_mut()
            .set_order_fill_amount(&order.id, new_total, prune_at);

        if self.memclob.get_order(&order.id).is_some() {
            offchain.add(OffchainUpdate::OrderUpdate {
                order_id: order.id.clone(),
                total_filled_quantums: new_total,
            });
        }
    }
}

/// New total fill amount for an order, rejecting fills past its size.
fn updated_fill_amount(
    order: &Order,
    current: BaseQuantums,
    fill: BaseQuantums,
) -> Result<BaseQuantums, ClobError> {
    let new_total = current.value().checked_add(fill.value());
    match new_total {
        Some(total) if total <= order.quantums.value() => Ok(BaseQuantums(total)),
        _ => Err(ClobError::InvalidOrderFillAmount {
            order_id: order.id.clone(),
            order_quantums: order.quantums,
            filled: current,
            fill_amount: fill,
        }),
    }
}

fn to_i128(value: &BigInt) -> i128 {
    crate::math::big_int_to_i128(value)
}

/// Remaining unfilled size of a standing order given state fill amounts.
pub fn remaining_quantums(order: &Order, filled: BaseQuantums) -> BaseQuantums {
    order
        .quantums
        .checked_sub(filled)
        .unwrap_or(BaseQuantums(0))
}
