//! Liquidation engine.
//!
//! An undercollateralized subaccount is closed through the same book as
//! everyone else: pick a position, clamp the size by the per-block limits,
//! price the synthetic order between oracle and bankruptcy, and run the
//! match loop. The insurance fund takes the capped liquidation fee on good
//! fills and eats the shortfall on bad ones, up to the deleveraging
//! threshold.

use super::core::Engine;
use super::orders::MatchLoopStop;
use super::results::{ClobError, LiquidationResult, LiquidationStatus};
use crate::clob::{ClobPair, LiquidationOrder, MatchableOrder};
use crate::events::{
    DeleveragingRequiredEvent, EventPayload, LiquidationEvent, LiquidationFill,
};
use crate::math::{big_int_mul_ppm, big_rat_ceil, big_rat_floor, ONE_MILLION};
use crate::perpetuals::{margin_requirements, net_notional_rat};
use crate::subaccounts::{risk_of, Subaccount};
use crate::types::{BaseQuantums, PerpetualId, SignedQuantums, SubaccountId, Subticks};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use tracing::info;

/// How a proposed liquidation fill stands with the fund and the block caps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum LiquidationValidation {
    /// Fill may proceed with this signed insurance-fund delta.
    Delta(BigInt),
    RequiresDeleveraging,
    BlockLimitReached,
}

impl Engine {
    /// Checks a subaccount and, if it sits below maintenance margin,
    /// liquidates one of its perpetual positions through the book. Returns
    /// `None` when there is nothing to do.
    pub fn maybe_liquidate_subaccount(
        &mut self,
        subaccount_id: &SubaccountId,
    ) -> Result<Option<LiquidationResult>, ClobError> {
        {
            let state = self.store.state();
            let Some(subaccount) = state.subaccounts.get(subaccount_id) else {
                return Ok(None);
            };
            if !crate::subaccounts::is_liquidatable(subaccount, state.perpetual_view())? {
                return Ok(None);
            }
        }

        let Some(order) = self.synthesize_liquidation_order(subaccount_id)? else {
            return Ok(None);
        };
        self.place_perpetual_liquidation(order).map(Some)
    }

    /// Runs all liquidatable subaccounts in deterministic id order.
    pub fn liquidate_subaccounts(&mut self) -> Result<Vec<LiquidationResult>, ClobError> {
        let ids: Vec<SubaccountId> = self.store.state().subaccounts.keys().cloned().collect();
        let mut results = Vec::new();
        for id in ids {
            if let Some(result) = self.maybe_liquidate_subaccount(&id)? {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Matches a synthesized liquidation order against the book. The order
    /// never rests: whatever does not fill is dropped.
    ///
    /// Panics if the same (subaccount, perpetual) was already liquidated in
    /// this block; the proposer is byzantine or the engine is broken.
    pub fn place_perpetual_liquidation(
        &mut self,
        order: LiquidationOrder,
    ) -> Result<LiquidationResult, ClobError> {
        self.transactional(|this| {
            let info = this.store.state().liquidation_info(&order.liquidated);
            if info.has_liquidated(order.perpetual_id) {
                panic!(
                    "subaccount {} has already liquidated perpetual {:?} in this block",
                    order.liquidated, order.perpetual_id
                );
            }
            this.store
                .state_mut()
                .liquidation_info
                .entry(order.liquidated.clone())
                .or_default()
                .perpetuals_liquidated
                .push(order.perpetual_id);

            let taker = MatchableOrder::Liquidation(order.clone());
            let outcome = this.run_match_loop(&taker)?;

            let status = match outcome.stop {
                MatchLoopStop::Deleveraging => {
                    this.emit(EventPayload::DeleveragingRequired(DeleveragingRequiredEvent {
                        subaccount_id: order.liquidated.clone(),
                        perpetual_id: order.perpetual_id,
                        insurance_fund_balance: this.store.state().insurance_fund_balance,
                    }));
                    LiquidationStatus::LiquidationRequiresDeleveraging
                }
                _ => LiquidationStatus::Success,
            };

            let fills: Vec<LiquidationFill> = outcome
                .fills
                .iter()
                .map(|f| LiquidationFill {
                    maker_order_id: f.maker_order_id.clone(),
                    fill_amount: f.fill_amount,
                })
                .collect();
            this.emit(EventPayload::Liquidation(LiquidationEvent {
                subaccount_id: order.liquidated.clone(),
                perpetual_id: order.perpetual_id,
                clob_pair_id: order.clob_pair_id,
                is_buy: order.side.is_buy(),
                total_size: order.quantums,
                fills,
                insurance_fund_delta: outcome.insurance_fund_delta,
            }));

            Ok(LiquidationResult {
                status,
                filled_quantums: outcome.filled,
            })
        })
    }

    /// Builds the liquidation order for a subaccount: position selection,
    /// size clamping, and fillable pricing. `None` when no perpetual is
    /// still eligible this block or the clamped size rounds to zero.
    pub fn synthesize_liquidation_order(
        &self,
        subaccount_id: &SubaccountId,
    ) -> Result<Option<LiquidationOrder>, ClobError> {
        let state = self.store.state();
        let Some(subaccount) = state.subaccounts.get(subaccount_id) else {
            return Ok(None);
        };

        // First position not yet liquidated this block, paired with the
        // first clob pair that trades it.
        let info = state.liquidation_info(subaccount_id);
        let mut candidate: Option<(PerpetualId, SignedQuantums, ClobPair)> = None;
        for (perpetual_id, position) in &subaccount.perpetual_positions {
            if info.has_liquidated(*perpetual_id) {
                continue;
            }
            if let Some(pair) = state
                .clob_pairs
                .values()
                .find(|p| p.perpetual_id == *perpetual_id)
            {
                candidate = Some((*perpetual_id, *position, pair.clone()));
                break;
            }
        }
        let Some((perpetual_id, position, clob_pair)) = candidate else {
            return Ok(None);
        };

        let quantums = self.liquidatable_quantums(subaccount, perpetual_id, &clob_pair)?;
        if quantums.is_zero() {
            return Ok(None);
        }

        let side = position
            .closing_side()
            .expect("a liquidatable position is nonzero");
        let subticks =
            self.fillable_price_subticks(subaccount, perpetual_id, &clob_pair, quantums)?;

        Ok(Some(LiquidationOrder {
            liquidated: subaccount_id.clone(),
            perpetual_id,
            clob_pair_id: clob_pair.id,
            side,
            quantums,
            subticks,
        }))
    }

    /// Size to close: at least the configured minimum notional (but never
    /// more than the position), at most the configured portion of the
    /// position, and clipped to the subaccount's remaining per-block
    /// notional. Rounded down to the step size.
    fn liquidatable_quantums(
        &self,
        subaccount: &Subaccount,
        perpetual_id: PerpetualId,
        clob_pair: &ClobPair,
    ) -> Result<BaseQuantums, ClobError> {
        let state = self.store.state();
        let config = &state.liquidations_config;
        let position = subaccount
            .perpetual_position(perpetual_id)
            .unwrap_or_else(SignedQuantums::zero);
        let abs_position = BigInt::from(position.abs());
        if position.is_zero() {
            return Ok(BaseQuantums(0));
        }

        let (perpetual, _, market) = state.perpetual_view().lookup(perpetual_id)?;
        // Quote quantums per base quantum at oracle price.
        let per_quantum = net_notional_rat(perpetual, market, 1);
        if !per_quantum.is_positive() {
            return Ok(BaseQuantums(0));
        }

        // Lower bound from the minimum notional, upper bound from the
        // portion ppm; the lower bound wins but never exceeds the position.
        let min_notional = BigRational::from_integer(BigInt::from(
            config.position_block_limits.min_position_notional_liquidated,
        ));
        let min_quantums = big_rat_ceil(&(min_notional / &per_quantum));
        let portion_quantums = big_int_mul_ppm(
            &abs_position,
            i64::from(config.position_block_limits.max_position_portion_liquidated_ppm),
        );
        let mut quantums = min_quantums.max(portion_quantums).min(abs_position.clone());

        // Remaining per-block notional for this subaccount.
        let info = state.liquidation_info(&subaccount.id);
        let max_notional = config.subaccount_block_limits.max_notional_liquidated;
        if info.notional_liquidated > max_notional {
            panic!(
                "liquidation exceeds subaccount max notional liquidated: {} > {} for {}",
                info.notional_liquidated, max_notional, subaccount.id
            );
        }
        let remaining_notional =
            BigRational::from_integer(BigInt::from(max_notional - info.notional_liquidated));
        let cap_quantums = big_rat_floor(&(remaining_notional / &per_quantum));
        quantums = quantums.min(cap_quantums);

        let step_value = clob_pair.step_base_quantums.value();
        let step = BigInt::from(step_value);
        let stepped = (&quantums / &step) * &step;
        let stepped =
            u64::try_from(&stepped).unwrap_or(u64::MAX - u64::MAX % step_value);
        Ok(BaseQuantums(stepped))
    }

    /// Quote quantums the subaccount's balance moves by if `delta_quantums`
    /// of the position closes exactly at bankruptcy, signed, rounded toward
    /// positive infinity:
    ///
    /// `bankruptcy = ceil(DNNV - (DMMR / TMMR) * TNC)`
    ///
    /// where DNNV/DMMR are the notional and maintenance requirement of the
    /// closed delta and TNC/TMMR are the subaccount totals.
    pub fn bankruptcy_price_quote_quantums(
        &self,
        subaccount_id: &SubaccountId,
        perpetual_id: PerpetualId,
        delta_quantums: i128,
    ) -> Result<BigInt, ClobError> {
        let state = self.store.state();
        let invalid_delta = || ClobError::InvalidPerpetualPositionSizeDelta {
            subaccount_id: subaccount_id.clone(),
            perpetual_id,
            delta: delta_quantums,
        };

        let subaccount = state
            .subaccounts
            .get(subaccount_id)
            .ok_or_else(invalid_delta)?;
        let position = subaccount
            .perpetual_position(perpetual_id)
            .ok_or_else(invalid_delta)?;

        // The delta must oppose the position and not overshoot it.
        if delta_quantums == 0
            || position.is_zero()
            || delta_quantums.signum() == position.signum()
            || delta_quantums.unsigned_abs() > position.abs()
        {
            return Err(invalid_delta());
        }

        let view = state.perpetual_view();
        let (perpetual, tier, market) = view.lookup(perpetual_id)?;
        let risk = risk_of(subaccount, view)?;

        // Notional of the closed amount, signed with the position.
        let dnnv = net_notional_rat(perpetual, market, -delta_quantums);
        let dmmr = margin_requirements(perpetual, tier, market, -delta_quantums).maintenance;

        let tnc = BigRational::from_integer(risk.net_collateral);
        let tmmr = &risk.maintenance_margin;
        let ratio = if tmmr.is_zero() {
            BigRational::one()
        } else {
            BigRational::new(dmmr, tmmr.clone())
        };

        Ok(big_rat_ceil(&(dnnv - ratio * tnc)))
    }

    /// Signed insurance-fund movement for one fill.
    ///
    /// `L` is the liquidated subaccount's quote delta at the fill price, `B`
    /// the same delta at bankruptcy. A surplus pays the fund up to the fee
    /// cap; a shortfall drains it in full.
    pub fn liquidation_insurance_fund_delta(
        &self,
        is_buy: bool,
        fill_quote_quantums: &BigInt,
        bankruptcy_quote_quantums: &BigInt,
    ) -> Result<BigInt, ClobError> {
        if !fill_quote_quantums.is_positive() {
            return Err(ClobError::InvalidQuantumsForInsuranceFundDeltaCalculation);
        }
        let max_fee_ppm = self.store.state().liquidations_config.max_liquidation_fee_ppm;

        let quote_delta = if is_buy {
            -fill_quote_quantums
        } else {
            fill_quote_quantums.clone()
        };
        let surplus = &quote_delta - bankruptcy_quote_quantums;
        if surplus.is_negative() {
            return Ok(surplus);
        }
        let fee_cap = big_int_mul_ppm(&quote_delta.abs(), i64::from(max_fee_ppm));
        Ok(surplus.min(fee_cap))
    }

    /// Stateful validation of one liquidation fill: bankruptcy pricing,
    /// per-block subaccount limits, and the deleveraging gate.
    ///
    /// Panics when the recorded per-block amounts already exceed their caps;
    /// that state cannot be produced by a valid block.
    pub(super) fn validate_matched_liquidation(
        &self,
        order: &LiquidationOrder,
        fill_amount: BaseQuantums,
        fill_quote_quantums: &BigInt,
    ) -> Result<LiquidationValidation, ClobError> {
        let is_buy = order.side.is_buy();
        let delta_quantums = if is_buy {
            i128::from(fill_amount.value())
        } else {
            -i128::from(fill_amount.value())
        };

        let bankruptcy = self.bankruptcy_price_quote_quantums(
            &order.liquidated,
            order.perpetual_id,
            delta_quantums,
        )?;
        let delta =
            self.liquidation_insurance_fund_delta(is_buy, fill_quote_quantums, &bankruptcy)?;

        let state = self.store.state();
        let config = &state.liquidations_config;
        let limits = &config.subaccount_block_limits;
        let info = state.liquidation_info(&order.liquidated);

        if info.notional_liquidated > limits.max_notional_liquidated {
            panic!(
                "liquidation exceeds subaccount max notional liquidated: {} > {} for {}",
                info.notional_liquidated, limits.max_notional_liquidated, order.liquidated
            );
        }
        if info.quantums_insurance_lost > limits.max_quantums_insurance_lost {
            panic!(
                "liquidation exceeds subaccount max insurance lost: {} > {} for {}",
                info.quantums_insurance_lost, limits.max_quantums_insurance_lost, order.liquidated
            );
        }

        let fill_notional = fill_quote_quantums.abs();
        let remaining_notional =
            BigInt::from(limits.max_notional_liquidated - info.notional_liquidated);
        if fill_notional > remaining_notional {
            return Ok(LiquidationValidation::BlockLimitReached);
        }

        if delta.is_negative() {
            let loss = delta.abs();
            let remaining_loss =
                BigInt::from(limits.max_quantums_insurance_lost - info.quantums_insurance_lost);
            if loss > remaining_loss {
                return Ok(LiquidationValidation::BlockLimitReached);
            }

            // The fund must stay solvent and above the deleveraging
            // threshold before it takes another loss.
            let balance = BigInt::from(state.insurance_fund_balance);
            let threshold =
                BigInt::from(config.max_insurance_fund_quantums_for_deleveraging);
            if balance < threshold || (&balance + &delta).is_negative() {
                info!(
                    subaccount = %order.liquidated,
                    perpetual = ?order.perpetual_id,
                    "insurance fund cannot absorb liquidation loss; deleveraging required"
                );
                return Ok(LiquidationValidation::RequiresDeleveraging);
            }
        }

        Ok(LiquidationValidation::Delta(delta))
    }

    /// Accumulates this block's liquidation damage after a successful fill.
    pub(super) fn record_liquidation_fill(
        &mut self,
        order: &LiquidationOrder,
        fill_quote_quantums: &BigInt,
        insurance_fund_delta: &BigInt,
    ) {
        let notional = u64::try_from(&fill_quote_quantums.abs()).unwrap_or_else(|_| {
            panic!("liquidation fill notional exceeds u64: {fill_quote_quantums}")
        });
        let lost = if insurance_fund_delta.is_negative() {
            u64::try_from(&insurance_fund_delta.abs()).unwrap_or_else(|_| {
                panic!("insurance fund loss exceeds u64: {insurance_fund_delta}")
            })
        } else {
            0
        };

        let info = self
            .store
            .state_mut()
            .liquidation_info
            .entry(order.liquidated.clone())
            .or_default();
        info.notional_liquidated = info
            .notional_liquidated
            .checked_add(notional)
            .unwrap_or_else(|| panic!("notional liquidated overflow for {}", order.liquidated));
        info.quantums_insurance_lost = info
            .quantums_insurance_lost
            .checked_add(lost)
            .unwrap_or_else(|| panic!("insurance lost overflow for {}", order.liquidated));
    }

    /// Price for the synthesized order:
    ///
    /// `fillable = oracle * (1 - sign(P) * spread)`
    /// `spread = max(mmr_ratio * spread_to_mmr_ratio, ba * sign(P) * (bankruptcy - oracle) / oracle)`
    ///
    /// clamped between the oracle and per-unit bankruptcy prices, then
    /// aligned to the pair's subtick grid (down for sells, up for buys).
    ///
    /// Panics on a negative fillable price.
    fn fillable_price_subticks(
        &self,
        subaccount: &Subaccount,
        perpetual_id: PerpetualId,
        clob_pair: &ClobPair,
        quantums: BaseQuantums,
    ) -> Result<Subticks, ClobError> {
        let state = self.store.state();
        let config = &state.liquidations_config.fillable_price_config;
        let view = state.perpetual_view();
        let (perpetual, tier, market) = view.lookup(perpetual_id)?;

        let position = subaccount
            .perpetual_position(perpetual_id)
            .unwrap_or_else(SignedQuantums::zero);
        let sign = BigRational::from_integer(BigInt::from(position.signum()));

        // Per-base-quantum prices, in quote quantums.
        let oracle_unit = net_notional_rat(perpetual, market, 1);
        let delta_quantums = if position.is_long() {
            -i128::from(quantums.value())
        } else {
            i128::from(quantums.value())
        };
        let bankruptcy_total = self.bankruptcy_price_quote_quantums(
            &subaccount.id,
            perpetual_id,
            delta_quantums,
        )?;
        // Per-unit price at bankruptcy: positive proceeds for longs, the
        // negated payment for shorts.
        let bankruptcy_unit =
            BigRational::new(bankruptcy_total, BigInt::from(quantums.value())) * &sign;

        // Maintenance margin ratio of the whole position.
        let notional = net_notional_rat(perpetual, market, position.value()).abs();
        let mmr = margin_requirements(perpetual, tier, market, position.value()).maintenance;
        let mmr_ratio = if notional.is_zero() {
            BigRational::zero()
        } else {
            BigRational::from_integer(mmr) / &notional
        };

        let million = BigRational::from_integer(BigInt::from(ONE_MILLION));
        let smmr =
            BigRational::from_integer(BigInt::from(config.spread_to_maintenance_margin_ratio_ppm))
                / &million;
        let ba = BigRational::from_integer(BigInt::from(config.bankruptcy_adjustment_ppm))
            / &million;

        let spread_mmr_term = mmr_ratio * smmr;
        let spread_bankruptcy_term =
            ba * &sign * (&bankruptcy_unit - &oracle_unit) / &oracle_unit;
        let spread = spread_mmr_term.max(spread_bankruptcy_term);

        let fillable = &oracle_unit * (BigRational::one() - &sign * spread);

        // Never cross bankruptcy: at least as unfavorable as oracle, no more
        // unfavorable than bankruptcy.
        let fillable = if position.is_long() {
            fillable
                .max(bankruptcy_unit.clone().min(oracle_unit.clone()))
                .min(oracle_unit)
        } else {
            fillable
                .min(bankruptcy_unit.clone().max(oracle_unit.clone()))
                .max(oracle_unit)
        };
        assert!(
            !fillable.is_negative(),
            "negative fillable price for {} in perpetual {:?}",
            subaccount.id,
            perpetual_id
        );

        // quote-per-base to subticks: divide out the conversion exponent.
        let subticks_rat = fillable
            / crate::math::big_mul_pow10(&BigInt::one(), clob_pair.quantum_conversion_exponent);
        Ok(clob_pair.aligned_subticks(&subticks_rat, position.is_short()))
    }
}
