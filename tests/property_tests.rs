//! Property-based tests for the engine invariants.
//!
//! These verify conservation, grid alignment, and the price-update sqrt
//! rule under random inputs.

mod common;

use common::*;
use perp_clob_core::*;
use num_bigint::BigInt;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn subticks_strategy() -> impl Strategy<Value = u64> {
    // $40,000..$60,000 on the BTC grid (multiples of 10_000 subticks).
    (4_000_000u64..6_000_000u64).prop_map(|t| t * 10_000)
}

fn quantums_strategy() -> impl Strategy<Value = u64> {
    // 0.00001 .. 0.1 BTC in step multiples.
    (100u64..1_000_000u64).prop_map(|q| q * 10)
}

proptest! {
    /// Quote quantums are conserved across arbitrary order flow: whatever
    /// subaccounts lose, fees and the insurance fund gain.
    #[test]
    fn matching_conserves_quote_quantums(
        orders in proptest::collection::vec(
            (any::<bool>(), quantums_strategy(), subticks_strategy()),
            1..20,
        ),
    ) {
        let mut engine = btc_engine();
        for number in 0..4 {
            subaccount(&mut engine, "Trader", number, 10_000_000_000_000);
        }
        let total_before = total_quote_quantums(&engine);

        for (i, (is_buy, quantums, subticks)) in orders.iter().enumerate() {
            let side = if *is_buy { Side::Buy } else { Side::Sell };
            let number = (i % 4) as u32;
            let _ = engine.place_order(&MsgPlaceOrder {
                order: order("Trader", number, i as u32, BTC_CLOB, side, *quantums, *subticks),
            });
        }

        prop_assert_eq!(total_quote_quantums(&engine), total_before);
    }

    /// Every recorded fill is step-aligned and bounded by its order size;
    /// every resting order sits on the subtick grid.
    #[test]
    fn fills_and_resting_orders_stay_on_grid(
        orders in proptest::collection::vec(
            (any::<bool>(), quantums_strategy(), subticks_strategy()),
            1..20,
        ),
    ) {
        let mut engine = btc_engine();
        for number in 0..4 {
            subaccount(&mut engine, "Trader", number, 10_000_000_000_000);
        }

        let mut placed = Vec::new();
        for (i, (is_buy, quantums, subticks)) in orders.iter().enumerate() {
            let side = if *is_buy { Side::Buy } else { Side::Sell };
            let number = (i % 4) as u32;
            let o = order("Trader", number, i as u32, BTC_CLOB, side, *quantums, *subticks);
            if engine.place_order(&MsgPlaceOrder { order: o.clone() }).is_ok() {
                placed.push(o);
            }
        }

        for o in &placed {
            let fill = engine.state().order_fill_amount(&o.id);
            prop_assert!(fill.filled_quantums <= o.quantums);
            prop_assert_eq!(fill.filled_quantums.value() % 10, 0);
        }
        for side in [Side::Buy, Side::Sell] {
            for resting in engine.memclob().orders(BTC_CLOB, side).unwrap() {
                prop_assert_eq!(resting.order.subticks.value() % 10_000, 0);
            }
        }
    }

    /// Accepted crossing updates beyond one tick always satisfy
    /// new_delta^2 * 1e6 <= old_delta * tick_size_ppm.
    #[test]
    fn accepted_crossing_updates_respect_sqrt_bound(
        old_price in 1_000u64..1_000_000u64,
        index_price in 1_000u64..1_000_000u64,
        new_price in 1_000u64..1_000_000u64,
    ) {
        let market = Market {
            id: MarketId(0),
            pair: "TEST-0".to_string(),
            exponent: -5,
            min_price_change_ppm: 10_000, // 1%
            price: old_price,
            exchanges: BTreeSet::from([0]),
            min_exchanges: 1,
        };

        if validate_price_update(&market, index_price, new_price).is_ok() {
            let old_delta = BigInt::from(old_price.abs_diff(index_price));
            let new_delta = BigInt::from(new_price.abs_diff(index_price));
            let tick_size_ppm = BigInt::from(old_price) * BigInt::from(10_000u32);
            let crossing = index_price < old_price.max(new_price)
                && index_price > old_price.min(new_price);
            let beyond_one_tick = &old_delta * BigInt::from(1_000_000u32) > tick_size_ppm;

            if crossing && beyond_one_tick {
                prop_assert!(
                    &new_delta * &new_delta * BigInt::from(1_000_000u32)
                        <= old_delta * tick_size_ppm,
                    "accepted crossing update violates the sqrt bound",
                );
            }
        }
    }

    /// Closing an entire single position at bankruptcy returns exactly the
    /// negated quote balance: the account lands on zero.
    #[test]
    fn full_close_bankruptcy_zeroes_the_account(
        quote in -60_000_000_000i128..-40_000_000_000i128,
        position in 1_000_000i128..200_000_000i128,
    ) {
        let mut engine = btc_engine();
        let alice = SubaccountId::new("Alice", 0);
        set_positions(&mut engine, &alice, quote, &[(BTC_PERP, position)]);

        let bankruptcy = engine
            .bankruptcy_price_quote_quantums(&alice, BTC_PERP, -position)
            .unwrap();
        prop_assert_eq!(bankruptcy, BigInt::from(-quote));
    }

    /// The insurance fund never goes negative: a liquidation that cannot
    /// be absorbed reports deleveraging instead of draining it.
    #[test]
    fn insurance_fund_stays_solvent(
        fund in 0i128..2_000_000i128,
        maker_price_offset in 0u64..200u64,
    ) {
        let mut engine = btc_engine();
        engine.fund_insurance(fund);

        // Carl shorts 1 BTC against barely-enough collateral; the book
        // offers at up to $52,000, which can push him past bankruptcy.
        set_positions(
            &mut engine,
            &SubaccountId::new("Carl", 0),
            50_499_000_000,
            &[(BTC_PERP, -(ONE_BTC as i128))],
        );
        set_positions(
            &mut engine,
            &SubaccountId::new("Dave", 0),
            200_000_000_000,
            &[(BTC_PERP, ONE_BTC as i128)],
        );
        let ask = 50_000_000_000 + maker_price_offset * 10_000_000;
        let _ = engine.place_order(&MsgPlaceOrder {
            order: order("Dave", 0, 0, BTC_CLOB, Side::Sell, ONE_BTC, ask),
        });

        let liquidation = LiquidationOrder {
            liquidated: SubaccountId::new("Carl", 0),
            perpetual_id: BTC_PERP,
            clob_pair_id: BTC_CLOB,
            side: Side::Buy,
            quantums: BaseQuantums(ONE_BTC),
            subticks: Subticks(52_000_000_000),
        };
        let _ = engine.place_perpetual_liquidation(liquidation);

        prop_assert!(engine.state().insurance_fund_balance >= 0);
    }
}
