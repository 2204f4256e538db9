//! Liquidation engine scenarios: bankruptcy pricing, fee caps, per-block
//! limits, and the deleveraging gate.

mod common;

use common::*;
use perp_clob_core::*;

fn liquidation_order(
    owner: &str,
    number: u32,
    clob_pair_id: ClobPairId,
    perpetual_id: PerpetualId,
    side: Side,
    quantums: u64,
    subticks: u64,
) -> LiquidationOrder {
    LiquidationOrder {
        liquidated: SubaccountId::new(owner, number),
        perpetual_id,
        clob_pair_id,
        side,
        quantums: BaseQuantums(quantums),
        subticks: Subticks(subticks),
    }
}

#[test]
fn liquidation_with_no_matching_orders_moves_nothing() {
    let mut engine = btc_engine();

    // 1 BTC long against -$46,000: TNC $4,000 < $5,000 maintenance.
    let dave = SubaccountId::new("Dave", 0);
    set_positions(
        &mut engine,
        &dave,
        -46_000_000_000,
        &[(BTC_PERP, ONE_BTC as i128)],
    );

    let order = liquidation_order("Dave", 0, BTC_CLOB, BTC_PERP, Side::Sell, ONE_BTC, BTC_SUBTICKS_50K);
    let result = engine.place_perpetual_liquidation(order).unwrap();

    assert_eq!(result.status, LiquidationStatus::Success);
    assert_eq!(result.filled_quantums, BaseQuantums(0));

    assert_eq!(engine.state().insurance_fund_balance, 0);
    assert_eq!(engine.state().fee_collector_balance, 0);
    assert_eq!(quote_balance(&engine, "Dave", 0), -46_000_000_000);
    assert_eq!(position(&engine, "Dave", 0, BTC_PERP), ONE_BTC as i128);

    // The perpetual is recorded for the block even with zero fills.
    let info = engine.state().liquidation_info(&dave);
    assert_eq!(info.perpetuals_liquidated, vec![BTC_PERP]);
    assert_eq!(info.notional_liquidated, 0);
    assert_eq!(info.quantums_insurance_lost, 0);
}

#[test]
fn liquidation_fill_above_bankruptcy_pays_capped_fee_to_insurance_fund() {
    let mut engine = btc_engine();

    // 0.1 BTC long against -$5,100: bankruptcy for the full close is
    // $5,100 (5_100_000_000 quote quantums).
    let dave = SubaccountId::new("Dave", 0);
    set_positions(
        &mut engine,
        &dave,
        -5_100_000_000,
        &[(BTC_PERP, 10_000_000)],
    );
    subaccount(&mut engine, "Carl", 0, 50_000_000_000);
    let total_before = total_quote_quantums(&engine);

    // Maker bids 0.1 BTC at $56,100, 10% above bankruptcy.
    let bid = order("Carl", 0, 0, BTC_CLOB, Side::Buy, 10_000_000, 56_100_000_000);
    assert!(place(&mut engine, bid).rested);

    let order = liquidation_order(
        "Dave",
        0,
        BTC_CLOB,
        BTC_PERP,
        Side::Sell,
        10_000_000,
        51_000_000_000,
    );
    let result = engine.place_perpetual_liquidation(order).unwrap();

    assert_eq!(result.status, LiquidationStatus::Success);
    assert_eq!(result.filled_quantums, BaseQuantums(10_000_000));

    // Fill quote is $5,610. Surplus over bankruptcy is $510, but the fund
    // only collects the 0.5% fee cap: min(28_050_000, 510_000_000).
    assert_eq!(engine.state().insurance_fund_balance, 28_050_000);

    // The liquidated account keeps the rest of the surplus and pays no
    // taker fee.
    assert_eq!(
        quote_balance(&engine, "Dave", 0),
        -5_100_000_000 + 5_610_000_000 - 28_050_000
    );
    assert_eq!(position(&engine, "Dave", 0, BTC_PERP), 0);

    // Maker pays the regular maker fee.
    assert_eq!(
        quote_balance(&engine, "Carl", 0),
        50_000_000_000 - 5_610_000_000 - 1_122_000
    );
    assert_eq!(position(&engine, "Carl", 0, BTC_PERP), 10_000_000);
    assert_eq!(engine.state().fee_collector_balance, 1_122_000);

    let info = engine.state().liquidation_info(&dave);
    assert_eq!(info.notional_liquidated, 5_610_000_000);
    assert_eq!(info.quantums_insurance_lost, 0);

    assert_eq!(total_quote_quantums(&engine), total_before);

    // The carried position never decreased in the wrong direction and the
    // subaccount ends above bankruptcy.
    assert!(quote_balance(&engine, "Dave", 0) > 0);
}

#[test]
fn second_liquidation_is_clipped_by_subaccount_notional_cap() {
    // ETH takes perpetual id 0 here so it liquidates first; BTC is id 1.
    let mut engine = Engine::new(State::default());
    engine.create_market(btc_market()).unwrap();
    engine.create_market(eth_market()).unwrap();
    engine.create_liquidity_tier(0, tier_20_10()).unwrap();
    engine.create_perpetual(eth_perpetual(PerpetualId(0))).unwrap();
    engine.create_perpetual(btc_perpetual(PerpetualId(1))).unwrap();
    engine
        .create_clob_pair(eth_clob_pair(ClobPairId(0), PerpetualId(0)))
        .unwrap();
    engine
        .create_clob_pair(btc_clob_pair(ClobPairId(1), PerpetualId(1)))
        .unwrap();
    let mut config = LiquidationsConfig::default();
    config.subaccount_block_limits.max_notional_liquidated = 10_000_000_000;
    engine.set_liquidations_config(config).unwrap();
    engine.begin_block(1, 1_000);

    // Carl: short 1 ETH ($3,000) and 1 BTC ($50,000) against $57,000.
    // TNC $4,000 < $5,300 maintenance.
    let carl = SubaccountId::new("Carl", 0);
    set_positions(
        &mut engine,
        &carl,
        57_000_000_000,
        &[
            (PerpetualId(0), -(ONE_ETH as i128)),
            (PerpetualId(1), -(ONE_BTC as i128)),
        ],
    );
    subaccount(&mut engine, "Dave", 0, 200_000_000_000);

    // Asks on both books at oracle.
    assert!(place(
        &mut engine,
        order("Dave", 0, 0, ClobPairId(0), Side::Sell, ONE_ETH, ETH_SUBTICKS_3K),
    )
    .rested);
    assert!(place(
        &mut engine,
        order("Dave", 0, 1, ClobPairId(1), Side::Sell, ONE_BTC, BTC_SUBTICKS_50K),
    )
    .rested);

    // First pass closes the whole ETH short: $3,000 notional.
    let first = engine.maybe_liquidate_subaccount(&carl).unwrap().unwrap();
    assert_eq!(first.status, LiquidationStatus::Success);
    assert_eq!(first.filled_quantums, BaseQuantums(ONE_ETH));
    assert_eq!(position(&engine, "Carl", 0, PerpetualId(0)), 0);
    assert_eq!(
        engine.state().liquidation_info(&carl).notional_liquidated,
        3_000_000_000
    );

    // Second pass: the BTC candidate is clipped to the remaining $7,000 of
    // the $10,000 per-block cap, i.e. 0.14 BTC at the step size.
    let second = engine.maybe_liquidate_subaccount(&carl).unwrap().unwrap();
    assert_eq!(second.status, LiquidationStatus::Success);
    assert_eq!(second.filled_quantums, BaseQuantums(14_000_000));
    assert_eq!(
        position(&engine, "Carl", 0, PerpetualId(1)),
        -(ONE_BTC as i128) + 14_000_000
    );

    let info = engine.state().liquidation_info(&carl);
    assert_eq!(info.notional_liquidated, 10_000_000_000);
    assert!(info.notional_liquidated <= 10_000_000_000);
    assert_eq!(info.perpetuals_liquidated, vec![PerpetualId(0), PerpetualId(1)]);

    // Both perpetuals are spent for this block; a third pass is a no-op.
    assert!(engine.maybe_liquidate_subaccount(&carl).unwrap().is_none());
}

#[test]
fn liquidation_stops_when_deleveraging_is_required() {
    let mut engine = btc_engine();
    let mut config = LiquidationsConfig::default();
    config.max_insurance_fund_quantums_for_deleveraging = 750_001;
    engine.set_liquidations_config(config).unwrap();
    engine.fund_insurance(1_000_000);

    // Carl: short 1 BTC against $50,499. TNC $499 < $5,000 maintenance,
    // and closing at $50,500 loses $1 overall.
    let carl = SubaccountId::new("Carl", 0);
    set_positions(
        &mut engine,
        &carl,
        50_499_000_000,
        &[(BTC_PERP, -(ONE_BTC as i128))],
    );
    let dave = SubaccountId::new("Dave", 0);
    set_positions(
        &mut engine,
        &dave,
        50_000_000_000,
        &[(BTC_PERP, ONE_BTC as i128)],
    );

    // Two asks at $50,500; the smaller one has time priority.
    assert!(place(
        &mut engine,
        order("Dave", 0, 0, BTC_CLOB, Side::Sell, 25_000_000, 50_500_000_000),
    )
    .rested);
    assert!(place(
        &mut engine,
        order("Dave", 0, 1, BTC_CLOB, Side::Sell, ONE_BTC, 50_500_000_000),
    )
    .rested);

    let order = liquidation_order(
        "Carl",
        0,
        BTC_CLOB,
        BTC_PERP,
        Side::Buy,
        ONE_BTC,
        50_500_000_000,
    );
    let result = engine.place_perpetual_liquidation(order).unwrap();

    // First fill loses $0.25 with the fund at $1.00 (above the threshold),
    // so it lands. The second fill finds the fund at $0.75, below the
    // 750_001 threshold: deleveraging instead.
    assert_eq!(result.status, LiquidationStatus::LiquidationRequiresDeleveraging);
    assert_eq!(result.filled_quantums, BaseQuantums(25_000_000));

    assert_eq!(engine.state().insurance_fund_balance, 750_000);
    assert_eq!(position(&engine, "Carl", 0, BTC_PERP), -75_000_000);

    let info = engine.state().liquidation_info(&carl);
    assert_eq!(info.notional_liquidated, 12_625_000_000);
    assert_eq!(info.quantums_insurance_lost, 250_000);

    // Only the first fill is persisted, and the fund never went negative.
    assert!(engine.state().insurance_fund_balance >= 0);
    assert!(engine
        .events()
        .events()
        .iter()
        .any(|e| matches!(e.payload, EventPayload::DeleveragingRequired(_))));
}

#[test]
fn bankruptcy_price_vectors() {
    let mut engine = btc_engine();
    let alice = SubaccountId::new("Alice", 0);

    // Fully closing a long slightly below maintenance margin.
    set_positions(&mut engine, &alice, -4_501_000_000, &[(BTC_PERP, 10_000_000)]);
    assert_eq!(
        engine
            .bankruptcy_price_quote_quantums(&alice, BTC_PERP, -10_000_000)
            .unwrap(),
        num_bigint::BigInt::from(4_501_000_000i64)
    );

    // Fully closing a short slightly below maintenance margin.
    set_positions(&mut engine, &alice, 5_499_000_000, &[(BTC_PERP, -10_000_000)]);
    assert_eq!(
        engine
            .bankruptcy_price_quote_quantums(&alice, BTC_PERP, 10_000_000)
            .unwrap(),
        num_bigint::BigInt::from(-5_499_000_000i64)
    );

    // Partial close exactly at the bankruptcy price is pro-rata.
    set_positions(&mut engine, &alice, -5_000_000_000, &[(BTC_PERP, 10_000_000)]);
    assert_eq!(
        engine
            .bankruptcy_price_quote_quantums(&alice, BTC_PERP, -5_000_000)
            .unwrap(),
        num_bigint::BigInt::from(2_500_000_000i64)
    );

    // Rounds toward positive infinity: 2,775.11 becomes 2,776 for the
    // long and -2,775 for the mirrored short.
    set_positions(&mut engine, &alice, -13_000_000, &[(BTC_PERP, ONE_BTC as i128)]);
    assert_eq!(
        engine
            .bankruptcy_price_quote_quantums(&alice, BTC_PERP, -21_347)
            .unwrap(),
        num_bigint::BigInt::from(2_776)
    );
    set_positions(&mut engine, &alice, 13_000_000, &[(BTC_PERP, -(ONE_BTC as i128))]);
    assert_eq!(
        engine
            .bankruptcy_price_quote_quantums(&alice, BTC_PERP, 21_347)
            .unwrap(),
        num_bigint::BigInt::from(-2_775)
    );

    // A long whose quote balance exceeds its notional has a negative
    // bankruptcy price.
    set_positions(&mut engine, &alice, 1_000_000, &[(BTC_PERP, ONE_BTC as i128)]);
    assert_eq!(
        engine
            .bankruptcy_price_quote_quantums(&alice, BTC_PERP, -(ONE_BTC as i128))
            .unwrap(),
        num_bigint::BigInt::from(-1_000_000)
    );
}

#[test]
fn bankruptcy_price_rejects_invalid_deltas() {
    let mut engine = btc_engine();
    let alice = SubaccountId::new("Alice", 0);
    set_positions(&mut engine, &alice, -4_501_000_000, &[(BTC_PERP, 10_000_000)]);

    // Zero delta.
    assert!(matches!(
        engine.bankruptcy_price_quote_quantums(&alice, BTC_PERP, 0),
        Err(ClobError::InvalidPerpetualPositionSizeDelta { .. })
    ));
    // Delta with the position's own sign.
    assert!(matches!(
        engine.bankruptcy_price_quote_quantums(&alice, BTC_PERP, 10_000_000),
        Err(ClobError::InvalidPerpetualPositionSizeDelta { .. })
    ));
    // Delta larger than the position.
    assert!(matches!(
        engine.bankruptcy_price_quote_quantums(&alice, BTC_PERP, -10_000_001),
        Err(ClobError::InvalidPerpetualPositionSizeDelta { .. })
    ));
    // No position in that perpetual.
    let bob = SubaccountId::new("Bob", 0);
    set_positions(&mut engine, &bob, -4_501_000_000, &[]);
    assert!(matches!(
        engine.bankruptcy_price_quote_quantums(&bob, BTC_PERP, -10_000_000),
        Err(ClobError::InvalidPerpetualPositionSizeDelta { .. })
    ));
}

#[test]
fn full_close_bankruptcy_equals_negated_quote_balance() {
    // With a single position, closing everything at bankruptcy leaves the
    // quote balance at exactly zero.
    let mut engine = btc_engine();
    let alice = SubaccountId::new("Alice", 0);
    set_positions(&mut engine, &alice, -46_000_000_000, &[(BTC_PERP, ONE_BTC as i128)]);

    let bankruptcy = engine
        .bankruptcy_price_quote_quantums(&alice, BTC_PERP, -(ONE_BTC as i128))
        .unwrap();
    assert_eq!(bankruptcy, num_bigint::BigInt::from(46_000_000_000i64));
}

#[test]
fn subaccount_with_only_debt_is_not_liquidatable() {
    let mut engine = btc_engine();
    let alice = SubaccountId::new("Alice", 0);
    set_positions(&mut engine, &alice, -1_000_000_000, &[]);

    assert!(engine.maybe_liquidate_subaccount(&alice).unwrap().is_none());
    assert_eq!(quote_balance(&engine, "Alice", 0), -1_000_000_000);
}

#[test]
#[should_panic(expected = "has already liquidated perpetual")]
fn repeat_liquidation_of_same_perpetual_in_block_panics() {
    let mut engine = btc_engine();
    set_positions(
        &mut engine,
        &SubaccountId::new("Dave", 0),
        -46_000_000_000,
        &[(BTC_PERP, ONE_BTC as i128)],
    );

    let order = liquidation_order("Dave", 0, BTC_CLOB, BTC_PERP, Side::Sell, ONE_BTC, BTC_SUBTICKS_50K);
    engine.place_perpetual_liquidation(order.clone()).unwrap();
    engine.place_perpetual_liquidation(order).unwrap();
}

#[test]
fn block_boundary_resets_liquidation_tracking() {
    let mut engine = btc_engine();
    let dave = SubaccountId::new("Dave", 0);
    set_positions(
        &mut engine,
        &dave,
        -46_000_000_000,
        &[(BTC_PERP, ONE_BTC as i128)],
    );

    let order = liquidation_order("Dave", 0, BTC_CLOB, BTC_PERP, Side::Sell, ONE_BTC, BTC_SUBTICKS_50K);
    engine.place_perpetual_liquidation(order.clone()).unwrap();
    assert!(engine.state().liquidation_info(&dave).has_liquidated(BTC_PERP));

    engine.end_block();
    engine.begin_block(2, 2_000);
    assert!(!engine.state().liquidation_info(&dave).has_liquidated(BTC_PERP));

    // The same perpetual may liquidate again in the new block.
    engine.place_perpetual_liquidation(order).unwrap();
}
