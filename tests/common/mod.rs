//! Shared fixtures for the integration suites.
//!
//! Mirrors a two-market setup: a BTC perpetual at $50,000 and an ETH
//! perpetual at $3,000, both on a 20% initial / 10% maintenance tier.

#![allow(dead_code)]

use perp_clob_core::*;
use std::collections::BTreeSet;

pub const BTC_MARKET: MarketId = MarketId(0);
pub const ETH_MARKET: MarketId = MarketId(1);
pub const BTC_PERP: PerpetualId = PerpetualId(0);
pub const ETH_PERP: PerpetualId = PerpetualId(1);
pub const BTC_CLOB: ClobPairId = ClobPairId(0);
pub const ETH_CLOB: ClobPairId = ClobPairId(1);

/// $50,000 at exponent -5.
pub const BTC_PRICE: u64 = 5_000_000_000;
/// $3,000 at exponent -6.
pub const ETH_PRICE: u64 = 3_000_000_000;

/// 1 BTC in base quantums (atomic resolution -8).
pub const ONE_BTC: u64 = 100_000_000;
/// 1 ETH in base quantums (atomic resolution -9).
pub const ONE_ETH: u64 = 1_000_000_000;

/// $50,000 on the BTC subtick grid.
pub const BTC_SUBTICKS_50K: u64 = 50_000_000_000;
/// $3,000 on the ETH subtick grid.
pub const ETH_SUBTICKS_3K: u64 = 3_000_000_000;

pub fn btc_market() -> Market {
    Market {
        id: BTC_MARKET,
        pair: "BTC-USD".to_string(),
        exponent: -5,
        min_price_change_ppm: 50,
        price: BTC_PRICE,
        exchanges: BTreeSet::from([0, 1]),
        min_exchanges: 1,
    }
}

pub fn eth_market() -> Market {
    Market {
        id: ETH_MARKET,
        pair: "ETH-USD".to_string(),
        exponent: -6,
        min_price_change_ppm: 50,
        price: ETH_PRICE,
        exchanges: BTreeSet::from([0, 1]),
        min_exchanges: 1,
    }
}

pub fn tier_20_10() -> LiquidityTier {
    LiquidityTier {
        initial_margin_ppm: 200_000,
        maintenance_fraction_ppm: 500_000,
        base_position_notional: 1_000_000_000_000_000,
    }
}

pub fn btc_perpetual(id: PerpetualId) -> Perpetual {
    Perpetual {
        id,
        market_id: BTC_MARKET,
        atomic_resolution: -8,
        default_funding_ppm: 0,
        liquidity_tier: 0,
        funding_index: 0,
    }
}

pub fn eth_perpetual(id: PerpetualId) -> Perpetual {
    Perpetual {
        id,
        market_id: ETH_MARKET,
        atomic_resolution: -9,
        default_funding_ppm: 0,
        liquidity_tier: 0,
        funding_index: 0,
    }
}

pub fn btc_clob_pair(id: ClobPairId, perpetual_id: PerpetualId) -> ClobPair {
    ClobPair {
        id,
        perpetual_id,
        step_base_quantums: BaseQuantums(10),
        min_order_base_quantums: BaseQuantums(10),
        quantum_conversion_exponent: -8,
        subticks_per_tick: 10_000,
        maker_fee_ppm: 200,
        taker_fee_ppm: 500,
        status: ClobPairStatus::Active,
    }
}

pub fn eth_clob_pair(id: ClobPairId, perpetual_id: PerpetualId) -> ClobPair {
    ClobPair {
        id,
        perpetual_id,
        step_base_quantums: BaseQuantums(1_000),
        min_order_base_quantums: BaseQuantums(1_000),
        quantum_conversion_exponent: -9,
        subticks_per_tick: 1_000,
        maker_fee_ppm: 200,
        taker_fee_ppm: 500,
        status: ClobPairStatus::Active,
    }
}

/// Engine with the BTC market only, no fees waived, default liquidation
/// config with no block limits.
pub fn btc_engine() -> Engine {
    let mut engine = Engine::new(State::default());
    engine.create_market(btc_market()).unwrap();
    engine.create_liquidity_tier(0, tier_20_10()).unwrap();
    engine.create_perpetual(btc_perpetual(BTC_PERP)).unwrap();
    engine.create_clob_pair(btc_clob_pair(BTC_CLOB, BTC_PERP)).unwrap();
    engine.begin_block(1, 1_000);
    engine
}

pub fn subaccount(engine: &mut Engine, owner: &str, number: u32, quote: i128) -> SubaccountId {
    let id = SubaccountId::new(owner, number);
    set_positions(engine, &id, quote, &[]);
    id
}

/// Writes a subaccount directly into state, the way genesis would.
pub fn set_positions(
    engine: &mut Engine,
    id: &SubaccountId,
    quote: i128,
    perpetuals: &[(PerpetualId, i128)],
) {
    let mut account = Subaccount::new(id.clone());
    if quote != 0 {
        account.asset_positions.insert(QUOTE_ASSET_ID, quote);
    }
    for (perpetual_id, quantums) in perpetuals {
        if *quantums != 0 {
            account
                .perpetual_positions
                .insert(*perpetual_id, SignedQuantums::new(*quantums));
        }
    }
    engine
        .state_mut()
        .subaccounts
        .insert(id.clone(), account);
}

pub fn order(
    owner: &str,
    number: u32,
    client_id: u32,
    clob_pair_id: ClobPairId,
    side: Side,
    quantums: u64,
    subticks: u64,
) -> Order {
    Order {
        id: OrderId {
            subaccount_id: SubaccountId::new(owner, number),
            client_id,
            clob_pair_id,
            flags: OrderFlags::ShortTerm,
        },
        side,
        quantums: BaseQuantums(quantums),
        subticks: Subticks(subticks),
        time_in_force: TimeInForce::GoodTilTime,
        good_til: GoodTil::Block(10),
        reduce_only: false,
    }
}

pub fn place(engine: &mut Engine, order: Order) -> PlaceOrderResult {
    engine
        .place_order(&MsgPlaceOrder { order })
        .expect("order placement failed")
        .0
}

pub fn quote_balance(engine: &Engine, owner: &str, number: u32) -> i128 {
    engine
        .state()
        .subaccounts
        .get(&SubaccountId::new(owner, number))
        .map(|s| s.quote_balance())
        .unwrap_or(0)
}

pub fn position(engine: &Engine, owner: &str, number: u32, perpetual_id: PerpetualId) -> i128 {
    engine
        .state()
        .subaccounts
        .get(&SubaccountId::new(owner, number))
        .and_then(|s| s.perpetual_position(perpetual_id))
        .map(|p| p.value())
        .unwrap_or(0)
}

/// Sum of all quote quantums in the system: subaccounts, insurance fund,
/// and fee collector. Constant across matches.
pub fn total_quote_quantums(engine: &Engine) -> i128 {
    let state = engine.state();
    let subaccount_total: i128 = state.subaccounts.values().map(|s| s.quote_balance()).sum();
    subaccount_total + state.insurance_fund_balance + state.fee_collector_balance
}
