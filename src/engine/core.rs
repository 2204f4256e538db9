//! The engine: one block context over the store, the memclob, and the event
//! stream.
//!
//! Single-threaded by construction. Every handler runs to completion inside
//! a store transaction paired with a memclob undo scope, so a failed handler
//! leaves no trace in either.

use crate::clob::{ClobPair, ClobPairConfigError, Memclob};
use crate::config::LiquidationsConfig;
use crate::events::{EventManager, EventPayload, OffchainUpdate, OffchainUpdates, OrderRemoveReason};
use crate::msgs::{MarketPriceUpdate, UpdateMarketPricesRequest};
use crate::perpetuals::{LiquidityTier, Perpetual, PerpetualsError};
use crate::prices::{median_price, validate_price_update, Market, PricesError};
use crate::state::{State, StateStore};
use crate::types::MarketId;
use tracing::debug;

pub struct Engine {
    pub(super) store: StateStore,
    pub(super) memclob: Memclob,
    pub(super) events: EventManager,
    pub(super) block_height: u32,
    pub(super) block_time: u64,
}

impl Engine {
    /// Builds an engine over genesis state. Books are created for every
    /// known clob pair.
    pub fn new(genesis: State) -> Self {
        let mut memclob = Memclob::new();
        for id in genesis.clob_pairs.keys() {
            memclob.create_book(*id);
        }
        Self {
            store: StateStore::new(genesis),
            memclob,
            events: EventManager::new(),
            block_height: 0,
            block_time: 0,
        }
    }

    pub fn state(&self) -> &State {
        self.store.state()
    }

    /// Direct state access for genesis wiring and test setup.
    pub fn state_mut(&mut self) -> &mut State {
        self.store.state_mut()
    }

    pub fn memclob(&self) -> &Memclob {
        &self.memclob
    }

    pub fn events(&self) -> &EventManager {
        &self.events
    }

    pub fn block_height(&self) -> u32 {
        self.block_height
    }

    pub fn block_time(&self) -> u64 {
        self.block_time
    }

    /// Starts a block: per-block liquidation tracking resets here.
    pub fn begin_block(&mut self, height: u32, time: u64) {
        self.block_height = height;
        self.block_time = time;
        self.store.state_mut().liquidation_info.clear();
    }

    /// Ends a block: prunes fill state that has aged out and expires orders
    /// whose good-til has passed.
    pub fn end_block(&mut self) -> OffchainUpdates {
        let mut updates = OffchainUpdates::new();
        let height = self.block_height;
        let time = self.block_time;

        let pruned = self.store.state_mut().prune_order_fills(height);
        if !pruned.is_empty() {
            debug!(height, count = pruned.len(), "pruned order fill state");
        }

        // Short-term orders: valid through their good-til-block.
        for order_id in self.memclob.expired_short_term_orders(height + 1) {
            self.memclob.remove_order(&order_id);
            updates.add(OffchainUpdate::OrderRemove {
                order_id,
                reason: OrderRemoveReason::Expired,
            });
        }

        // Stateful orders: valid while good-til-time is in the future.
        let expired: Vec<_> = self
            .store
            .state()
            .stateful_orders
            .iter()
            .filter(|(_, placement)| {
                placement.order.good_til_time().is_some_and(|t| t <= time)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for order_id in expired {
            self.store.state_mut().stateful_orders.remove(&order_id);
            self.memclob.remove_order(&order_id);
            updates.add(OffchainUpdate::OrderRemove {
                order_id,
                reason: OrderRemoveReason::Expired,
            });
        }

        updates
    }

    pub(super) fn emit(&mut self, payload: EventPayload) {
        let height = self.block_height;
        self.events.emit(height, payload);
    }

    /// Runs `f` inside a store transaction mirrored by a memclob undo scope.
    pub(super) fn transactional<T, E>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E> {
        self.store.begin_tx();
        self.memclob.begin_scope();
        match f(self) {
            Ok(value) => {
                self.memclob.commit_scope();
                self.store.commit_tx();
                Ok(value)
            }
            Err(err) => {
                self.memclob.revert_scope();
                self.store.revert_tx();
                Err(err)
            }
        }
    }

    // 9.1: governance-shaped setup. markets, perpetuals, tiers, and clob
    // pairs are created here and never deleted.

    pub fn create_market(&mut self, market: Market) -> Result<MarketId, PricesError> {
        market.validate()?;
        let id = market.id;
        self.store.state_mut().markets.insert(id, market);
        Ok(id)
    }

    pub fn create_liquidity_tier(
        &mut self,
        id: u32,
        tier: LiquidityTier,
    ) -> Result<(), PerpetualsError> {
        tier.validate()?;
        self.store.state_mut().liquidity_tiers.insert(id, tier);
        Ok(())
    }

    pub fn create_perpetual(&mut self, perpetual: Perpetual) -> Result<(), PerpetualsError> {
        perpetual.validate()?;
        self.store
            .state_mut()
            .perpetuals
            .insert(perpetual.id, perpetual);
        Ok(())
    }

    pub fn create_clob_pair(&mut self, clob_pair: ClobPair) -> Result<(), ClobPairConfigError> {
        clob_pair.validate()?;
        let id = clob_pair.id;
        self.store.state_mut().clob_pairs.insert(id, clob_pair);
        self.memclob.create_book(id);
        Ok(())
    }

    pub fn set_liquidations_config(
        &mut self,
        config: LiquidationsConfig,
    ) -> Result<(), crate::config::LiquidationsConfigError> {
        config.validate()?;
        self.store.state_mut().liquidations_config = config;
        Ok(())
    }

    pub fn fund_insurance(&mut self, quantums: i128) {
        self.store.state_mut().insurance_fund_balance += quantums;
    }

    pub fn set_withdrawals_blocked(&mut self, blocked: bool) {
        self.store.state_mut().withdrawals_blocked = blocked;
    }

    // 9.2: the price daemon's single entry point. each market's exchange
    // prices are medianed, then run through the admission rules; a rejected
    // market does not abort the batch.

    pub fn update_market_prices(&mut self, request: &UpdateMarketPricesRequest) -> Vec<Result<(), PricesError>> {
        request
            .market_price_updates
            .iter()
            .map(|update| self.apply_market_price_update(update))
            .collect()
    }

    fn apply_market_price_update(&mut self, update: &MarketPriceUpdate) -> Result<(), PricesError> {
        let state = self.store.state_mut();
        let market = state
            .markets
            .get(&update.market_id)
            .ok_or(PricesError::UnknownMarket(update.market_id))?;

        let reported: Vec<u64> = update
            .exchange_prices
            .iter()
            .filter(|p| market.exchanges.contains(&p.exchange_feed_id))
            .map(|p| p.price)
            .collect();
        if reported.len() < market.min_exchanges as usize {
            return Err(PricesError::InvalidMarketParams {
                market_id: update.market_id,
                reason: "not enough exchange reports",
            });
        }
        let Some(new_price) = median_price(&reported) else {
            return Err(PricesError::InvalidMarketParams {
                market_id: update.market_id,
                reason: "no exchange reports",
            });
        };

        // The very first price bypasses the admission rules; there is no
        // previous price to gate against.
        if market.price != 0 {
            let index_price = state
                .index_prices
                .get(&update.market_id)
                .copied()
                .unwrap_or(new_price);
            if let Err(err) = validate_price_update(market, index_price, new_price) {
                debug!(market = ?update.market_id, %err, "rejected price update");
                return Err(err);
            }
        }

        if let Some(market) = state.markets.get_mut(&update.market_id) {
            market.price = new_price;
        }
        Ok(())
    }

    /// Daemon-supplied index price, stored without touching the oracle price.
    pub fn set_index_price(&mut self, market_id: MarketId, price: u64) {
        self.store.state_mut().index_prices.insert(market_id, price);
    }
}
