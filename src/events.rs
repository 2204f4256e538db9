// 11.0: every state change produces an event. delivery is someone else's job;
// the engine only guarantees the stream is complete and deterministic.

use crate::clob::{Order, OrderId};
use crate::types::{BaseQuantums, ClobPairId, PerpetualId, SubaccountId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub block_height: u32,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    Liquidation(LiquidationEvent),
    DeleveragingRequired(DeleveragingRequiredEvent),

    // Funding interface only; emission is owned by the funding module.
    FundingRateUpdate(FundingRateUpdateEvent),
    FundingPremiumSample(FundingPremiumSampleEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationFill {
    pub maker_order_id: OrderId,
    pub fill_amount: BaseQuantums,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub subaccount_id: SubaccountId,
    pub perpetual_id: PerpetualId,
    pub clob_pair_id: ClobPairId,
    pub is_buy: bool,
    pub total_size: BaseQuantums,
    pub fills: Vec<LiquidationFill>,
    /// Signed: positive means the fund collected a fee, negative means it
    /// covered a shortfall.
    pub insurance_fund_delta: i128,
}

/// Emitted when a liquidation cannot proceed without socializing losses.
/// The deleveraging module consumes this; the engine only raises it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleveragingRequiredEvent {
    pub subaccount_id: SubaccountId,
    pub perpetual_id: PerpetualId,
    pub insurance_fund_balance: i128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRateUpdateEvent {
    pub perpetual_id: PerpetualId,
    pub rate_ppm: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingPremiumSampleEvent {
    pub perpetual_id: PerpetualId,
    pub premium_ppm: i32,
}

// 11.1: off-chain indexer channel. place/update/remove per order, batched per
// handler and handed to the dispatcher after commit.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffchainUpdate {
    OrderPlace {
        order: Order,
    },
    OrderUpdate {
        order_id: OrderId,
        total_filled_quantums: BaseQuantums,
    },
    OrderRemove {
        order_id: OrderId,
        reason: OrderRemoveReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderRemoveReason {
    UserCanceled,
    FullyFilled,
    Undercollateralized,
    Expired,
    SelfTrade,
    PostOnlyWouldCross,
    ImmediateOrCancel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffchainUpdates {
    updates: Vec<OffchainUpdate>,
}

impl OffchainUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, update: OffchainUpdate) {
        self.updates.push(update);
    }

    pub fn extend(&mut self, other: OffchainUpdates) {
        self.updates.extend(other.updates);
    }

    pub fn updates(&self) -> &[OffchainUpdate] {
        &self.updates
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Collects block events with monotonic ids.
#[derive(Debug, Default)]
pub struct EventManager {
    events: Vec<Event>,
    next_id: u64,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, block_height: u32, payload: EventPayload) {
        let event = Event {
            id: EventId(self.next_id),
            block_height,
            payload,
        };
        self.next_id += 1;
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}
