//! Result and error types for engine operations.
//!
//! `LiquidationRequiresDeleveraging` is deliberately a status, not an error:
//! it is a normal outcome that a separate module consumes. Errors here are
//! the recoverable kind; invariant violations panic instead, because they
//! mean the proposed block is invalid.

use crate::clob::{MemclobError, OrderId, OrderValidationError};
use crate::prices::PricesError;
use crate::subaccounts::{SubaccountsError, UpdateResult};
use crate::types::{BaseQuantums, ClobPairId, PerpetualId, SubaccountId};
use thiserror::Error;

/// Outcome of placing a standing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceOrderStatus {
    Success,
    /// IOC/FOK remainder could not fill and will not rest.
    ImmediateOrCancelWouldRest,
    PostOnlyWouldCross,
    /// Reduce-only order would grow or flip the position.
    ReduceOnlyBlocked,
    /// The taker failed collateralization mid-match.
    Undercollateralized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceOrderResult {
    pub status: PlaceOrderStatus,
    pub filled_quantums: BaseQuantums,
    pub remaining_quantums: BaseQuantums,
    pub rested: bool,
}

/// Outcome of placing a synthesized liquidation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidationStatus {
    Success,
    LiquidationRequiresDeleveraging,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationResult {
    pub status: LiquidationStatus,
    pub filled_quantums: BaseQuantums,
}

/// How one `process_single_match` call ended, short of an outright error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Updates persisted; transfers done; fill amounts recorded.
    Applied {
        taker_result: UpdateResult,
        maker_result: UpdateResult,
        /// Signed insurance-fund movement for liquidation takers, zero otherwise.
        insurance_fund_delta: i128,
    },
    /// `update_subaccounts` rejected the pair of updates; nothing persisted.
    /// The matching loop uses the per-side results to decide who to evict.
    CollateralizationFailed {
        taker_result: UpdateResult,
        maker_result: UpdateResult,
    },
    /// The fill would leave the insurance fund below its deleveraging
    /// threshold (or insolvent); nothing persisted.
    RequiresDeleveraging,
    /// The fill would push the liquidated subaccount past a per-block limit;
    /// nothing persisted and no further makers are attempted.
    BlockLimitReached,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClobError {
    #[error("clob pair {0:?} does not exist")]
    InvalidClob(ClobPairId),

    #[error("invalid order: {0}")]
    InvalidOrder(#[from] OrderValidationError),

    #[error("fill amount {fill_amount} is not a positive multiple of step size {step}")]
    FillAmountNotDivisibleByStepSize {
        fill_amount: BaseQuantums,
        step: BaseQuantums,
    },

    #[error("fill of {fill_amount} would exceed order size {order_quantums} for {order_id} (already filled {filled})")]
    InvalidOrderFillAmount {
        order_id: OrderId,
        order_quantums: BaseQuantums,
        filled: BaseQuantums,
        fill_amount: BaseQuantums,
    },

    #[error("invalid position size delta {delta} for subaccount {subaccount_id} in perpetual {perpetual_id:?}")]
    InvalidPerpetualPositionSizeDelta {
        subaccount_id: SubaccountId,
        perpetual_id: PerpetualId,
        delta: i128,
    },

    #[error("invalid quantums for insurance fund delta calculation")]
    InvalidQuantumsForInsuranceFundDeltaCalculation,

    #[error("stateful order {order_id} replacement must have a later good-til-time")]
    InvalidStatefulOrderReplacement { order_id: OrderId },

    #[error("proposed match between taker {taker_order_id} and maker {maker_order_id} failed collateralization")]
    ProposedMatchFailed {
        taker_order_id: OrderId,
        maker_order_id: OrderId,
    },

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {0} already exists")]
    DuplicateOrder(OrderId),

    #[error(transparent)]
    Memclob(#[from] MemclobError),

    #[error(transparent)]
    Prices(#[from] PricesError),

    #[error(transparent)]
    Subaccounts(#[from] SubaccountsError),
}
