// 1.0: all the primitives live here. nothing in the engine works without these types.
// ids, quantums, subticks, sides. each is a newtype so the compiler catches unit mixups.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PerpetualId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClobPairId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(pub u32);

/// The quote asset every book settles in.
pub const QUOTE_ASSET_ID: AssetId = AssetId(0);

/// Short-term order fill state survives this many blocks past good-til-block
/// before it is pruned.
pub const SHORT_BLOCK_WINDOW: u32 = 20;

/// Subaccount numbers are bounded per owner.
pub const MAX_SUBACCOUNT_NUMBER: u32 = 128;

// 1.1: subaccount ids order by (owner descending, number ascending). every map keyed
// by SubaccountId iterates in that order, which is what keeps replicas in agreement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubaccountId {
    pub owner: String,
    pub number: u32,
}

impl SubaccountId {
    pub fn new(owner: impl Into<String>, number: u32) -> Self {
        Self {
            owner: owner.into(),
            number,
        }
    }
}

impl Ord for SubaccountId {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .owner
            .cmp(&self.owner)
            .then(self.number.cmp(&other.number))
    }
}

impl PartialOrd for SubaccountId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SubaccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.number)
    }
}

// 1.2: taker-centric order side. Buy increases the base position, Sell decreases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

// 1.3: unsigned size in base quantums. order sizes and fill amounts use this.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct BaseQuantums(pub u64);

impl BaseQuantums {
    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_sub(&self, other: BaseQuantums) -> Option<BaseQuantums> {
        self.0.checked_sub(other.0).map(BaseQuantums)
    }

    pub fn min(&self, other: BaseQuantums) -> BaseQuantums {
        BaseQuantums(self.0.min(other.0))
    }
}

impl fmt::Display for BaseQuantums {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.4: integer price units. subticks * 10^quantum_conversion_exponent is
// quote quantums per base quantum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Subticks(pub u64);

impl Subticks {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Subticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.5: signed size in base quantums: positive = long, negative = short.
// core to all position math. persisted magnitudes are bounded by i128.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedQuantums(i128);

impl SignedQuantums {
    pub fn new(value: i128) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn value(&self) -> i128 {
        self.0
    }

    pub fn abs(&self) -> u128 {
        self.0.unsigned_abs()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_long(&self) -> bool {
        self.0 > 0
    }

    pub fn is_short(&self) -> bool {
        self.0 < 0
    }

    /// Side a closing order must take: Sell for longs, Buy for shorts.
    pub fn closing_side(&self) -> Option<Side> {
        if self.is_long() {
            Some(Side::Sell)
        } else if self.is_short() {
            Some(Side::Buy)
        } else {
            None
        }
    }

    pub fn signum(&self) -> i128 {
        self.0.signum()
    }
}

impl fmt::Display for SignedQuantums {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
