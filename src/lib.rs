//! Matching, liquidation, and price-validation core of a perpetual-futures
//! exchange.
//!
//! Runs as a deterministic state machine on top of a replicated log. All
//! arithmetic is exact (fixed-point integers, ppm scaling, big-int
//! intermediates), all iteration orders are specified, and no code path
//! reads the wall clock during matching. Consensus, wire decoding, storage
//! backends, and RPC surfaces live outside this crate.

pub mod clob;
pub mod config;
pub mod engine;
pub mod events;
pub mod math;
pub mod msgs;
pub mod perpetuals;
pub mod prices;
pub mod state;
pub mod subaccounts;
pub mod types;

pub use clob::*;
pub use config::*;
pub use engine::*;
pub use events::*;
pub use msgs::*;
pub use perpetuals::*;
pub use prices::*;
pub use state::*;
pub use subaccounts::*;
pub use types::*;
