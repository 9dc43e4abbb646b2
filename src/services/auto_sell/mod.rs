//! Liquidation engine
//!
//! Classifies balance deltas, gates them through market-pair resolution and
//! minimum-order constraints, and dispatches exactly-once market sells.

mod engine;
mod types;

pub use engine::AutoSellEngine;
pub use types::Trigger;
