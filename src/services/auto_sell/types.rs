//! Engine-internal types

use rust_decimal::Decimal;
use std::fmt;

/// What put an asset in front of the dispatch gates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Startup sweep over the fetched balance
    ColdPass,
    /// Feed snapshot amount differing from last-acted
    Snapshot,
    /// A `deposit` update on the stream
    Deposit,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::ColdPass => write!(f, "cold_pass"),
            Trigger::Snapshot => write!(f, "snapshot"),
            Trigger::Deposit => write!(f, "deposit"),
        }
    }
}

/// A submission whose outcome is unknown, parked until the next snapshot
#[derive(Debug, Clone, Copy)]
pub struct AmbiguousEntry {
    /// Volume on the order that may or may not have reached the exchange
    pub submitted_volume: Decimal,
    /// Reported balance at the moment of submission
    pub balance_at_submit: Decimal,
}
