//! Core types for the auto-sell agent

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a submitted sell order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    /// Submitted, not yet confirmed open by the exchange
    Pending,
    /// Resting on the exchange (market orders pass through briefly)
    Open,
    Closed,
    Canceled,
    Failed,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Closed | OrderState::Canceled | OrderState::Failed)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderState::Pending => write!(f, "pending"),
            OrderState::Open => write!(f, "open"),
            OrderState::Closed => write!(f, "closed"),
            OrderState::Canceled => write!(f, "canceled"),
            OrderState::Failed => write!(f, "failed"),
        }
    }
}

/// A sell order tracked by the engine.
///
/// Created on successful submission, mutated by the settle poller, retained
/// for a short window after it goes terminal so operators can still look it up.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub txid: String,
    /// Standard asset code (e.g. "ETH")
    pub asset: String,
    pub pair: String,
    pub requested_volume: Decimal,
    pub filled_volume: Decimal,
    pub state: OrderState,
    pub fills: Vec<Trade>,
    pub submitted_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

/// A single fill. Immutable once materialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub order_txid: String,
    pub pair: String,
    pub side: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub cost: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Ledger entry kinds carried on balance update events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryKind {
    Deposit,
    Withdrawal,
    Trade,
    Adjustment,
    Transfer,
}

impl fmt::Display for LedgerEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerEntryKind::Deposit => write!(f, "deposit"),
            LedgerEntryKind::Withdrawal => write!(f, "withdrawal"),
            LedgerEntryKind::Trade => write!(f, "trade"),
            LedgerEntryKind::Adjustment => write!(f, "adjustment"),
            LedgerEntryKind::Transfer => write!(f, "transfer"),
        }
    }
}

/// One balance-change event from the stream, already decoded and typed
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceEvent {
    /// Native asset code as the exchange reports it
    pub asset: String,
    pub kind: LedgerEntryKind,
    /// Signed delta
    pub amount: Decimal,
    /// Resulting total after the change
    pub balance: Decimal,
    pub ledger_id: Option<String>,
    pub ref_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Typed events the feed hands to the engine. One `Snapshot` per connection
/// cycle, always before any `Update` of that cycle.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Snapshot(Vec<(String, Decimal)>),
    Update(BalanceEvent),
}

/// Why a balance delta did not turn into a sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TargetCurrency,
    NoMarket,
    BelowMinimumOrder,
    InsufficientAvailableBalance,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TargetCurrency => write!(f, "target_currency"),
            SkipReason::NoMarket => write!(f, "no_market"),
            SkipReason::BelowMinimumOrder => write!(f, "below_minimum_order"),
            SkipReason::InsufficientAvailableBalance => {
                write!(f, "insufficient_available_balance")
            }
        }
    }
}
