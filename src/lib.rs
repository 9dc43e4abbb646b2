//! Kraken auto-sell agent
//!
//! Watches one exchange account over an authenticated balance stream and
//! liquidates every non-fiat asset into a single target fiat currency via
//! market sells, under strict rate-limit, retry, reconnection, and
//! per-asset single-flight discipline. A small read-only HTTP surface
//! exposes engine state and order lookups to operators.

pub mod api;
pub mod config;
pub mod services;
pub mod types;

pub use api::{create_app, AppState};
pub use config::Config;
pub use services::{
    ApiError, AssetRegistry, AutoSellEngine, BalanceFeed, FeedStatus, KrakenClient, LogSink,
    Metrics,
};
pub use types::{BalanceEvent, EngineEvent, LedgerEntryKind, Order, OrderState, SkipReason, Trade};
