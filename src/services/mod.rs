//! Background services for the auto-sell agent

pub mod api_errors;
pub mod assets;
pub mod auto_sell;
pub mod balance_ws;
pub mod exchange;
pub mod log_sink;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;

pub use api_errors::ApiError;
pub use assets::{nativize, standardize, AssetRegistry, ResolvedPair};
pub use auto_sell::AutoSellEngine;
pub use balance_ws::{BalanceFeed, FeedStatus};
pub use exchange::KrakenClient;
pub use log_sink::LogSink;
pub use metrics::Metrics;
pub use rate_limiter::RateLimiter;
pub use retry::{with_retry, RetryConfig};
