//! Metrics collection for monitoring the agent

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Collected counters, serialized by the status surface
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub orders_partially_filled: u64,
    pub orders_failed: u64,
    pub sells_skipped: u64,
    pub ambiguous_submissions: u64,
    pub ws_reconnects: u64,
    pub api_calls_total: u64,
    pub api_errors_total: u64,
    pub api_rate_limited: u64,
}

/// Thread-safe metrics collector
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    orders_submitted: AtomicU64,
    orders_filled: AtomicU64,
    orders_partially_filled: AtomicU64,
    orders_failed: AtomicU64,
    sells_skipped: AtomicU64,
    ambiguous_submissions: AtomicU64,
    ws_reconnects: AtomicU64,
    api_calls_total: AtomicU64,
    api_errors_total: AtomicU64,
    api_rate_limited: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                orders_submitted: AtomicU64::new(0),
                orders_filled: AtomicU64::new(0),
                orders_partially_filled: AtomicU64::new(0),
                orders_failed: AtomicU64::new(0),
                sells_skipped: AtomicU64::new(0),
                ambiguous_submissions: AtomicU64::new(0),
                ws_reconnects: AtomicU64::new(0),
                api_calls_total: AtomicU64::new(0),
                api_errors_total: AtomicU64::new(0),
                api_rate_limited: AtomicU64::new(0),
            }),
        }
    }

    pub fn inc_orders_submitted(&self) {
        self.inner.orders_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_orders_filled(&self) {
        self.inner.orders_filled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_orders_partially_filled(&self) {
        self.inner.orders_partially_filled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_orders_failed(&self) {
        self.inner.orders_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sells_skipped(&self) {
        self.inner.sells_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ambiguous_submissions(&self) {
        self.inner.ambiguous_submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ws_reconnects(&self) {
        self.inner.ws_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_api_calls(&self) {
        self.inner.api_calls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_api_errors(&self) {
        self.inner.api_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_api_rate_limited(&self) {
        self.inner.api_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            orders_submitted: self.inner.orders_submitted.load(Ordering::Relaxed),
            orders_filled: self.inner.orders_filled.load(Ordering::Relaxed),
            orders_partially_filled: self.inner.orders_partially_filled.load(Ordering::Relaxed),
            orders_failed: self.inner.orders_failed.load(Ordering::Relaxed),
            sells_skipped: self.inner.sells_skipped.load(Ordering::Relaxed),
            ambiguous_submissions: self.inner.ambiguous_submissions.load(Ordering::Relaxed),
            ws_reconnects: self.inner.ws_reconnects.load(Ordering::Relaxed),
            api_calls_total: self.inner.api_calls_total.load(Ordering::Relaxed),
            api_errors_total: self.inner.api_errors_total.load(Ordering::Relaxed),
            api_rate_limited: self.inner.api_rate_limited.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
