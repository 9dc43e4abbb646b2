//! Rate limiter for exchange REST calls
//!
//! Two constraints apply to the private API:
//! - at most 15 calls in any rolling one-second window
//! - at least 100 ms between consecutive calls, so two nonces never race
//!   each other onto the wire
//!
//! The limiter is process-wide. Admission is FIFO: callers queue on one async
//! mutex, so no asset's dispatch task can starve the others.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(1);
const WINDOW_CAPACITY: usize = 15;
const MIN_SPACING: Duration = Duration::from_millis(100);

struct SlidingWindow {
    calls: VecDeque<Instant>,
    last_call: Option<Instant>,
}

impl SlidingWindow {
    fn new() -> Self {
        Self {
            calls: VecDeque::with_capacity(WINDOW_CAPACITY),
            last_call: None,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.calls.front() {
            if now.duration_since(front) >= WINDOW {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long the caller must wait before the next call is admissible
    fn delay_until_ready(&mut self, now: Instant) -> Duration {
        self.prune(now);

        let spacing_wait = match self.last_call {
            Some(last) => MIN_SPACING.saturating_sub(now.duration_since(last)),
            None => Duration::ZERO,
        };

        let window_wait = if self.calls.len() >= WINDOW_CAPACITY {
            // Oldest call ages out of the window first
            let oldest = *self.calls.front().expect("window is non-empty at capacity");
            WINDOW.saturating_sub(now.duration_since(oldest))
        } else {
            Duration::ZERO
        };

        spacing_wait.max(window_wait)
    }

    fn record(&mut self, now: Instant) {
        self.calls.push_back(now);
        self.last_call = Some(now);
    }
}

/// Process-wide sliding-window rate limiter
pub struct RateLimiter {
    window: Arc<Mutex<SlidingWindow>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            window: Arc::new(Mutex::new(SlidingWindow::new())),
        }
    }

    /// Wait until a call slot is available, then claim it.
    /// Returns true if the caller had to wait.
    pub async fn acquire(&self) -> bool {
        let mut waited = false;
        // Hold the lock across the sleep: that is what makes admission FIFO.
        let mut window = self.window.lock().await;
        loop {
            let now = Instant::now();
            let delay = window.delay_until_ready(now);
            if delay.is_zero() {
                window.record(now);
                return waited;
            }
            waited = true;
            debug!("rate limiter: waiting {:?}", delay);
            sleep(delay).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_call_is_immediate() {
        let limiter = RateLimiter::new();
        assert!(!limiter.acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_enforced_between_calls() {
        let limiter = RateLimiter::new();
        limiter.acquire().await;
        let start = Instant::now();
        assert!(limiter.acquire().await);
        assert!(start.elapsed() >= MIN_SPACING);
    }

    #[tokio::test(start_paused = true)]
    async fn window_capacity_enforced() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        for _ in 0..WINDOW_CAPACITY {
            limiter.acquire().await;
        }
        // 15 calls spaced 100ms apart span 1.4s, so the window never fills
        // before entries age out; spacing dominates.
        assert!(start.elapsed() >= Duration::from_millis(100 * (WINDOW_CAPACITY as u64 - 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn window_alone_blocks_burst() {
        // Exercise the window limb directly, without the spacing limb.
        let mut window = SlidingWindow::new();
        let now = Instant::now();
        for _ in 0..WINDOW_CAPACITY {
            window.calls.push_back(now);
        }
        let delay = window.delay_until_ready(now);
        assert_eq!(delay, WINDOW);
    }
}
