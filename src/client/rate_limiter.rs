//! Adaptive rate limiter for the inference endpoint.
//!
//! Epistemic foundation:
//! - K_i: 429 responses require backoff before the next attempt
//! - B_i: The server may announce a retry-after; otherwise back off
//!   exponentially
//! - I^B: Exact limits unknowable until responses arrive

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Backoff state for a single model.
#[derive(Debug, Default)]
struct ModelState {
    /// Consecutive 429 responses seen
    consecutive_429s: u32,
    /// Do not send before this instant
    backoff_until: Option<Instant>,
}

impl ModelState {
    fn wait_time(&self) -> Duration {
        match self.backoff_until {
            Some(until) => until.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    fn record_429(&mut self, retry_after_secs: Option<f64>) {
        self.consecutive_429s += 1;
        let exponential = (2.0_f64).powi(self.consecutive_429s as i32).min(60.0);
        let backoff_secs = retry_after_secs.unwrap_or(exponential);
        self.backoff_until = Some(Instant::now() + Duration::from_secs_f64(backoff_secs));
        warn!(
            consecutive_429s = self.consecutive_429s,
            backoff_secs, "Rate limited (429), backing off"
        );
    }

    fn record_success(&mut self) {
        if self.consecutive_429s > 0 {
            self.consecutive_429s = 0;
            self.backoff_until = None;
        }
    }
}

/// Per-model 429 backoff, shared by all workers.
///
/// Waiting here happens before an attempt is issued, so it never consumes
/// retry slots.
#[derive(Debug, Default)]
pub struct RateLimiter {
    states: DashMap<String, ModelState>,
    total_requests: AtomicU64,
    total_429s: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep out any active backoff window for the model.
    pub async fn wait_if_needed(&self, model: &str) {
        let wait = self
            .states
            .entry(model.to_string())
            .or_default()
            .wait_time();

        if wait > Duration::ZERO {
            debug!(model, wait_ms = wait.as_millis() as u64, "Waiting out backoff");
            tokio::time::sleep(wait).await;
        }
    }

    /// Record a response status, adjusting backoff state.
    pub fn record_request(&self, model: &str, status: u16, retry_after_secs: Option<f64>) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut state = self.states.entry(model.to_string()).or_default();
        if status == 429 {
            self.total_429s.fetch_add(1, Ordering::Relaxed);
            state.record_429(retry_after_secs);
        } else if status < 400 {
            state.record_success();
        }
    }

    /// (requests sent, 429s seen) so far.
    pub fn totals(&self) -> (u64, u64) {
        (
            self.total_requests.load(Ordering::Relaxed),
            self.total_429s.load(Ordering::Relaxed),
        )
    }
}
