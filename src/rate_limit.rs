//! Token-bucket rate limiter for outbound provider calls.
//!
//! Capacity equals the configured requests-per-minute budget; tokens
//! refill continuously at `capacity / 60` per second, capped at capacity.
//! [`RateLimiter::acquire`] suspends the caller until a token is
//! available; the availability check and the decrement happen under one
//! lock, so concurrent callers never observe the count go negative and
//! no token is granted twice.
//!
//! One limiter instance models one provider's budget; callers construct
//! it once and share it (via `Arc`) across every worker that talks to
//! that provider. State lives only for the lifetime of the instance.

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

use crate::error::{Error, Result};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    capacity: f64,
    refill_per_sec: f64,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
    }
}

/// Throttles calls to a configured requests-per-minute budget.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_minute` calls per minute.
    ///
    /// The bucket starts full, so the first `requests_per_minute`
    /// acquisitions complete immediately.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if `requests_per_minute` is zero.
    pub fn new(requests_per_minute: u32) -> Result<Self> {
        if requests_per_minute == 0 {
            return Err(Error::Config(
                "rate limit must be at least 1 request per minute".to_string(),
            ));
        }
        let capacity = requests_per_minute as f64;
        Ok(Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
                capacity,
                refill_per_sec: capacity / 60.0,
            }),
        })
    }

    /// Wait until a token is available, then take it.
    ///
    /// Suspends (never spin-waits) for the exact deficit, then re-checks
    /// under the lock; the token count is only decremented together with
    /// the availability check.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                state.refill(Instant::now());
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / state.refill_per_sec)
            };
            sleep(wait).await;
        }
    }

    /// Take a token if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        state.refill(Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Replace the budget, refilling the bucket to the new capacity.
    ///
    /// This is the only way limiter state is reset.
    pub async fn reconfigure(&self, requests_per_minute: u32) -> Result<()> {
        if requests_per_minute == 0 {
            return Err(Error::Config(
                "rate limit must be at least 1 request per minute".to_string(),
            ));
        }
        let capacity = requests_per_minute as f64;
        let mut state = self.state.lock().await;
        state.capacity = capacity;
        state.refill_per_sec = capacity / 60.0;
        state.tokens = capacity;
        state.last_refill = Instant::now();
        Ok(())
    }
}
