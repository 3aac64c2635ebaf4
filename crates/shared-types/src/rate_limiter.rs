//! # Rate Limiter
//!
//! Token bucket used to pace outbound routing calls (provides, provider
//! searches) so a burst of new blocks cannot flood the DHT.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter.
///
/// Holds at most `capacity` tokens and regains `refill_rate` tokens per
/// second. A `refill_rate` of zero never refills.
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(capacity: u64, refill_rate: u64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_rate: refill_rate as f64,
            bucket: Mutex::new(Bucket {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Take a token if one is available.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until the next token is available, or `None` if one is ready.
    ///
    /// Returns `Some(Duration::MAX)` when the bucket is empty and never refills.
    pub fn time_to_next_token(&self) -> Option<Duration> {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            return None;
        }
        if self.refill_rate <= 0.0 {
            return Some(Duration::MAX);
        }
        Some(Duration::from_secs_f64(
            (1.0 - bucket.tokens) / self.refill_rate,
        ))
    }

    /// Wait until a token can be taken.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            let wait = self
                .time_to_next_token()
                .unwrap_or(Duration::ZERO)
                .min(Duration::from_secs(1));
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Currently available whole tokens.
    pub fn available(&self) -> u64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens.floor() as u64
    }

    pub fn is_limited(&self) -> bool {
        self.available() == 0
    }
}

/// Pre-configured limiters.
pub mod presets {
    use super::RateLimiter;

    /// Content announcements (20/sec, burst 64).
    pub fn provides() -> RateLimiter {
        RateLimiter::new(64, 20)
    }

    /// Provider lookups (10/sec, burst 20).
    pub fn provider_searches() -> RateLimiter {
        RateLimiter::new(20, 10)
    }
}
