//! Token-bucket rate limiter for the aggregator API.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Starts full. `acquire` suspends the caller until a token is available;
/// `drain` empties the bucket so every subsequent caller waits a full
/// refill interval.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        assert!(capacity >= 1.0 && refill_per_sec > 0.0);
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn acquire(&self) {
        let wait = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            state.last_refill = now;

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }
            Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
        };

        tokio::time::sleep(wait).await;

        let mut state = self.state.lock().await;
        state.tokens = 0.0;
        state.last_refill = Instant::now();
    }

    pub async fn drain(&self) {
        let mut state = self.state.lock().await;
        state.tokens = 0.0;
        state.last_refill = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_within_capacity_is_free() {
        let bucket = TokenBucket::new(3.0, 1.0);
        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn sequential_acquires_respect_refill_rate() {
        // capacity 2, refill 40/s: 5 acquires must take >= (5-2)/40 = 75 ms
        let bucket = TokenBucket::new(2.0, 40.0);
        let start = Instant::now();
        for _ in 0..5 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(75));
    }

    #[tokio::test]
    async fn drain_forces_a_full_wait() {
        let bucket = TokenBucket::new(5.0, 50.0);
        bucket.drain().await;
        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(18));
    }
}
