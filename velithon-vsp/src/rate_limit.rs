//! Token-bucket rate limiter, optionally used to gate inbound VSP calls
//! per peer.
//!
//! spec.md's open question (§9, "SimpleTokenBucketAlgorithm") flags a 20%
//! burst allowance over the declared limit as possibly unintentional in
//! the original implementation. This preserves the behavior rather than
//! normalizing it away; see DESIGN.md.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
    started_at: Instant,
    rejected: AtomicU64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// `limit` tokens refill per second; capacity defaults to `limit * 1.2`,
    /// carried over from the original's burst allowance.
    pub fn new(limit: u32) -> Self {
        let limit = limit as f64;
        Self {
            capacity: limit * 1.2,
            refill_per_sec: limit,
            state: Mutex::new(BucketState {
                tokens: limit * 1.2,
                last_refill: Instant::now(),
            }),
            started_at: Instant::now(),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn with_capacity(limit: u32, capacity: u32) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec: limit as f64,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            started_at: Instant::now(),
            rejected: AtomicU64::new(0),
        }
    }

    /// Attempt to take one token. Returns `false` (and counts a rejection)
    /// if the bucket is empty.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
