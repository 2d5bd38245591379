//! Windowed rate limiting
//!
//! Fixed-window counters keyed by an arbitrary identifier (IP or endpoint
//! id). A bucket lives for one window; the first hit after expiry starts a
//! fresh one lazily. A periodic sweep drops buckets nobody is touching so
//! the map cannot grow without bound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

/// How often expired buckets are swept out
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Result of one limiter check
#[derive(Clone, Copy, Debug)]
pub struct Decision {
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    pub reset_at: Instant,
}

impl Decision {
    /// Whole seconds until the window resets, at least 1
    pub fn wait_secs(&self) -> u64 {
        let now = Instant::now();
        if self.reset_at <= now {
            return 1;
        }
        (self.reset_at - now).as_secs().max(1)
    }
}

struct Bucket {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window counter limiter
pub struct WindowLimiter {
    window: Duration,
    max: u32,
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl WindowLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Connection limiter: 10 per minute per IP
    pub fn for_connections() -> Self {
        Self::new(Duration::from_secs(60), 10)
    }

    /// Upload-init limiter: 5 per 5 minutes per endpoint
    pub fn for_uploads() -> Self {
        Self::new(Duration::from_secs(300), 5)
    }

    /// Join-room limiter: 20 per minute per endpoint
    pub fn for_joins() -> Self {
        Self::new(Duration::from_secs(60), 20)
    }

    /// Count one request against `key`
    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            reset_at: now + self.window,
        });

        if now > bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now + self.window;
        }

        if bucket.count < self.max {
            bucket.count += 1;
            Decision {
                allowed: true,
                remaining: self.max - bucket.count,
                reset_at: bucket.reset_at,
            }
        } else {
            Decision {
                allowed: false,
                remaining: 0,
                reset_at: bucket.reset_at,
            }
        }
    }

    /// Drop expired buckets
    pub fn sweep(&self) {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) {
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, b| now <= b.reset_at);
        let swept = before - buckets.len();
        if swept > 0 {
            debug!("Swept {} expired limiter buckets", swept);
        }
    }

    /// Tracked bucket count (monitoring and tests)
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    /// Launch the periodic sweep for a shared limiter
    pub fn spawn_sweeper(limiter: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                limiter.sweep();
            }
        })
    }
}
