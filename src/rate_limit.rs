//! Write throttling for platform mutations
//!
//! The platform is far stricter about write calls (moving favorites) than
//! about reads, and throttles per account. This sliding-window limiter
//! tracks write timestamps per account and tells callers how long to wait
//! before the next write is allowed.
//! Uses DashMap for lock-free concurrent access.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sliding window rate limiter using lock-free DashMap
/// Tracks writes per account within a time window
pub struct RateLimiter {
    /// Map of account -> list of write timestamps (lock-free)
    requests: DashMap<String, Vec<Instant>>,
    /// Maximum writes allowed in the window
    max_requests: usize,
    /// Time window for rate limiting
    window: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `max_requests` - Maximum number of writes allowed in the window
    /// * `window` - Duration of the sliding window
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: DashMap::new(),
            max_requests: max_requests.max(1),
            window,
        }
    }

    /// Limiter allowing `per_minute` writes in any 60 second window
    pub fn per_minute(per_minute: usize) -> Self {
        Self::new(per_minute, Duration::from_secs(60))
    }

    /// Check if a write is allowed and record it if so
    ///
    /// Returns `true` if the write is allowed, `false` if rate limited
    pub fn check_and_record(&self, account: &str) -> bool {
        let now = Instant::now();
        let window = self.window;
        let max_requests = self.max_requests;

        let mut entry = self.requests.entry(account.to_string()).or_default();
        let timestamps = entry.value_mut();

        // Remove writes outside the window
        timestamps.retain(|t| now.duration_since(*t) < window);

        if timestamps.len() >= max_requests {
            warn!(
                account,
                requests = timestamps.len(),
                max = max_requests,
                "Write rate limit reached"
            );
            return false;
        }

        timestamps.push(now);
        true
    }

    /// How long until the oldest write in the window falls out of it
    pub fn time_until_available(&self, account: &str) -> Duration {
        let now = Instant::now();
        self.requests
            .get(account)
            .and_then(|entry| {
                let live: Vec<&Instant> = entry
                    .value()
                    .iter()
                    .filter(|t| now.duration_since(**t) < self.window)
                    .collect();
                if live.len() < self.max_requests {
                    return None;
                }
                live.into_iter()
                    .min()
                    .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            })
            .unwrap_or(Duration::ZERO)
    }

    /// Wait until a write slot is free, then record the write
    pub async fn acquire(&self, account: &str) {
        while !self.check_and_record(account) {
            let wait = self
                .time_until_available(account)
                .max(Duration::from_millis(10));
            debug!(account, ?wait, "Waiting for write slot");
            tokio::time::sleep(wait).await;
        }
    }
}
