//! Per-identity rate limiting.
//!
//! Bounds how often a single (caller address, recipient) pair may ask for
//! a verification email within a fixed window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Identity a request is throttled under.
///
/// Requests without a recipient in the body are keyed under the literal
/// `"unknown"` recipient by the caller, so malformed traffic from one
/// address shares a single bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    addr: String,
    recipient: String,
}

impl RateLimitKey {
    pub fn new(addr: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self { addr: addr.into(), recipient: recipient.into() }
    }
}

struct Window {
    count: u32,
    started_at: Instant,
}

/// Fixed-window rate limiter over lazily created per-key windows.
///
/// An expired window is reset in place the next time its key shows up;
/// [`RateLimiter::start_cleanup_task`] evicts keys that never come back.
pub struct RateLimiter {
    windows: Mutex<HashMap<RateLimitKey, Window>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self { windows: Mutex::new(HashMap::new()), max_requests, window }
    }

    /// Record one request for `key`.
    ///
    /// Under the limit the key's counter is incremented. Over the limit
    /// nothing is recorded and the time remaining until the window resets
    /// is returned so the caller can surface a retry-after hint.
    pub fn check_and_record(&self, key: RateLimitKey) -> Result<(), Duration> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        let window = windows.entry(key).or_insert(Window { count: 0, started_at: now });
        if now.duration_since(window.started_at) >= self.window {
            window.count = 0;
            window.started_at = now;
        }

        if window.count >= self.max_requests {
            let remaining = self.window.saturating_sub(now.duration_since(window.started_at));
            return Err(remaining);
        }

        window.count += 1;
        Ok(())
    }

    /// Drop every window that has fully elapsed.
    pub fn cleanup(&self) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        windows.retain(|_, window| now.duration_since(window.started_at) < self.window);
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Spawn a background task that periodically evicts expired windows,
    /// keeping the table bounded under adversarial key churn.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.cleanup();
            }
        });
    }
}
