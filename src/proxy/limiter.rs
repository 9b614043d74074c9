//! Per-node fixed-window rate limiting.
//!
//! Each node counts requests and body bytes inside a one-minute window. The
//! window restarts when an admission check finds it at least a minute old,
//! so a burst at the end of one window followed by a burst at the start of
//! the next can exceed the nominal per-minute rate.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Length of a rate-limit window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Per-minute budget of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub bytes_per_minute: u64,
    pub requests_per_minute: u64,
}

impl RateLimit {
    pub fn new(bytes_per_minute: u64, requests_per_minute: u64) -> Self {
        Self {
            bytes_per_minute,
            requests_per_minute,
        }
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

#[derive(Debug)]
struct Window {
    byte_count: u64,
    req_count: u64,
    started: Instant,
}

/// Fixed-window request and byte counter for one node.
///
/// The counters are only reachable through [`RateLimiter::admit`], which
/// holds the lock for the whole check-and-increment.
pub struct RateLimiter {
    limit: RateLimit,
    window: Mutex<Window>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self::with_clock(limit, Arc::new(SystemClock))
    }

    pub fn with_clock(limit: RateLimit, clock: Arc<dyn Clock>) -> Self {
        let started = clock.now();
        Self {
            limit,
            window: Mutex::new(Window {
                byte_count: 0,
                req_count: 0,
                started,
            }),
            clock,
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Decides whether a request carrying `body_size` bytes fits in the
    /// current window, and if so charges it.
    pub fn admit(&self, body_size: u64) -> bool {
        let mut window = self.window.lock();

        let now = self.clock.now();
        if now.saturating_duration_since(window.started) >= WINDOW {
            window.byte_count = 0;
            window.req_count = 0;
            window.started = now;
        }

        if window.req_count >= self.limit.requests_per_minute {
            return false;
        }

        if window.byte_count.saturating_add(body_size) > self.limit.bytes_per_minute {
            return false;
        }

        window.req_count += 1;
        window.byte_count += body_size;
        true
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}
