//! Time sources for breaker recovery deadlines
//!
//! - `MonotonicClock`: seconds since creation, anchored on `Instant` so NTP
//!   adjustments never shorten or extend an open breaker
//! - `ManualClock`: advanced explicitly, for deterministic tests

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic time source
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Seconds elapsed since the clock's anchor
    fn now(&self) -> f64;
}

/// Wall-independent clock anchored at construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start_time: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to
///
/// # Example
///
/// ```rust
/// use storefront_resilience::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_secs(61));
/// assert_eq!(clock.now(), 61.0);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by.as_secs_f64();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
