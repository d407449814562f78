//! Builder API for ergonomic breaker configuration

use crate::{
    breaker::{BreakerConfig, BreakerContext, FaultBreaker},
    callbacks::Callbacks,
    clock::{Clock, MonotonicClock},
    errors::ConfigError,
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

/// Builder for creating fault breakers with fluent API
pub struct BreakerBuilder {
    dependency: String,
    config: BreakerConfig,
    clock: Option<Arc<dyn Clock>>,
    callbacks: Callbacks,
}

impl BreakerBuilder {
    /// Create a new builder for the named dependency
    pub fn new(dependency: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
            config: BreakerConfig::default(),
            clock: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration, e.g. one loaded from [`Settings`](crate::Settings)
    pub fn config(mut self, config: BreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of consecutive failures that opens the breaker
    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the success threshold (probe successes needed to close from half-open)
    pub fn success_threshold(mut self, threshold: usize) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Set how long the breaker stays open before admitting a probe
    pub fn recovery_timeout_secs(mut self, seconds: f64) -> Self {
        self.config.recovery_timeout_secs = seconds;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Set a custom time source
    ///
    /// # Examples
    ///
    /// ```rust
    /// use storefront_resilience::{FaultBreaker, ManualClock};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let clock = Arc::new(ManualClock::new());
    /// let breaker = FaultBreaker::builder("cache")
    ///     .failure_threshold(1)
    ///     .clock(clock.clone())
    ///     .build()
    ///     .unwrap();
    ///
    /// let _ = breaker.call(|| Err::<(), _>("timeout"));
    /// assert!(breaker.is_open());
    ///
    /// clock.advance(Duration::from_secs(60));
    /// assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());
    /// ```
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set callback for when the breaker opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when the breaker closes after recovery
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when the breaker starts probing
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Validate the configuration and build the breaker
    pub fn build(self) -> Result<FaultBreaker, ConfigError> {
        self.config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        let context = BreakerContext {
            dependency: self.dependency,
            config: self.config,
            clock,
            failures: Arc::new(AtomicUsize::new(0)),
        };

        Ok(FaultBreaker::with_context_and_callbacks(
            context,
            self.callbacks,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BreakerState;

    #[test]
    fn test_builder_defaults() {
        let breaker = BreakerBuilder::new("test").build().unwrap();

        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.config(), &BreakerConfig::default());
    }

    #[test]
    fn test_builder_custom_config() {
        let breaker = BreakerBuilder::new("orders_db")
            .failure_threshold(10)
            .success_threshold(3)
            .recovery_timeout_secs(5.0)
            .build()
            .unwrap();

        assert_eq!(breaker.dependency(), "orders_db");
        assert_eq!(breaker.config().failure_threshold, 10);
        assert_eq!(breaker.config().success_threshold, 3);
        assert_eq!(breaker.config().recovery_timeout_secs, 5.0);
    }

    #[test]
    fn test_builder_with_open_callback() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let opened = Arc::new(AtomicBool::new(false));
        let opened_clone = opened.clone();

        let breaker = BreakerBuilder::new("test")
            .failure_threshold(2)
            .on_open(move |_name| {
                opened_clone.store(true, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        let _ = breaker.call(|| Err::<(), _>("error 1"));
        assert!(!opened.load(Ordering::SeqCst));
        let _ = breaker.call(|| Err::<(), _>("error 2"));

        assert!(opened.load(Ordering::SeqCst));
    }
}
