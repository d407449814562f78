//! Fault breaker built on a state machine
//!
//! One `FaultBreaker` guards one downstream dependency. It counts
//! consecutive failures while closed, fails fast while open, and admits
//! a single recovery probe at a time while half-open.

use crate::{
    callbacks::Callbacks,
    clock::{Clock, MonotonicClock},
    errors::{BreakerError, ConfigError},
};
use serde::{Deserialize, Serialize};
use state_machines::state_machine;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerConfig {
    /// Consecutive failures required to open the breaker
    pub failure_threshold: usize,

    /// Consecutive probe successes required in HalfOpen to close the breaker
    pub success_threshold: usize,

    /// Minimum time in seconds the breaker stays open before probing
    pub recovery_timeout_secs: f64,

    /// Jitter factor for the recovery timeout (0.0 = none, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout_secs: 60.0,
            jitter_factor: 0.0,
        }
    }
}

impl BreakerConfig {
    /// Reject configurations the state machine cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidThreshold {
                field: "failure_threshold",
            });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::InvalidThreshold {
                field: "success_threshold",
            });
        }
        let timeout = self.recovery_timeout_secs;
        if !timeout.is_finite() || timeout <= 0.0 || timeout > Duration::MAX.as_secs_f64() {
            return Err(ConfigError::InvalidTimeout(timeout));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidJitter(self.jitter_factor));
        }
        Ok(())
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.recovery_timeout_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// Health assessment of a protected dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }

    fn from_machine(name: &str) -> Self {
        match name {
            "Open" => BreakerState::Open,
            "HalfOpen" => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker, for health endpoints and logs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: BreakerState,
    pub failure_count: usize,
    pub success_count: usize,
    /// Remaining wait before a probe is admitted; only set while open
    pub retry_in: Option<Duration>,
}

/// Breaker context - shared data across all states
#[derive(Clone)]
pub struct BreakerContext {
    pub dependency: String,
    pub config: BreakerConfig,
    pub clock: Arc<dyn Clock>,
    /// Consecutive failures; shared with the machine's copy of the context
    pub failures: Arc<AtomicUsize>,
}

impl Default for BreakerContext {
    fn default() -> Self {
        Self {
            dependency: String::new(),
            config: BreakerConfig::default(),
            clock: Arc::new(MonotonicClock::new()),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl fmt::Debug for BreakerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerContext")
            .field("dependency", &self.dependency)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("failures", &self.failures.load(Ordering::Relaxed))
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    /// Clock reading at which a probe may be admitted
    pub next_attempt_at: f64,
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    pub consecutive_successes: usize,
    pub probe_in_flight: bool,
}

state_machine! {
    name: Circuit,
    context: BreakerContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [timeout_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

impl Circuit<Closed> {
    fn should_open(&self, ctx: &BreakerContext) -> bool {
        ctx.failures.load(Ordering::Relaxed) >= ctx.config.failure_threshold
    }
}

impl Circuit<HalfOpen> {
    /// Any failed probe reopens the breaker
    fn should_open(&self, _ctx: &BreakerContext) -> bool {
        true
    }

    fn should_close(&self, ctx: &BreakerContext) -> bool {
        self.state_data_half_open()
            .is_some_and(|data| data.consecutive_successes >= ctx.config.success_threshold)
    }
}

impl Circuit<Open> {
    fn timeout_elapsed(&self, ctx: &BreakerContext) -> bool {
        self.state_data_open()
            .is_some_and(|data| ctx.clock.now() >= data.next_attempt_at)
    }
}

struct Inner {
    machine: DynamicCircuit,
    /// Bumped on every transition and reset; outcomes admitted under an
    /// older epoch no longer describe the current state and are dropped
    epoch: u64,
}

/// Circuit breaker guarding a single downstream dependency
///
/// # Example
///
/// ```rust
/// use storefront_resilience::{BreakerError, FaultBreaker};
///
/// let breaker = FaultBreaker::builder("inventory_db")
///     .failure_threshold(3)
///     .recovery_timeout_secs(30.0)
///     .build()
///     .unwrap();
///
/// for _ in 0..3 {
///     let _ = breaker.call(|| Err::<(), _>("connection refused"));
/// }
///
/// let result = breaker.call(|| Ok::<_, &str>("never runs"));
/// assert!(matches!(result, Err(BreakerError::Open { .. })));
/// ```
pub struct FaultBreaker {
    inner: Mutex<Inner>,
    context: BreakerContext,
    callbacks: Callbacks,
}

impl FaultBreaker {
    /// Create a breaker with the given configuration (use builder() for hooks)
    pub fn new(dependency: impl Into<String>, config: BreakerConfig) -> Result<Self, ConfigError> {
        Self::builder(dependency).config(config).build()
    }

    pub(crate) fn with_context_and_callbacks(
        context: BreakerContext,
        callbacks: Callbacks,
    ) -> Self {
        let machine = DynamicCircuit::new(context.clone());

        Self {
            inner: Mutex::new(Inner { machine, epoch: 0 }),
            context,
            callbacks,
        }
    }

    pub fn builder(dependency: impl Into<String>) -> crate::builder::BreakerBuilder {
        crate::builder::BreakerBuilder::new(dependency)
    }

    /// Run an asynchronous operation under breaker protection
    ///
    /// The operation is only invoked when the breaker admits the call. Its
    /// error, if any, comes back as [`BreakerError::Dependency`] unchanged.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.admit()?;
        let outcome = operation().await;
        self.settle(permit, outcome)
    }

    /// Run a blocking operation under breaker protection
    pub fn call<F, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.admit()?;
        let outcome = operation();
        self.settle(permit, outcome)
    }

    pub fn dependency(&self) -> &str {
        &self.context.dependency
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.context.config
    }

    /// Current state; an elapsed open breaker moves to HalfOpen on the next call, not here
    pub fn state(&self) -> BreakerState {
        BreakerState::from_machine(self.lock().machine.current_state())
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == BreakerState::Closed
    }

    pub fn failure_count(&self) -> usize {
        self.context.failures.load(Ordering::Relaxed)
    }

    pub fn success_count(&self) -> usize {
        self.lock()
            .machine
            .half_open_data()
            .map(|data| data.consecutive_successes)
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let state = BreakerState::from_machine(inner.machine.current_state());
        let success_count = inner
            .machine
            .half_open_data()
            .map(|data| data.consecutive_successes)
            .unwrap_or(0);
        let retry_in = inner
            .machine
            .open_data()
            .map(|data| self.remaining(data.next_attempt_at));

        BreakerSnapshot {
            dependency: self.context.dependency.clone(),
            state,
            failure_count: self.failure_count(),
            success_count,
            retry_in,
        }
    }

    /// Force the breaker Closed with both counters at zero
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.machine = DynamicCircuit::new(self.context.clone());
        inner.epoch += 1;
        self.context.failures.store(0, Ordering::Relaxed);
        tracing::info!(dependency = %self.context.dependency, "breaker manually reset");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remaining(&self, deadline: f64) -> Duration {
        Duration::try_from_secs_f64((deadline - self.context.clock.now()).max(0.0))
            .unwrap_or(Duration::MAX)
    }

    /// Decide whether a call may run, moving Open -> HalfOpen once the deadline passes
    fn admit<E>(&self) -> Result<Permit<'_>, BreakerError<E>> {
        let mut entered_half_open = false;

        let permit = {
            let mut inner = self.lock();

            if inner.machine.current_state() == "Open"
                && inner.machine.handle(CircuitEvent::AttemptReset).is_ok()
            {
                inner.epoch += 1;
                entered_half_open = true;
                tracing::info!(
                    dependency = %self.context.dependency,
                    "breaker half-open, admitting recovery probe"
                );
            }

            let epoch = inner.epoch;
            match inner.machine.current_state() {
                "Open" => {
                    let retry_in = inner
                        .machine
                        .open_data()
                        .map(|data| self.remaining(data.next_attempt_at))
                        .unwrap_or_default();
                    tracing::debug!(
                        dependency = %self.context.dependency,
                        retry_in_ms = retry_in.as_millis() as u64,
                        "breaker open, failing fast"
                    );
                    return Err(BreakerError::Open {
                        dependency: self.context.dependency.clone(),
                        retry_in,
                    });
                }
                "HalfOpen" => {
                    let data = inner.machine.half_open_data_mut();
                    match data {
                        Some(data) if data.probe_in_flight => {
                            return Err(BreakerError::ProbeInFlight {
                                dependency: self.context.dependency.clone(),
                            });
                        }
                        Some(data) => data.probe_in_flight = true,
                        None => {}
                    }
                    Permit::new(self, epoch, true)
                }
                _ => Permit::new(self, epoch, false),
            }
        };

        if entered_half_open {
            self.callbacks
                .trigger(BreakerState::HalfOpen, &self.context.dependency);
        }

        Ok(permit)
    }

    fn settle<T, E>(&self, mut permit: Permit<'_>, outcome: Result<T, E>) -> Result<T, BreakerError<E>> {
        permit.settled = true;

        let entered = match &outcome {
            Ok(_) => self.on_success(permit.epoch, permit.probe),
            Err(_) => self.on_failure(permit.epoch, permit.probe),
        };

        if let Some(state) = entered {
            self.callbacks.trigger(state, &self.context.dependency);
        }

        outcome.map_err(BreakerError::Dependency)
    }

    fn on_success(&self, epoch: u64, probe: bool) -> Option<BreakerState> {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return None;
        }

        match inner.machine.current_state() {
            "Closed" => {
                self.context.failures.store(0, Ordering::Relaxed);
                None
            }
            "HalfOpen" => {
                if let Some(data) = inner.machine.half_open_data_mut() {
                    if probe {
                        data.probe_in_flight = false;
                    }
                    data.consecutive_successes += 1;
                }

                if inner.machine.handle(CircuitEvent::Close).is_ok() {
                    inner.epoch += 1;
                    self.context.failures.store(0, Ordering::Relaxed);
                    tracing::info!(dependency = %self.context.dependency, "breaker recovered, closed");
                    Some(BreakerState::Closed)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn on_failure(&self, epoch: u64, probe: bool) -> Option<BreakerState> {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return None;
        }

        let failures = self.context.failures.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            dependency = %self.context.dependency,
            failures,
            threshold = self.context.config.failure_threshold,
            "dependency call failed"
        );

        if probe && let Some(data) = inner.machine.half_open_data_mut() {
            data.probe_in_flight = false;
        }

        if inner.machine.handle(CircuitEvent::Trip).is_ok() {
            let timeout = self.mark_open(&mut inner);
            tracing::warn!(
                dependency = %self.context.dependency,
                failures,
                open_for_secs = timeout,
                "breaker tripped, failing fast"
            );
            Some(BreakerState::Open)
        } else {
            None
        }
    }

    /// Apply Open-state bookkeeping; returns the recovery timeout applied
    fn mark_open(&self, inner: &mut Inner) -> f64 {
        let config = &self.context.config;

        // Apply jitter using chrono-machines if jitter_factor > 0
        let timeout_secs = if config.jitter_factor > 0.0 {
            let base_ms = (config.recovery_timeout_secs * 1000.0) as u64;
            let policy = chrono_machines::Policy {
                max_attempts: 1,
                base_delay_ms: base_ms,
                multiplier: 1.0,
                max_delay_ms: base_ms,
            };
            (policy.calculate_delay(1, config.jitter_factor) as f64) / 1000.0
        } else {
            config.recovery_timeout_secs
        };

        if let Some(data) = inner.machine.open_data_mut() {
            data.next_attempt_at = self.context.clock.now() + timeout_secs;
        }
        inner.epoch += 1;
        timeout_secs
    }
}

impl fmt::Debug for FaultBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultBreaker")
            .field("dependency", &self.context.dependency)
            .field("state", &self.state())
            .field("config", &self.context.config)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// Admission ticket for one call
///
/// Dropping an unsettled probe permit (cancelled future, panicking
/// operation) frees the probe slot so the breaker cannot wedge half-open.
struct Permit<'a> {
    breaker: &'a FaultBreaker,
    epoch: u64,
    probe: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a FaultBreaker, epoch: u64, probe: bool) -> Self {
        Self {
            breaker,
            epoch,
            probe,
            settled: false,
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.settled || !self.probe {
            return;
        }
        let mut inner = self.breaker.lock();
        if inner.epoch == self.epoch
            && let Some(data) = inner.machine.half_open_data_mut()
        {
            data.probe_in_flight = false;
        }
    }
}
