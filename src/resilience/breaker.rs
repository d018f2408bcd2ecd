//! Circuit breaker guarding calls to an external actor.
//!
//! Classic three-state machine: `Closed` (normal operation), `Open` (failing
//! fast), `HalfOpen` (testing recovery). One instance guards one logical
//! dependency; state is atomic, timing comes from the injected clock, and
//! every attempted call is bounded by a per-call timeout.

use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, calls pass through.
    Closed = 0,
    /// Failing fast, calls are rejected without executing.
    Open = 1,
    /// Testing recovery with live calls.
    HalfOpen = 2,
}

impl From<u8> for BreakerState {
    fn from(value: u8) -> Self {
        match value {
            0 => BreakerState::Closed,
            2 => BreakerState::HalfOpen,
            // Unknown encodings fall back to the safest state.
            _ => BreakerState::Open,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in `Closed` that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive successes in `HalfOpen` that close it again.
    pub success_threshold: u32,
    /// Upper bound on each attempted call; exceeding it counts as a failure.
    pub per_call_timeout: Duration,
    /// How long the circuit stays open before the next probe is allowed.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            per_call_timeout: Duration::from_secs(5),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Breaker outcomes are tagged so callers can pattern-match instead of
/// inspecting error text: the breaker's own signals (`Open`, `Timeout`) are
/// structurally distinct from whatever the wrapped operation failed with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BreakerError<E> {
    #[error("circuit `{name}` is open")]
    Open { name: &'static str },
    #[error("call through circuit `{name}` timed out")]
    Timeout { name: &'static str },
    #[error("{0}")]
    Upstream(E),
}

pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    /// Epoch millis after which an open circuit admits a probe. Zero while
    /// the circuit is not open.
    next_attempt_at_millis: AtomicU64,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig, clock: SharedClock) -> Self {
        info!(
            target = "cenere::breaker",
            circuit = name,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );
        Self {
            name,
            config,
            state: AtomicU8::new(BreakerState::Closed as u8),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            next_attempt_at_millis: AtomicU64::new(0),
            clock,
        }
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from(self.state.load(Ordering::Acquire))
    }

    /// Execute `operation` under breaker protection. While the circuit is
    /// open and the reset timeout has not elapsed, this rejects immediately
    /// without invoking the operation. Attempted calls race the per-call
    /// timeout; the timer is dropped as soon as either side settles.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow_call() {
            counter!("cenere_breaker_rejected_total", "circuit" => self.name).increment(1);
            return Err(BreakerError::Open { name: self.name });
        }

        match timeout(self.config.per_call_timeout, operation()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(error)) => {
                self.record_failure("upstream_error");
                Err(BreakerError::Upstream(error))
            }
            Err(_elapsed) => {
                self.record_failure("timeout");
                Err(BreakerError::Timeout { name: self.name })
            }
        }
    }

    fn allow_call(&self) -> bool {
        match self.state() {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let next_attempt = self.next_attempt_at_millis.load(Ordering::Acquire);
                if self.clock.now_millis() >= next_attempt {
                    self.transition_to_half_open();
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        match self.state() {
            BreakerState::Closed => {
                // Any success wipes the consecutive-failure streak.
                self.failure_count.store(0, Ordering::Relaxed);
            }
            BreakerState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
                if successes >= self.config.success_threshold {
                    self.transition_to_closed();
                }
            }
            BreakerState::Open => {
                // A call admitted just before the circuit opened; ignore.
            }
        }
    }

    fn record_failure(&self, cause: &'static str) {
        debug!(
            target = "cenere::breaker",
            circuit = self.name,
            cause,
            "Protected call failed"
        );
        match self.state() {
            BreakerState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to_open();
                }
            }
            BreakerState::HalfOpen => {
                // One failed probe is enough evidence the dependency is
                // still down.
                self.transition_to_open();
            }
            BreakerState::Open => {}
        }
    }

    fn transition_to_closed(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.next_attempt_at_millis.store(0, Ordering::Release);
        self.state
            .store(BreakerState::Closed as u8, Ordering::Release);
        counter!("cenere_breaker_transition_total", "circuit" => self.name, "state" => "closed")
            .increment(1);
        info!(
            target = "cenere::breaker",
            circuit = self.name,
            "Circuit breaker closed (recovered)"
        );
    }

    fn transition_to_open(&self) {
        let next_attempt = self.clock.now_millis() + self.config.reset_timeout.as_millis() as u64;
        self.next_attempt_at_millis
            .store(next_attempt, Ordering::Release);
        self.success_count.store(0, Ordering::Relaxed);
        self.state.store(BreakerState::Open as u8, Ordering::Release);
        counter!("cenere_breaker_transition_total", "circuit" => self.name, "state" => "open")
            .increment(1);
        warn!(
            target = "cenere::breaker",
            circuit = self.name,
            failures = self.failure_count.load(Ordering::Relaxed),
            reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
            "Circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self) {
        self.success_count.store(0, Ordering::Relaxed);
        self.state
            .store(BreakerState::HalfOpen as u8, Ordering::Release);
        counter!("cenere_breaker_transition_total", "circuit" => self.name, "state" => "half_open")
            .increment(1);
        info!(
            target = "cenere::breaker",
            circuit = self.name,
            success_threshold = self.config.success_threshold,
            "Circuit breaker half-open (testing recovery)"
        );
    }
}
