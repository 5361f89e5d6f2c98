// services/circuit_breaker.rs
//! Consecutive-failure breaker guarding one provider operation.
//!
//! Closed: calls pass. Open: calls are refused until the cooldown has elapsed
//! since opening, at which point the next `allow()` half-opens the breaker by
//! clearing its failure count and letting the call through.
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub name: &'static str,
    pub open: bool,
    pub failures: u32,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub cooldown_remaining_secs: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker {
            name,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    // The state is two plain fields; a panic elsewhere cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub(crate) fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.lock();
        let Some(opened_at) = state.opened_at else {
            return true;
        };

        if now.saturating_duration_since(opened_at) >= self.cooldown {
            state.opened_at = None;
            state.consecutive_failures = 0;
            warn!(breaker = self.name, "Circuit breaker half-open after cooldown, allowing probe");
            return true;
        }

        error!(breaker = self.name, "Circuit breaker open, request blocked");
        false
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.is_open() {
            info!(breaker = self.name, "Circuit breaker closed by success");
        }
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub(crate) fn record_failure_at(&self, now: Instant) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.failure_threshold && !state.is_open() {
            state.opened_at = Some(now);
            error!(
                breaker = self.name,
                failures = state.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit breaker opened"
            );
        }
    }

    /// Operator reset: back to closed with a clean count.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.opened_at = None;
        info!(breaker = self.name, "Circuit breaker manually reset");
    }

    pub fn status(&self) -> BreakerStatus {
        self.status_at(Instant::now())
    }

    pub(crate) fn status_at(&self, now: Instant) -> BreakerStatus {
        let state = self.lock();
        let remaining = state
            .opened_at
            .map(|opened_at| self.cooldown.saturating_sub(now.saturating_duration_since(opened_at)))
            .unwrap_or_default();

        BreakerStatus {
            name: self.name,
            open: state.is_open(),
            failures: state.consecutive_failures,
            failure_threshold: self.failure_threshold,
            cooldown_secs: self.cooldown.as_secs(),
            cooldown_remaining_secs: remaining.as_secs(),
        }
    }
}
