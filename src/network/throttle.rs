//! Circuit breaker for expensive work
//!
//! Two independent guards protect the heuristic key-detection path:
//! a global cap on concurrent runs and a per-origin cooldown. State lives in
//! an owned [`CircuitBreaker`] that the server injects where needed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Process-wide breaker counters. Never persisted.
#[derive(Debug)]
pub struct CircuitBreakerState {
    pub global_in_flight: usize,
    pub global_window_start: Instant,
    pub origin_cooldown_until: HashMap<String, Instant>,
}

/// Why the breaker refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    GlobalCap,
    OriginCooldown,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerLimits {
    pub max_in_flight: usize,
    pub origin_cooldown: Duration,
    /// How often expired cooldown entries are swept.
    pub window: Duration,
}

impl Default for BreakerLimits {
    fn default() -> Self {
        Self {
            max_in_flight: 5,
            origin_cooldown: Duration::from_secs(120),
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Arc<Mutex<CircuitBreakerState>>,
    limits: BreakerLimits,
}

/// Held while one expensive run is in flight; releases its slot on drop.
#[derive(Debug)]
pub struct BreakerPermit {
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.global_in_flight = state.global_in_flight.saturating_sub(1);
    }
}

impl CircuitBreaker {
    pub fn new(limits: BreakerLimits) -> Self {
        Self {
            state: Arc::new(Mutex::new(CircuitBreakerState {
                global_in_flight: 0,
                global_window_start: Instant::now(),
                origin_cooldown_until: HashMap::new(),
            })),
            limits,
        }
    }

    pub fn limits(&self) -> BreakerLimits {
        self.limits
    }

    /// Claims a slot for `origin`, or says why not.
    ///
    /// A granted request also starts the origin's cooldown.
    pub fn try_acquire(&self, origin: &str) -> Result<BreakerPermit, Refusal> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if now.duration_since(state.global_window_start) >= self.limits.window {
            state.origin_cooldown_until.retain(|_, until| *until > now);
            state.global_window_start = now;
        }

        if state.global_in_flight >= self.limits.max_in_flight {
            tracing::warn!(
                "[breaker] [global_cap] origin={} in_flight={}/{}",
                origin, state.global_in_flight, self.limits.max_in_flight
            );
            return Err(Refusal::GlobalCap);
        }
        if let Some(until) = state.origin_cooldown_until.get(origin) {
            if now < *until {
                tracing::warn!(
                    "[breaker] [cooldown] origin={} remaining_ms={}",
                    origin, until.duration_since(now).as_millis()
                );
                return Err(Refusal::OriginCooldown);
            }
        }

        state.global_in_flight += 1;
        if !self.limits.origin_cooldown.is_zero() {
            state
                .origin_cooldown_until
                .insert(origin.to_string(), now + self.limits.origin_cooldown);
        }
        Ok(BreakerPermit { state: Arc::clone(&self.state) })
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).global_in_flight
    }

    /// Origins currently tracked for cooldown.
    pub fn tracked_origins(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).origin_cooldown_until.len()
    }
}
