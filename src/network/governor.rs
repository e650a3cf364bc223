//! Resilience governor.
//!
//! Every call that may be slow or may fault on hostile input goes through
//! here. The caller always gets an [`Outcome`] back within the deadline; a
//! panic inside the wrapped work becomes [`Outcome::Faulted`] instead of
//! taking the connection task down.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::throttle::{BreakerLimits, CircuitBreaker, Refusal};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    TimedOut,
    Faulted,
    Cancelled,
    ShortCircuited(Refusal),
}

impl<T> Outcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Governor {
    breaker: CircuitBreaker,
}

impl Governor {
    pub fn new(limits: BreakerLimits) -> Self {
        Self { breaker: CircuitBreaker::new(limits) }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Runs CPU-bound `work` on the blocking pool under the breaker.
    ///
    /// `work` receives the absolute deadline and should stop early once it
    /// passes. The breaker slot is held until `work` actually returns, so an
    /// abandoned run still counts against the cap.
    pub async fn run_expensive<T, F>(
        &self,
        origin: &str,
        deadline: Duration,
        cancel: &CancellationToken,
        work: F,
    ) -> Outcome<T>
    where
        T: Send + 'static,
        F: FnOnce(Instant) -> T + Send + 'static,
    {
        let permit = match self.breaker.try_acquire(origin) {
            Ok(p) => p,
            Err(refusal) => return Outcome::ShortCircuited(refusal),
        };
        let deadline_at = Instant::now() + deadline;
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work(deadline_at)
        });

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("[governor] [cancelled] origin={}", origin);
                Outcome::Cancelled
            }
            joined = tokio::time::timeout(deadline, handle) => match joined {
                Err(_) => {
                    tracing::warn!("[governor] [timeout] origin={} deadline_ms={}", origin, deadline.as_millis());
                    Outcome::TimedOut
                }
                Ok(Err(e)) => {
                    tracing::error!("[governor] [fault] origin={} err={}", origin, e);
                    Outcome::Faulted
                }
                Ok(Ok(v)) => Outcome::Completed(v),
            },
        }
    }

    /// Runs an async call with a deadline and a fault boundary.
    ///
    /// The call runs on its own task, which is aborted on timeout or
    /// cancellation. Not subject to the breaker.
    pub async fn call<T, Fut>(&self, deadline: Duration, cancel: &CancellationToken, fut: Fut) -> Outcome<T>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut handle = tokio::spawn(fut);
        tokio::select! {
            _ = cancel.cancelled() => {
                handle.abort();
                Outcome::Cancelled
            }
            joined = tokio::time::timeout(deadline, &mut handle) => match joined {
                Err(_) => {
                    handle.abort();
                    tracing::warn!("[governor] [timeout] call deadline_ms={}", deadline.as_millis());
                    Outcome::TimedOut
                }
                Ok(Err(e)) => {
                    tracing::error!("[governor] [fault] call err={}", e);
                    Outcome::Faulted
                }
                Ok(Ok(v)) => Outcome::Completed(v),
            },
        }
    }
}
