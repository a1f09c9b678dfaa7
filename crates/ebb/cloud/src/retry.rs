//! Bounded retry and polling loops
//!
//! Every wait in Ebb has a maximum attempt count and a total timeout after
//! which it fails explicitly. Nothing blocks indefinitely.

use crate::error::Transience;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Exponential backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (at least one is always made)
    pub max_attempts: u32,

    /// Delay after the first failed attempt (milliseconds)
    pub initial_delay_ms: u64,

    /// Upper bound for a single delay (milliseconds)
    pub max_delay_ms: u64,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Deadline for the whole loop, delays included (milliseconds)
    pub total_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            total_timeout_ms: 120_000,
        }
    }
}

impl RetryPolicy {
    /// Policy without delays, mostly for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
            total_timeout_ms: 60_000,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(millis.min(self.max_delay_ms as f64) as u64)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }
}

/// Why a retried call gave up
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("{operation} failed permanently: {error}")]
    Permanent { operation: String, error: E },

    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: E,
    },

    #[error("{operation} timed out after {attempts} attempts")]
    TimedOut { operation: String, attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { .. } => 1,
            RetryError::Exhausted { attempts, .. } | RetryError::TimedOut { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The underlying error, if one was observed
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Permanent { error, .. } => Some(error),
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::TimedOut { .. } => None,
        }
    }
}

/// Run `f` until it succeeds, retrying transient errors with backoff
///
/// Permanent errors are returned after the first attempt.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transience + fmt::Display,
{
    let deadline = Instant::now() + policy.total_timeout();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let result = match tokio::time::timeout(remaining, f()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, attempt, "Call exceeded total retry timeout");
                return Err(RetryError::TimedOut {
                    operation: operation.to_string(),
                    attempts: attempt,
                });
            }
        };

        let error = match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if !error.is_transient() => {
                return Err(RetryError::Permanent {
                    operation: operation.to_string(),
                    error,
                });
            }
            Err(error) => error,
        };

        let delay = policy.delay_for(attempt);
        if attempt >= max_attempts || Instant::now() + delay >= deadline {
            warn!(operation, attempts = attempt, error = %error, "Retries exhausted");
            return Err(RetryError::Exhausted {
                operation: operation.to_string(),
                attempts: attempt,
                last: error,
            });
        }

        warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// A polling loop gave up without reaching the desired condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollError<P> {
    /// Attempts made
    pub attempts: u32,

    /// Last observation, if any attempt completed
    pub last: Option<P>,

    /// True when the total timeout (rather than the attempt budget) ended the loop
    pub timed_out: bool,
}

/// Poll `f` until it returns `Ok`, backing off between attempts
///
/// `f` receives the 1-based attempt number. `Err(p)` means "not yet" with
/// observation `p`. On success returns the value and the attempt count.
pub async fn poll_until<T, P, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut f: F,
) -> Result<(T, u32), PollError<P>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, P>>,
    P: fmt::Debug,
{
    let deadline = Instant::now() + policy.total_timeout();
    let max_attempts = policy.max_attempts.max(1);
    let mut last = None;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, f(attempt)).await {
            Ok(Ok(value)) => {
                debug!(what, attempt, "Poll condition reached");
                return Ok((value, attempt));
            }
            Ok(Err(observation)) => {
                debug!(what, attempt, observation = ?observation, "Poll condition not reached");
                last = Some(observation);
            }
            Err(_) => {
                return Err(PollError {
                    attempts: attempt,
                    last,
                    timed_out: true,
                });
            }
        }

        let delay = policy.delay_for(attempt);
        if attempt >= max_attempts {
            return Err(PollError {
                attempts: attempt,
                last,
                timed_out: false,
            });
        }
        if Instant::now() + delay >= deadline {
            return Err(PollError {
                attempts: attempt,
                last,
                timed_out: true,
            });
        }
        tokio::time::sleep(delay).await;
    }
}
