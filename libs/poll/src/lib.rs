//! Bounded polling primitives.
//!
//! Every wait in the harness goes through [`poll`]: a probe is evaluated up to
//! `max_attempts` times with a fixed `interval` between attempts. Key concepts:
//!
//! - **Ready**: the probe observed what it was waiting for and yields a value.
//! - **Pending**: the observation is not there yet (transient absence); the
//!   reason is kept so an exhausted poll can report what it last saw.
//! - **Aborted**: the probe hit an error that retrying cannot fix.
//!
//! # Invariants
//!
//! - A poll never blocks longer than `interval * (max_attempts - 1)` plus the
//!   time spent inside the probe itself
//! - At least one attempt is always made
//! - No sleep happens after the final attempt

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default interval between attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default attempt bound.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 12;

/// Polling errors.
#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The probe stayed pending for every attempt.
    #[error("gave up waiting for {what} after {attempts} attempts ({elapsed:?}): {last}")]
    Exhausted {
        what: String,
        attempts: u32,
        elapsed: Duration,
        last: String,
    },

    /// The probe failed with a non-retryable error.
    #[error("{what} aborted: {source}")]
    Aborted {
        what: String,
        #[source]
        source: E,
    },
}

impl<E> PollError<E> {
    /// Returns true if the poll ran out of attempts.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Converts an abort into the probe's own error, leaving exhaustion as-is.
    pub fn into_abort(self) -> Result<Self, E> {
        match self {
            Self::Aborted { source, .. } => Err(source),
            other => Ok(other),
        }
    }
}

/// Single observation made by a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The awaited condition holds.
    Ready(T),

    /// Not there yet, with a description of what was observed.
    Pending(String),
}

impl<T> Probe<T> {
    /// Shorthand for a pending observation.
    pub fn pending(reason: impl Into<String>) -> Self {
        Self::Pending(reason.into())
    }

    /// Returns true if the probe is ready.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Fixed-interval, bounded-attempt polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between consecutive attempts.
    pub interval: Duration,

    /// Maximum number of probe evaluations (at least one is always made).
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PollPolicy {
    /// Create a policy from an interval and attempt bound.
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Single attempt, no waiting.
    pub const fn once() -> Self {
        Self {
            interval: Duration::ZERO,
            max_attempts: 1,
        }
    }

    /// Policy that keeps polling at `interval` until roughly `timeout` has passed.
    pub fn within(timeout: Duration, interval: Duration) -> Self {
        if interval.is_zero() {
            return Self::once();
        }
        let steps = timeout.as_millis().div_ceil(interval.as_millis().max(1));
        let max_attempts = u32::try_from(steps).unwrap_or(u32::MAX).saturating_add(1);
        Self {
            interval,
            max_attempts,
        }
    }

    /// Effective attempt count.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Total time spent sleeping if every attempt stays pending.
    pub fn budget(&self) -> Duration {
        self.interval * (self.attempts() - 1)
    }
}

/// Evaluate `probe` until it is ready, it aborts, or the policy is exhausted.
///
/// The probe receives the 1-based attempt number.
pub async fn poll<T, E, F, Fut>(what: &str, policy: PollPolicy, mut probe: F) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Probe<T>, E>>,
{
    let started = Instant::now();
    let attempts = policy.attempts();
    let mut last = String::from("no observation");

    for attempt in 1..=attempts {
        match probe(attempt).await {
            Ok(Probe::Ready(value)) => {
                debug!(what, attempt, elapsed = ?started.elapsed(), "Poll satisfied");
                return Ok(value);
            }
            Ok(Probe::Pending(reason)) => {
                debug!(what, attempt, max_attempts = attempts, reason = %reason, "Not ready yet");
                last = reason;
            }
            Err(source) => {
                return Err(PollError::Aborted {
                    what: what.to_string(),
                    source,
                });
            }
        }

        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    let elapsed = started.elapsed();
    warn!(what, attempts, elapsed = ?elapsed, last = %last, "Poll exhausted");
    Err(PollError::Exhausted {
        what: what.to_string(),
        attempts,
        elapsed,
        last,
    })
}
