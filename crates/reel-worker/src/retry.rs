//! Bounded retries for side effects that must not fail a stage.
//!
//! Trigger emission, publish markers, archive copies and consumed-object
//! deletes all go through [`with_backoff`]; a final failure is logged by the
//! caller and the stage still reports its primary outcome.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

/// Attempt budget and delay curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts, the first one included. Never below 1.
    pub attempts: u32,
    /// Pause after the first failure; doubled after each later one.
    pub initial: Duration,
    pub ceiling: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 4,
            initial: Duration::from_millis(100),
            ceiling: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    /// Pause after the `failures`-th consecutive failure (1-based).
    fn pause_after(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.ceiling)
    }
}

/// Run `op` until it succeeds, `retryable` rejects the error, or the budget
/// runs out. The last error is returned as is.
pub async fn with_backoff<T, E, F, Fut, R>(
    backoff: &Backoff,
    what: &str,
    retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let mut failures = 0u32;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        failures += 1;

        if !retryable(&err) {
            debug!("{}: not retrying: {}", what, err);
            return Err(err);
        }
        if failures >= backoff.attempts.max(1) {
            debug!("{}: giving up after {} attempts: {}", what, failures, err);
            return Err(err);
        }

        let pause = backoff.pause_after(failures);
        debug!("{}: attempt {} failed, next in {:?}: {}", what, failures, pause, err);
        tokio::time::sleep(pause).await;
    }
}

/// Keeps a background loop that fails on every tick from flooding the log.
///
/// The first `budget` consecutive failures are logged, the rest are counted
/// silently until the loop recovers.
#[derive(Debug)]
pub struct LogThrottle {
    budget: u32,
    streak: u32,
}

impl LogThrottle {
    pub fn new(budget: u32) -> Self {
        Self { budget, streak: 0 }
    }

    /// Count a failure; `true` when this one should be logged.
    pub fn failed(&mut self) -> bool {
        self.streak = self.streak.saturating_add(1);
        if self.streak == self.budget + 1 {
            warn!("{} consecutive failures, muting until recovery", self.budget);
        }
        self.streak <= self.budget
    }

    pub fn recovered(&mut self) {
        if self.streak > self.budget {
            info!("Recovered after {} consecutive failures", self.streak);
        }
        self.streak = 0;
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }
}
