//! Bounded waiting on observable cluster state.

use killpoint_core::CoreResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// How a wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The predicate held
    Satisfied {
        /// Time from first evaluation until success
        elapsed: Duration,
        /// Evaluations made, including the successful one
        attempts: u32,
    },
    /// The deadline passed first
    TimedOut {
        /// Time spent waiting
        elapsed: Duration,
        /// Evaluations made
        attempts: u32,
        /// Text of the most recent probe error, if any probe failed
        last_error: Option<String>,
    },
}

impl PollOutcome {
    /// Whether the predicate held before the deadline
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }

    /// Time spent
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Satisfied { elapsed, .. } | Self::TimedOut { elapsed, .. } => *elapsed,
        }
    }

    /// Number of evaluations
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Satisfied { attempts, .. } | Self::TimedOut { attempts, .. } => *attempts,
        }
    }

    /// Last probe error of a timed-out wait
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        match self {
            Self::TimedOut { last_error, .. } => last_error.as_deref(),
            Self::Satisfied { .. } => None,
        }
    }
}

/// Re-evaluates a predicate at a fixed interval until it holds or time runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    interval: Duration,
}

impl Poller {
    /// Create a poller
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Evaluation interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Evaluate `predicate` until it returns `Ok(true)` or `timeout` elapses.
    ///
    /// The predicate is always evaluated at least once. A probe error counts
    /// as "not yet": the cluster is expected to be briefly unreachable while
    /// a rank fails over. Running out of time is an outcome, not an error.
    pub async fn wait_until<F, Fut>(&self, what: &str, timeout: Duration, mut predicate: F) -> PollOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<bool>>,
    {
        let started = Instant::now();
        // a timeout past the clock's range never expires
        let deadline = started.checked_add(timeout);
        let mut attempts = 0u32;
        let mut last_error = None;

        loop {
            attempts += 1;
            match predicate().await {
                Ok(true) => {
                    let elapsed = started.elapsed();
                    debug!(what, attempts, elapsed_ms = elapsed.as_millis() as u64, "condition met");
                    return PollOutcome::Satisfied { elapsed, attempts };
                }
                Ok(false) => debug!(what, attempts, "condition not met yet"),
                Err(err) => {
                    debug!(what, attempts, error = %err, "probe failed");
                    last_error = Some(err.to_string());
                }
            }

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    return PollOutcome::TimedOut {
                        elapsed: now - started,
                        attempts,
                        last_error,
                    };
                }
                Some(deadline) => self.interval.min(deadline - now),
                None => self.interval,
            };
            tokio::time::sleep(pause).await;
        }
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
