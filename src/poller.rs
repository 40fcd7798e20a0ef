//! Single polling primitive behind every verification wait
//!
//! Readiness checks, scaling convergence and pod removal all go through
//! [`Poller::wait_until`], so they share one retry policy.
//!
//! # Example
//!
//! ```ignore
//! let outcome = ctx
//!     .poller()
//!     .timeout(Duration::from_secs(120))
//!     .wait_until(move || async move {
//!         let workload = ctx.get_workload(WorkloadKind::StatefulSet, "cassandra", "cassandra-ns").await?;
//!         Ok((workload.ready_replicas == 3, workload))
//!     })
//!     .await?;
//!
//! if !outcome.satisfied {
//!     println!("last seen: {:?}", outcome.last_observed);
//! }
//! ```

use crate::config::PollConfig;
use crate::error::ProbeError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of one poller run
///
/// A timeout is not an error: `satisfied` is false and `last_observed` holds
/// whatever the predicate saw last, so the caller decides what it means.
/// The exception is a budget that runs out while the API cannot be reached;
/// see [`Poller::wait_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome<T> {
    pub satisfied: bool,
    /// `None` only when no observation ever succeeded
    pub last_observed: Option<T>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Repeatedly evaluates a predicate until it holds, the budget runs out, or
/// the run is cancelled
#[derive(Debug, Clone)]
pub struct Poller {
    config: PollConfig,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort with [`ProbeError::Cancelled`] once `token` fires
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Override the total budget for this run
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Override the delay between observations
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Run `predicate` until it reports `true`
    ///
    /// The predicate returns whether the condition holds together with the
    /// value it observed. The first attempt runs immediately. Transient errors
    /// ([`ProbeError::is_transient`]) are retried until
    /// `max_transient_errors` of them occur back to back; any other error ends
    /// the run at once. If the budget runs out while the latest attempt failed
    /// with a transient error, that error is returned instead of an
    /// unsatisfied outcome, since nothing current was observed.
    pub async fn wait_until<T, F, Fut>(&self, mut predicate: F) -> Result<PollOutcome<T>, ProbeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(bool, T), ProbeError>>,
    {
        let start = Instant::now();
        let mut attempts = 0u32;
        let mut consecutive_errors = 0u32;
        let mut last_observed = None;
        let mut last_error = None;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ProbeError::Cancelled);
            }

            attempts += 1;
            let observation = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ProbeError::Cancelled),
                result = predicate() => result,
            };

            match observation {
                Ok((true, value)) => {
                    debug!(attempts, elapsed = ?start.elapsed(), "Condition met");
                    return Ok(PollOutcome {
                        satisfied: true,
                        last_observed: Some(value),
                        attempts,
                        elapsed: start.elapsed(),
                    });
                }
                Ok((false, value)) => {
                    consecutive_errors = 0;
                    last_error = None;
                    last_observed = Some(value);
                }
                Err(err) if err.is_transient() => {
                    consecutive_errors += 1;
                    if consecutive_errors >= self.config.max_transient_errors {
                        warn!(
                            attempts,
                            consecutive_errors,
                            error = %err,
                            "Giving up after repeated API errors"
                        );
                        return Err(err);
                    }
                    debug!(attempts, consecutive_errors, error = %err, "Transient error, retrying");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }

            let elapsed = start.elapsed();
            if elapsed >= self.config.timeout {
                if let Some(err) = last_error {
                    warn!(
                        attempts,
                        consecutive_errors,
                        error = %err,
                        "Timed out while the API server was unreachable"
                    );
                    return Err(err);
                }
                debug!(attempts, elapsed = ?elapsed, "Condition not met before timeout");
                return Ok(PollOutcome {
                    satisfied: false,
                    last_observed,
                    attempts,
                    elapsed,
                });
            }

            let remaining = self.config.timeout - elapsed;
            let delay = (self.config.interval + self.jitter()).min(remaining);

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ProbeError::Cancelled),
                () = sleep(delay) => {}
            }
        }
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.config.jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
