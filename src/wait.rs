//! Rich wait errors with debugging context
//!
//! Carries the last observed state of a resource when a verification wait
//! gives up, so a scenario can report what the cluster actually looked like.
//!
//! # Example
//!
//! ```ignore
//! match ctx.set_replicas(WorkloadKind::StatefulSet, "cassandra", "cassandra-ns", 3, true).await {
//!     Err(ProbeError::ConvergenceTimeout(err)) => {
//!         println!("Resource: {}", err.resource);
//!         println!("Last state: {}", err.last_state);
//!         println!("Attempts: {}", err.attempts);
//!     }
//!     _ => {}
//! }
//! ```

use crate::model::{PodRef, WorkloadRef};
use std::fmt;
use std::time::Duration;

/// Rich error context for wait operations
#[derive(Debug, Clone)]
pub struct WaitError {
    /// Resource reference (e.g., "statefulset/cassandra")
    pub resource: String,
    /// Description of the last observed state
    pub last_state: String,
    /// Number of observations made
    pub attempts: u32,
    /// How long we waited before giving up
    pub elapsed: Duration,
    /// The timeout that was configured
    pub timeout: Duration,
}

impl WaitError {
    /// Create a new `WaitError`
    pub fn new(resource: impl Into<String>, timeout: Duration, elapsed: Duration) -> Self {
        Self {
            resource: resource.into(),
            last_state: "unknown".to_string(),
            attempts: 0,
            elapsed,
            timeout,
        }
    }

    /// Set the last observed state
    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.last_state = state.into();
        self
    }

    /// Record how many observations were made
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Wait timeout for {}", self.resource)?;
        writeln!(f, "├─ Last state: {}", self.last_state)?;
        writeln!(f, "├─ Attempts: {}", self.attempts)?;
        writeln!(f, "├─ Elapsed: {:?}", self.elapsed)?;
        write!(f, "└─ Timeout: {:?}", self.timeout)
    }
}

impl std::error::Error for WaitError {}

/// Human-readable state of an observed snapshot
pub trait ResourceState {
    fn state_description(&self) -> String;
}

impl ResourceState for WorkloadRef {
    fn state_description(&self) -> String {
        format!(
            "{}/{} ready, {} current, {} available",
            self.ready_replicas, self.desired_replicas, self.current_replicas, self.available_replicas
        )
    }
}

impl ResourceState for PodRef {
    fn state_description(&self) -> String {
        let mut state = format!("phase={}, ready={}", self.phase, self.ready);
        if self.terminating {
            state.push_str(", terminating");
        }
        state
    }
}
