//! Error taxonomy for engine operations
//!
//! Every failure maps to exactly one variant so a scenario can tell "the
//! cluster never converged" apart from "the call itself failed".

use crate::config::ConfigError;
use crate::wait::WaitError;
use std::time::Duration;

/// Errors from engine operations
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    #[error("ambiguous result: {0}")]
    AmbiguousResult(String),

    #[error("pod '{pod}' has {} containers ({}), specify one", containers.len(), containers.join(", "))]
    AmbiguousTarget { pod: String, containers: Vec<String> },

    #[error("replicas must be non-negative, got {0}")]
    InvalidReplicaCount(i64),

    #[error("{0}")]
    ConvergenceTimeout(#[from] WaitError),

    #[error("command in pod '{pod}' did not finish within {timeout:?}")]
    ExecTimeout { pod: String, timeout: Duration },

    #[error("Kubernetes API error: {0}")]
    Connection(String),

    #[error("conflicting modification: {0}")]
    Conflict(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ProbeError {
    pub(crate) fn not_found(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Failures a poller may retry: the API server could not be observed,
    /// which says nothing about the resource itself
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short tag naming the failure kind, used in scenario reports
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::AmbiguousResult(_) => "AmbiguousResult",
            Self::AmbiguousTarget { .. } => "AmbiguousTarget",
            Self::InvalidReplicaCount(_) => "InvalidReplicaCount",
            Self::ConvergenceTimeout(_) => "ConvergenceTimeout",
            Self::ExecTimeout { .. } => "ExecTimeout",
            Self::Connection(_) => "ConnectionError",
            Self::Conflict(_) => "ConflictError",
            Self::Cancelled => "Cancelled",
            Self::Config(_) => "ConfigError",
        }
    }
}
