//! Configuration types for kubeprobe
//!
//! Build them programmatically, or pick them up from the environment the
//! test harness was started with.
//!
//! # Example
//!
//! ```
//! use kubeprobe::config::{HarnessConfig, PollConfig};
//! use std::time::Duration;
//!
//! let config = HarnessConfig::new()
//!     .kubeconfig("/etc/kube/ci.yaml")
//!     .kube_context("ci")
//!     .namespace("cassandra-ns")
//!     .poll(PollConfig::default().interval(Duration::from_millis(500)));
//! ```
//!
//! # Environment variables
//!
//! | Variable | Meaning |
//! |---|---|
//! | `KUBECONFIG_FILE` | kubeconfig path (otherwise in-cluster config, `KUBECONFIG`, `~/.kube/config`) |
//! | `KUBECONFIG_CONTEXT` | kubeconfig context |
//! | `KUBEPROBE_NAMESPACE` | default namespace |
//! | `KUBEPROBE_POLL_INTERVAL_MS` | poll cadence |
//! | `KUBEPROBE_POLL_TIMEOUT_SECS` | default poll budget |
//! | `KUBEPROBE_POLL_JITTER_MS` | maximum random delay added to each poll sleep |
//! | `KUBEPROBE_EXEC_TIMEOUT_SECS` | hard exec timeout |
//! | `KUBEPROBE_SCALE_TIMEOUT_SECS` | scaling convergence budget |
//! | `KUBEPROBE_SCALE_DELTA` | replicas added/removed by relative scaling |

use std::str::FromStr;
use std::time::Duration;

/// Errors from reading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(String),
}

/// Polling cadence and budget for verification waits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between observations
    pub interval: Duration,
    /// Maximum total wait
    pub timeout: Duration,
    /// Upper bound of a random delay added to each sleep
    pub jitter: Duration,
    /// Consecutive transient API errors after which the error is surfaced
    pub max_transient_errors: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
            jitter: Duration::ZERO,
            max_transient_errors: 3,
        }
    }
}

impl PollConfig {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_transient_errors(mut self, count: u32) -> Self {
        self.max_transient_errors = count;
        self
    }
}

/// Remote command execution settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    /// The step fails with `ExecTimeout` once this elapses
    pub timeout: Duration,
    /// Interpreter used by `exec_shell`
    pub shell: String,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            shell: "/bin/sh".to_string(),
        }
    }
}

/// Scaling settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleConfig {
    /// Replicas added or removed by a relative scale
    pub delta: u32,
    /// Convergence budget when verification is requested
    pub timeout: Duration,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            delta: 1,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Pod deletion settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteConfig {
    /// Passed to the API server; `None` uses the pod's own grace period
    pub grace_period_seconds: Option<u32>,
    /// Budget for waiting until the pod is gone
    pub removal_timeout: Duration,
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            grace_period_seconds: None,
            removal_timeout: Duration::from_secs(60),
        }
    }
}

/// Full harness configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Kubeconfig path; `None` infers (in-cluster, `KUBECONFIG`, `~/.kube/config`)
    pub kubeconfig: Option<String>,
    /// Kubeconfig context
    pub kube_context: Option<String>,
    /// Default namespace; `None` takes the one from the kube config
    pub namespace: Option<String>,
    pub poll: PollConfig,
    pub exec: ExecConfig,
    pub scale: ScaleConfig,
    pub delete: DeleteConfig,
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        config.kubeconfig = non_empty(lookup("KUBECONFIG_FILE"));
        config.kube_context = non_empty(lookup("KUBECONFIG_CONTEXT"));
        config.namespace = non_empty(lookup("KUBEPROBE_NAMESPACE"));

        if let Some(ms) = parse_var::<u64>(&lookup, "KUBEPROBE_POLL_INTERVAL_MS")? {
            config.poll.interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "KUBEPROBE_POLL_TIMEOUT_SECS")? {
            config.poll.timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "KUBEPROBE_POLL_JITTER_MS")? {
            config.poll.jitter = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "KUBEPROBE_EXEC_TIMEOUT_SECS")? {
            config.exec.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "KUBEPROBE_SCALE_TIMEOUT_SECS")? {
            config.scale.timeout = Duration::from_secs(secs);
        }
        if let Some(delta) = parse_var::<u32>(&lookup, "KUBEPROBE_SCALE_DELTA")? {
            config.scale.delta = delta;
        }

        Ok(config)
    }

    pub fn kubeconfig(mut self, path: impl Into<String>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    pub fn kube_context(mut self, context: impl Into<String>) -> Self {
        self.kube_context = Some(context.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn exec(mut self, exec: ExecConfig) -> Self {
        self.exec = exec;
        self
    }

    pub fn scale(mut self, scale: ScaleConfig) -> Self {
        self.scale = scale;
        self
    }

    pub fn delete(mut self, delete: DeleteConfig) -> Self {
        self.delete = delete;
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup(key)) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
