//! Cluster connection context
//!
//! [`Context`] is the handle every operation goes through: it owns the API
//! capability, the default namespace and the harness configuration. The
//! operations themselves live in the submodules, each adding an `impl Context`
//! block:
//!
//! - `reader`: services, pods, workloads and IP lookup
//! - `exec`: commands inside containers
//! - `scaling`: replica changes with verified convergence
//! - `lifecycle`: pod deletion
//!
//! # Errors
//!
//! All fallible methods return [`ProbeError`].

#![allow(clippy::missing_errors_doc)]

mod exec;
mod lifecycle;
mod reader;
mod scaling;

pub use lifecycle::PodDeletion;
pub use reader::count_ready_pods;
pub use scaling::{ScaleAmount, ScaleDirection, ScalePhase, ScaleReport};

use crate::client::{ClusterApi, KubeClient};
use crate::config::HarnessConfig;
use crate::error::ProbeError;
use crate::poller::Poller;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Namespace used when neither the configuration nor the kube config names one
const DEFAULT_NAMESPACE: &str = "default";

/// Connection to one Kubernetes API server
///
/// Cloning is cheap and clones share the underlying client, so parallel
/// scenarios can either share a context or hold their own.
///
/// # Standalone Usage
///
/// ```ignore
/// use kubeprobe::{Context, WorkloadKind};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ctx = Context::from_env().await?;
///
///     ctx.set_replicas(WorkloadKind::StatefulSet, "cassandra", "cassandra-ns", 3, true)
///         .await?;
///     let result = ctx.exec_shell("elasticsearch-0", "elasticsearch-ns", "ls -la", None).await?;
///     assert!(result.success());
///     Ok(())
/// }
/// ```
///
/// # With Test Macro
///
/// ```ignore
/// #[kubeprobe::test]
/// async fn cassandra_scales(ctx: Context) {
///     ctx.set_replicas(WorkloadKind::StatefulSet, "cassandra", "cassandra-ns", 3, true)
///         .await?;
/// }
/// ```
#[derive(Clone)]
pub struct Context {
    api: Arc<dyn ClusterApi>,
    namespace: String,
    config: Arc<HarnessConfig>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("endpoint", &self.api.endpoint())
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Connect to the cluster described by `config`
    pub async fn connect(config: HarnessConfig) -> Result<Self, ProbeError> {
        let client = KubeClient::connect(&config).await?;
        let namespace = config
            .namespace
            .clone()
            .unwrap_or_else(|| client.default_namespace().to_string());

        info!(
            endpoint = %client.endpoint(),
            namespace = %namespace,
            "Connected to cluster"
        );

        Ok(Self::with_api_and_namespace(Arc::new(client), namespace, config))
    }

    /// Connect using configuration read from environment variables
    ///
    /// See [`HarnessConfig::from_env`] for the recognised variables.
    pub async fn from_env() -> Result<Self, ProbeError> {
        let config = HarnessConfig::from_env()?;
        Self::connect(config).await
    }

    /// Build a context over any [`ClusterApi`] implementation
    ///
    /// The default namespace comes from `config`, falling back to `default`.
    pub fn with_api(api: Arc<dyn ClusterApi>, config: HarnessConfig) -> Self {
        let namespace = config
            .namespace
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        Self::with_api_and_namespace(api, namespace, config)
    }

    pub fn with_api_and_namespace(
        api: Arc<dyn ClusterApi>,
        namespace: impl Into<String>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            api,
            namespace: namespace.into(),
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        }
    }

    /// Tie every wait and exec stream of this context to `token`
    ///
    /// Cancelling the token aborts in-flight waits with
    /// [`ProbeError::Cancelled`] instead of letting them run out their budget.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// API server URL
    pub fn endpoint(&self) -> String {
        self.api.endpoint()
    }

    /// Default namespace for callers that do not name one
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A poller using this context's poll settings and cancellation token
    pub fn poller(&self) -> Poller {
        Poller::new(self.config.poll.clone()).with_cancellation(self.cancel.clone())
    }

    pub(crate) fn api(&self) -> &dyn ClusterApi {
        self.api.as_ref()
    }
}
