//! Request capability against one Kubernetes API server
//!
//! [`ClusterApi`] is the only place the engine touches the network. The
//! production implementation is [`KubeClient`]; tests drive the engine through
//! an in-memory implementation instead.

mod kube_client;

pub use kube_client::KubeClient;

use crate::error::ProbeError;
use crate::model::{CommandResult, WorkloadKind};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, Service};
use std::collections::BTreeMap;

/// Kubernetes operations the engine needs, and nothing more
///
/// Implementations map a missing object to [`ProbeError::NotFound`], a
/// resource-version conflict to [`ProbeError::Conflict`], and transport or
/// authentication failures to [`ProbeError::Connection`].
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// API server URL, for logs and failure reports
    fn endpoint(&self) -> String;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ProbeError>;

    /// List pods carrying every label in `selector`; an empty selector lists all pods
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, ProbeError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ProbeError>;

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: Option<u32>,
    ) -> Result<(), ProbeError>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ProbeError>;

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ProbeError>;

    async fn get_stateful_set(&self, namespace: &str, name: &str)
        -> Result<StatefulSet, ProbeError>;

    async fn list_stateful_sets(&self, namespace: &str) -> Result<Vec<StatefulSet>, ProbeError>;

    /// Write `spec.replicas` with a single mutation
    async fn patch_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ProbeError>;

    /// Run `command` in `container` and collect its output and exit status
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<CommandResult, ProbeError>;
}
