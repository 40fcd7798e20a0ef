//! Point-in-time snapshots of cluster resources
//!
//! Every read returns one of these values. They are plain data: nothing here
//! talks to the API server, and a snapshot never changes after it is built.
//! Re-read through the [`Context`](crate::Context) to observe fresh state.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, Service};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle phase reported in a pod's status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse the API server's phase string. Missing or unrecognised values map to `Unknown`.
    #[must_use]
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Succeeded and Failed pods never run again
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Snapshot of a pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
    /// Container names in pod spec order
    pub containers: Vec<String>,
    /// Status IP, if one has been assigned
    pub ip: Option<String>,
    pub phase: PodPhase,
    /// The pod's `Ready` condition
    pub ready: bool,
    pub labels: BTreeMap<String, String>,
    /// Deletion has been requested but the pod is still present
    pub terminating: bool,
    /// Managing controller from `ownerReferences`, if any
    pub owner: Option<PodOwner>,
}

/// Controller reference of a pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodOwner {
    /// `StatefulSet`, `ReplicaSet`, `Job`, ...
    pub kind: String,
    pub name: String,
}

impl PodRef {
    /// Build a snapshot from an API object
    ///
    /// `fallback_namespace` is used when the object carries no namespace,
    /// which happens with hand-built objects in tests.
    #[must_use]
    pub fn from_pod(pod: &Pod, fallback_namespace: &str) -> Self {
        let status = pod.status.as_ref();

        let ready = status
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            });

        let containers = pod
            .spec
            .as_ref()
            .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default();

        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| fallback_namespace.to_string()),
            containers,
            ip: status.and_then(|s| s.pod_ip.clone()),
            phase: PodPhase::parse(status.and_then(|s| s.phase.as_deref())),
            ready,
            labels: pod.metadata.labels.clone().unwrap_or_default(),
            terminating: pod.metadata.deletion_timestamp.is_some(),
            owner: pod
                .metadata
                .owner_references
                .as_ref()
                .and_then(|refs| refs.iter().find(|r| r.controller == Some(true)))
                .map(|r| PodOwner {
                    kind: r.kind.clone(),
                    name: r.name.clone(),
                }),
        }
    }

    /// Still scheduled to run: not terminating and not in a terminal phase
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.terminating && !self.phase.is_terminal()
    }
}

/// One port exposed by a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServicePortRef {
    pub name: Option<String>,
    pub port: i32,
    pub protocol: String,
}

/// Snapshot of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRef {
    pub name: String,
    pub namespace: String,
    /// Label constraints a pod must satisfy to back this service
    pub selector: BTreeMap<String, String>,
    /// `ClusterIP`, `NodePort`, `LoadBalancer` or `ExternalName`
    pub service_type: Option<String>,
    pub cluster_ip: Option<String>,
    pub ports: Vec<ServicePortRef>,
}

impl ServiceRef {
    #[must_use]
    pub fn from_service(service: &Service, fallback_namespace: &str) -> Self {
        let spec = service.spec.as_ref();

        let ports = spec
            .and_then(|s| s.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .map(|p| ServicePortRef {
                        name: p.name.clone(),
                        port: p.port,
                        protocol: p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: service.metadata.name.clone().unwrap_or_default(),
            namespace: service
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| fallback_namespace.to_string()),
            selector: spec.and_then(|s| s.selector.clone()).unwrap_or_default(),
            service_type: spec.and_then(|s| s.type_.clone()),
            cluster_ip: spec.and_then(|s| s.cluster_ip.clone()),
            ports,
        }
    }

    #[must_use]
    pub fn has_port(&self, port: i32) -> bool {
        self.ports.iter().any(|p| p.port == port)
    }
}

/// Kind of a replicated workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    /// kubectl-style lowercase name, used in resource references and logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::StatefulSet => "statefulset",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a Deployment or StatefulSet and its replica counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    /// `spec.replicas`; the API server defaults an unset value to 1
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    pub current_replicas: i32,
    pub available_replicas: i32,
    /// `spec.selector.matchLabels`
    pub selector: BTreeMap<String, String>,
    /// Labels stamped on pods created from the template
    pub template_labels: BTreeMap<String, String>,
}

impl WorkloadRef {
    #[must_use]
    pub fn from_deployment(deployment: &Deployment, fallback_namespace: &str) -> Self {
        let spec = deployment.spec.as_ref();
        let status = deployment.status.as_ref();

        Self {
            kind: WorkloadKind::Deployment,
            name: deployment.metadata.name.clone().unwrap_or_default(),
            namespace: deployment
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| fallback_namespace.to_string()),
            desired_replicas: spec.and_then(|s| s.replicas).unwrap_or(1),
            ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            current_replicas: status.and_then(|s| s.replicas).unwrap_or(0),
            available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
            selector: spec
                .and_then(|s| s.selector.match_labels.clone())
                .unwrap_or_default(),
            template_labels: spec
                .and_then(|s| s.template.metadata.as_ref())
                .and_then(|m| m.labels.clone())
                .unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn from_stateful_set(stateful_set: &StatefulSet, fallback_namespace: &str) -> Self {
        let spec = stateful_set.spec.as_ref();
        let status = stateful_set.status.as_ref();

        Self {
            kind: WorkloadKind::StatefulSet,
            name: stateful_set.metadata.name.clone().unwrap_or_default(),
            namespace: stateful_set
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| fallback_namespace.to_string()),
            desired_replicas: spec.and_then(|s| s.replicas).unwrap_or(1),
            ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            current_replicas: status.and_then(|s| s.current_replicas).unwrap_or(0),
            available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
            selector: spec
                .and_then(|s| s.selector.match_labels.clone())
                .unwrap_or_default(),
            template_labels: spec
                .and_then(|s| s.template.metadata.as_ref())
                .and_then(|m| m.labels.clone())
                .unwrap_or_default(),
        }
    }

    /// `kind/name`, as used in wait errors and logs
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }

    /// Every desired replica reports ready
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.ready_replicas == self.desired_replicas
    }

    /// Scaled above zero with all replicas ready
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.desired_replicas > 0 && self.is_converged()
    }

    /// The pod was created by this workload
    ///
    /// Decided by the pod's controller reference: the StatefulSet itself, or
    /// a ReplicaSet named `<deployment>-<hash>`. Pods without one fall back to
    /// the controller naming scheme, `<name>-<ordinal>` for StatefulSets and
    /// `<name>-<hash>-<suffix>` for Deployments. Selector overlap alone never
    /// makes a pod owned.
    #[must_use]
    pub fn owns(&self, pod: &PodRef) -> bool {
        if pod.namespace != self.namespace {
            return false;
        }
        let hash_label = pod.labels.get(POD_TEMPLATE_HASH_LABEL).map(String::as_str);

        match (&pod.owner, self.kind) {
            (Some(owner), WorkloadKind::StatefulSet) => {
                owner.kind == "StatefulSet" && owner.name == self.name
            }
            (Some(owner), WorkloadKind::Deployment) => {
                owner.kind == "ReplicaSet"
                    && self
                        .name_suffix(&owner.name)
                        .is_some_and(|hash| is_template_hash(hash, hash_label))
            }
            (None, WorkloadKind::StatefulSet) => self
                .name_suffix(&pod.name)
                .is_some_and(|ordinal| !ordinal.is_empty() && ordinal.bytes().all(|b| b.is_ascii_digit())),
            (None, WorkloadKind::Deployment) => self
                .name_suffix(&pod.name)
                .and_then(|rest| rest.split_once('-'))
                .is_some_and(|(hash, suffix)| {
                    !suffix.is_empty() && !suffix.contains('-') && is_template_hash(hash, hash_label)
                }),
        }
    }

    /// What follows `<name>-` in a generated object name
    fn name_suffix<'a>(&self, generated: &'a str) -> Option<&'a str> {
        generated.strip_prefix(self.name.as_str())?.strip_prefix('-')
    }
}

/// Label the Deployment controller stamps on pods of one ReplicaSet
pub const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

fn is_template_hash(candidate: &str, label: Option<&str>) -> bool {
    !candidate.is_empty() && !candidate.contains('-') && label.map_or(true, |l| l == candidate)
}

/// Output of one command run inside a container
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Ready versus total pods behind a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadyCount {
    pub ready: usize,
    pub total: usize,
}

impl ReadyCount {
    #[must_use]
    pub fn all_ready(&self) -> bool {
        self.ready == self.total
    }
}

/// Active versus total workloads behind a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkloadCount {
    pub active: usize,
    pub total: usize,
}

impl WorkloadCount {
    #[must_use]
    pub fn all_active(&self) -> bool {
        self.active == self.total
    }
}

/// True when every key/value in `selector` is present in `labels`
///
/// An empty selector matches everything; callers decide whether that is meaningful.
#[must_use]
pub fn labels_match(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Render a selector map as a Kubernetes label selector string (`a=b,c=d`)
#[must_use]
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}
