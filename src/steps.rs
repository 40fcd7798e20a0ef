//! Fixed mapping from scenario steps to engine operations
//!
//! Matching free-form step text stays with the test runner. Once it has
//! picked a verb and its parameters, it builds a [`Step`] and hands it to
//! [`Context::run_step`]; the result comes back as a [`StepOutcome`] that the
//! following assertions inspect.
//!
//! # Example
//!
//! ```ignore
//! use kubeprobe::steps::{Scenario, Step};
//! use kubeprobe::{ScaleDirection, WorkloadKind};
//!
//! let report = Scenario::new("cassandra scales")
//!     .step(Step::SetReplicas {
//!         kind: WorkloadKind::StatefulSet,
//!         name: "cassandra".into(),
//!         namespace: "cassandra-ns".into(),
//!         replicas: 3,
//!         verify: true,
//!     })
//!     .step(Step::PodNames {
//!         kind: WorkloadKind::StatefulSet,
//!         name: "cassandra".into(),
//!         namespace: "cassandra-ns".into(),
//!     })
//!     .run(&ctx)
//!     .await?;
//! ```

use crate::context::{Context, PodDeletion, ScaleAmount, ScaleDirection, ScaleReport};
use crate::error::ProbeError;
use crate::model::{
    CommandResult, PodRef, ReadyCount, ServiceRef, WorkloadCount, WorkloadKind, WorkloadRef,
};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// One action a scenario can take
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    GetService {
        name: String,
        namespace: String,
    },
    GetPodsByService {
        service: String,
        namespace: String,
    },
    /// Runs `command` through the shell, so whole command lines work
    Exec {
        command: String,
        pod: String,
        container: Option<String>,
        namespace: String,
    },
    CountReadyPods {
        service: String,
        namespace: String,
    },
    LookUpPodByIp {
        ip: String,
        namespace: String,
    },
    DeletePod {
        name: String,
        namespace: String,
        wait_for_removal: bool,
    },
    /// Relative scale by the configured delta
    Scale {
        kind: WorkloadKind,
        name: String,
        namespace: String,
        direction: ScaleDirection,
    },
    SetReplicas {
        kind: WorkloadKind,
        name: String,
        namespace: String,
        replicas: i32,
        verify: bool,
    },
    CountActiveWorkloads {
        kind: WorkloadKind,
        service: String,
        namespace: String,
    },
    PodNames {
        kind: WorkloadKind,
        name: String,
        namespace: String,
    },
    CheckReadyReplicas {
        kind: WorkloadKind,
        name: String,
        namespace: String,
    },
    /// Scale every workload behind a service to zero
    ScaleDownByService {
        kind: WorkloadKind,
        service: String,
        namespace: String,
        verify: bool,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetService { name, namespace } => {
                write!(f, "get service \"{name}\" in namespace \"{namespace}\"")
            }
            Self::GetPodsByService { service, namespace } => write!(
                f,
                "get pods by service name \"{service}\" in namespace \"{namespace}\""
            ),
            Self::Exec {
                command,
                pod,
                container: Some(container),
                namespace,
            } => write!(
                f,
                "execute command \"{command}\" in pod \"{pod}\" container \"{container}\" namespace \"{namespace}\""
            ),
            Self::Exec {
                command,
                pod,
                container: None,
                namespace,
            } => write!(
                f,
                "execute command \"{command}\" in pod \"{pod}\" namespace \"{namespace}\""
            ),
            Self::CountReadyPods { service, namespace } => write!(
                f,
                "count pods in ready status for service \"{service}\" in namespace \"{namespace}\""
            ),
            Self::LookUpPodByIp { ip, namespace } => {
                write!(f, "look up pod name by IP \"{ip}\" in namespace \"{namespace}\"")
            }
            Self::DeletePod { name, namespace, .. } => {
                write!(f, "delete pod \"{name}\" in namespace \"{namespace}\"")
            }
            Self::Scale {
                kind,
                name,
                namespace,
                direction,
            } => {
                let verb = match direction {
                    ScaleDirection::Up => "up",
                    ScaleDirection::Down => "down",
                };
                write!(f, "scale {verb} {kind} \"{name}\" in namespace \"{namespace}\"")
            }
            Self::SetReplicas {
                kind,
                name,
                namespace,
                replicas,
                ..
            } => write!(
                f,
                "set replicas to {replicas} for {kind} \"{name}\" in namespace \"{namespace}\""
            ),
            Self::CountActiveWorkloads {
                kind,
                service,
                namespace,
            } => write!(
                f,
                "get active {kind} count for service \"{service}\" in namespace \"{namespace}\""
            ),
            Self::PodNames {
                kind,
                name,
                namespace,
            } => write!(
                f,
                "get pod names for {kind} \"{name}\" in namespace \"{namespace}\""
            ),
            Self::CheckReadyReplicas {
                kind,
                name,
                namespace,
            } => write!(
                f,
                "check {kind} \"{name}\" ready replicas in namespace \"{namespace}\""
            ),
            Self::ScaleDownByService {
                kind,
                service,
                namespace,
                verify,
            } => {
                write!(
                    f,
                    "scale down {kind}s by service name \"{service}\" in namespace \"{namespace}\""
                )?;
                if *verify {
                    f.write_str(" with check")?;
                }
                Ok(())
            }
        }
    }
}

/// Observable result of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "value")]
pub enum StepOutcome {
    Service(ServiceRef),
    Pods(Vec<PodRef>),
    Command(CommandResult),
    ReadyPods(ReadyCount),
    Pod(PodRef),
    Deleted(PodDeletion),
    Scaled(ScaleReport),
    Workload(WorkloadRef),
    Workloads(WorkloadCount),
    PodNames(Vec<String>),
    ScaledAll(Vec<ScaleReport>),
}

impl Context {
    /// Run one step against the cluster
    pub async fn run_step(&self, step: &Step) -> Result<StepOutcome, ProbeError> {
        let outcome = match step {
            Step::GetService { name, namespace } => {
                StepOutcome::Service(self.get_service(name, namespace).await?)
            }
            Step::GetPodsByService { service, namespace } => {
                StepOutcome::Pods(self.get_pods_by_service(service, namespace).await?)
            }
            Step::Exec {
                command,
                pod,
                container,
                namespace,
            } => StepOutcome::Command(
                self.exec_shell(pod, namespace, command, container.as_deref())
                    .await?,
            ),
            Step::CountReadyPods { service, namespace } => {
                StepOutcome::ReadyPods(self.ready_pods_for_service(service, namespace).await?)
            }
            Step::LookUpPodByIp { ip, namespace } => {
                StepOutcome::Pod(self.get_pod_by_ip(ip, namespace).await?)
            }
            Step::DeletePod {
                name,
                namespace,
                wait_for_removal,
            } => StepOutcome::Deleted(self.delete_pod(name, namespace, *wait_for_removal).await?),
            Step::Scale {
                kind,
                name,
                namespace,
                direction,
            } => StepOutcome::Scaled(self.scale(*kind, name, namespace, *direction, false).await?),
            Step::SetReplicas {
                kind,
                name,
                namespace,
                replicas,
                verify,
            } => StepOutcome::Workload(
                self.set_replicas(*kind, name, namespace, *replicas, *verify)
                    .await?,
            ),
            Step::CountActiveWorkloads {
                kind,
                service,
                namespace,
            } => StepOutcome::Workloads(
                self.count_workloads_for_service(*kind, service, namespace)
                    .await?,
            ),
            Step::PodNames {
                kind,
                name,
                namespace,
            } => StepOutcome::PodNames(
                self.get_pod_names_for_workload(*kind, name, namespace)
                    .await?,
            ),
            Step::CheckReadyReplicas {
                kind,
                name,
                namespace,
            } => StepOutcome::Workload(self.get_workload(*kind, name, namespace).await?),
            Step::ScaleDownByService {
                kind,
                service,
                namespace,
                verify,
            } => StepOutcome::ScaledAll(
                self.scale_by_service_name(
                    *kind,
                    service,
                    namespace,
                    ScaleDirection::Down,
                    ScaleAmount::To(0),
                    *verify,
                )
                .await?,
            ),
        };
        Ok(outcome)
    }
}

/// A scenario failed at one of its steps
#[derive(Debug, thiserror::Error)]
#[error("scenario '{scenario}' failed at step {index} ({step}): {}: {source}", .source.kind())]
pub struct ScenarioError {
    pub scenario: String,
    /// Zero-based position of the failing step
    pub index: usize,
    pub step: Step,
    #[source]
    pub source: ProbeError,
}

/// Outcomes of a scenario that ran to completion, in step order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub outcomes: Vec<StepOutcome>,
}

/// Ordered list of steps run against one context
///
/// Steps run strictly in order and the run stops at the first failure.
/// Separate scenarios share nothing, so one failing does not affect another.
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    name: String,
    steps: Vec<Step>,
}

impl Scenario {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run all steps in order
    pub async fn run(&self, ctx: &Context) -> Result<ScenarioReport, ScenarioError> {
        info!(scenario = %self.name, steps = self.steps.len(), "Running scenario");

        let mut outcomes = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            info!(scenario = %self.name, index, step = %step, "Running step");

            match ctx.run_step(step).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(source) => {
                    warn!(
                        scenario = %self.name,
                        index,
                        step = %step,
                        kind = source.kind(),
                        error = %source,
                        "Step failed"
                    );
                    return Err(ScenarioError {
                        scenario: self.name.clone(),
                        index,
                        step: step.clone(),
                        source,
                    });
                }
            }
        }

        info!(scenario = %self.name, "Scenario passed");
        Ok(ScenarioReport {
            name: self.name.clone(),
            outcomes,
        })
    }
}
