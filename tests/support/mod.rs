//! In-memory cluster for exercising the engine without an API server
//!
//! Workloads converge a configurable number of reads after a replica write,
//! deleted pods can linger as terminating, and exec answers come from a
//! handler, so timing-sensitive behaviour is reproducible.

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStatus, StatefulSet, StatefulSetSpec, StatefulSetStatus,
};
use k8s_openapi::api::core::v1::{
    Container, Pod, PodCondition, PodSpec, PodStatus, PodTemplateSpec, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference, Time};
use kube::api::ObjectMeta;
use kubeprobe::config::{DeleteConfig, ExecConfig, HarnessConfig, PollConfig, ScaleConfig};
use kubeprobe::model::{labels_match, POD_TEMPLATE_HASH_LABEL};
use kubeprobe::{ClusterApi, CommandResult, Context, PodRef, ProbeError, WorkloadKind, WorkloadRef};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Key = (String, String);

/// ReplicaSet hash used for every Deployment pod the fake creates
pub const TEMPLATE_HASH: &str = "5d8f7";
type ExecHandler = Arc<dyn Fn(&str, &str, &[String]) -> CommandResult + Send + Sync>;

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// One recorded exec call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub command: Vec<String>,
}

/// A replica write that has not been reflected in status yet
struct Rollout {
    target: i32,
    reads_left: u32,
}

#[derive(Default)]
struct State {
    services: HashMap<Key, Service>,
    pods: HashMap<Key, Pod>,
    deployments: HashMap<Key, Deployment>,
    stateful_sets: HashMap<Key, StatefulSet>,
    rollouts: HashMap<(WorkloadKind, Key), Rollout>,
    /// Reads a deleted pod stays visible as terminating; `None` keeps it forever
    lingering: HashMap<Key, Option<u32>>,

    converge_after: u32,
    never_converge: bool,
    linger_reads: Option<u32>,
    never_remove: bool,
    read_failures_after_write: u32,
    pending_read_failures: u32,
    conflict_on_write: bool,

    exec_handler: Option<ExecHandler>,
    exec_delay: Option<Duration>,
    exec_calls: Vec<ExecCall>,
    writes: Vec<String>,
    deletes: Vec<String>,
    next_ip: u8,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ----- seeding -----

    pub fn add_service(&self, service: Service) {
        let namespace = service.metadata.namespace.clone().unwrap_or_default();
        let name = service.metadata.name.clone().unwrap_or_default();
        self.state
            .lock()
            .unwrap()
            .services
            .insert(key(&namespace, &name), service);
    }

    pub fn add_pod(&self, pod: Pod) {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.state
            .lock()
            .unwrap()
            .pods
            .insert(key(&namespace, &name), pod);
    }

    pub fn add_deployment(&self, deployment: Deployment) {
        let namespace = deployment.metadata.namespace.clone().unwrap_or_default();
        let name = deployment.metadata.name.clone().unwrap_or_default();
        self.state
            .lock()
            .unwrap()
            .deployments
            .insert(key(&namespace, &name), deployment);
    }

    pub fn add_stateful_set(&self, stateful_set: StatefulSet) {
        let namespace = stateful_set.metadata.namespace.clone().unwrap_or_default();
        let name = stateful_set.metadata.name.clone().unwrap_or_default();
        self.state
            .lock()
            .unwrap()
            .stateful_sets
            .insert(key(&namespace, &name), stateful_set);
    }

    // ----- behaviour -----

    /// Status catches up with a replica write after this many API reads
    pub fn converge_after(&self, reads: u32) {
        self.state.lock().unwrap().converge_after = reads;
    }

    /// Status never reflects replica writes
    pub fn never_converge(&self) {
        self.state.lock().unwrap().never_converge = true;
    }

    /// Deleted pods stay visible (terminating) for this many reads
    pub fn linger_after_delete(&self, reads: u32) {
        self.state.lock().unwrap().linger_reads = Some(reads);
    }

    /// Deleted pods never disappear
    pub fn never_remove(&self) {
        self.state.lock().unwrap().never_remove = true;
    }

    /// The reads following the next replica write fail with a connection error
    pub fn fail_reads_after_write(&self, count: u32) {
        self.state.lock().unwrap().read_failures_after_write = count;
    }

    /// Replica writes fail with a resource version conflict
    pub fn conflict_on_write(&self) {
        self.state.lock().unwrap().conflict_on_write = true;
    }

    pub fn on_exec<F>(&self, handler: F)
    where
        F: Fn(&str, &str, &[String]) -> CommandResult + Send + Sync + 'static,
    {
        self.state.lock().unwrap().exec_handler = Some(Arc::new(handler));
    }

    pub fn exec_delay(&self, delay: Duration) {
        self.state.lock().unwrap().exec_delay = Some(delay);
    }

    // ----- inspection -----

    pub fn exec_calls(&self) -> Vec<ExecCall> {
        self.state.lock().unwrap().exec_calls.clone()
    }

    /// Replica writes as `kind/name=replicas`, in order
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn has_pod(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .pods
            .contains_key(&key(namespace, name))
    }

    pub fn spec_replicas(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Option<i32> {
        let state = self.state.lock().unwrap();
        let k = key(namespace, name);
        match kind {
            WorkloadKind::Deployment => state
                .deployments
                .get(&k)
                .and_then(|d| d.spec.as_ref())
                .and_then(|s| s.replicas),
            WorkloadKind::StatefulSet => state
                .stateful_sets
                .get(&k)
                .and_then(|s| s.spec.as_ref())
                .and_then(|s| s.replicas),
        }
    }
}

impl State {
    fn take_read_failure(&mut self) -> Result<(), ProbeError> {
        if self.pending_read_failures > 0 {
            self.pending_read_failures -= 1;
            return Err(ProbeError::Connection("simulated: connection reset".to_string()));
        }
        Ok(())
    }

    /// Every API read advances all pending rollouts by one step
    fn tick(&mut self) {
        if self.never_converge {
            return;
        }
        let mut due = Vec::new();
        for (id, rollout) in &mut self.rollouts {
            if rollout.reads_left == 0 {
                due.push((id.clone(), rollout.target));
            } else {
                rollout.reads_left -= 1;
            }
        }
        for ((kind, k), target) in due {
            self.rollouts.remove(&(kind, k.clone()));
            self.complete_rollout(kind, &k, target);
        }
    }

    fn complete_rollout(&mut self, kind: WorkloadKind, k: &Key, target: i32) {
        let (namespace, name) = k;
        let workload = match kind {
            WorkloadKind::Deployment => {
                let Some(deployment) = self.deployments.get_mut(k) else {
                    return;
                };
                deployment.status = Some(DeploymentStatus {
                    replicas: Some(target),
                    ready_replicas: Some(target),
                    available_replicas: Some(target),
                    ..Default::default()
                });
                WorkloadRef::from_deployment(deployment, namespace)
            }
            WorkloadKind::StatefulSet => {
                let Some(stateful_set) = self.stateful_sets.get_mut(k) else {
                    return;
                };
                stateful_set.status = Some(StatefulSetStatus {
                    replicas: target,
                    ready_replicas: Some(target),
                    current_replicas: Some(target),
                    available_replicas: Some(target),
                    ..Default::default()
                });
                WorkloadRef::from_stateful_set(stateful_set, namespace)
            }
        };

        // Running pods of this workload by ordinal; terminating ones are on their way out
        let running: HashMap<i32, Key> = self
            .pods
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && pod.metadata.deletion_timestamp.is_none())
            .filter(|((ns, _), pod)| workload.owns(&PodRef::from_pod(pod, ns)))
            .filter_map(|(pk, _)| ordinal(&pk.1).map(|o| (o, pk.clone())))
            .collect();

        for (o, pk) in &running {
            if *o >= target {
                self.retire_pod(pk);
            }
        }

        for o in (0..target).filter(|o| !running.contains_key(o)) {
            self.next_ip = self.next_ip.wrapping_add(1);
            let ip = format!("10.128.0.{}", self.next_ip);
            let builder = match kind {
                WorkloadKind::StatefulSet => pod(&format!("{name}-{o}"), namespace)
                    .labels(workload.template_labels.clone())
                    .owner("StatefulSet", name),
                WorkloadKind::Deployment => {
                    pod(&format!("{name}-{TEMPLATE_HASH}-{o}"), namespace)
                        .labels(workload.template_labels.clone())
                        .label(POD_TEMPLATE_HASH_LABEL, TEMPLATE_HASH)
                        .owner("ReplicaSet", &format!("{name}-{TEMPLATE_HASH}"))
                }
            };
            let pod = builder.ip(&ip).build();
            let pk = key(namespace, pod.metadata.name.as_deref().unwrap_or_default());
            self.lingering.remove(&pk);
            self.pods.insert(pk, pod);
        }
    }

    /// Start removing a pod: gone at once, or terminating per the linger policy
    fn retire_pod(&mut self, k: &Key) {
        let linger = if self.never_remove {
            Some(None)
        } else {
            self.linger_reads.map(Some)
        };

        match linger {
            None => {
                self.pods.remove(k);
            }
            Some(reads) => {
                if let Some(pod) = self.pods.get_mut(k) {
                    pod.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
                }
                self.lingering.entry(k.clone()).or_insert(reads);
            }
        }
    }

    fn write_replicas(
        &mut self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ProbeError> {
        if self.conflict_on_write {
            return Err(ProbeError::Conflict(format!(
                "{kind} '{name}': the object has been modified"
            )));
        }

        let k = key(namespace, name);
        let spec_replicas = match kind {
            WorkloadKind::Deployment => self
                .deployments
                .get_mut(&k)
                .and_then(|d| d.spec.as_mut())
                .map(|s| &mut s.replicas),
            WorkloadKind::StatefulSet => self
                .stateful_sets
                .get_mut(&k)
                .and_then(|s| s.spec.as_mut())
                .map(|s| &mut s.replicas),
        };
        let Some(spec_replicas) = spec_replicas else {
            return Err(ProbeError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        };
        *spec_replicas = Some(replicas);

        self.writes.push(format!("{kind}/{name}={replicas}"));
        self.pending_read_failures = self.read_failures_after_write;
        self.read_failures_after_write = 0;
        self.rollouts.insert(
            (kind, k),
            Rollout {
                target: replicas,
                reads_left: self.converge_after,
            },
        );
        Ok(())
    }

    /// Count one read of a lingering pod, dropping it once its time is up
    fn observe_pod(&mut self, k: &Key) {
        let expired = match self.lingering.get_mut(k) {
            Some(Some(0)) => true,
            Some(Some(reads)) => {
                *reads -= 1;
                false
            }
            _ => false,
        };
        if expired {
            self.lingering.remove(k);
            self.pods.remove(k);
        }
    }
}

/// Trailing ordinal of a generated pod name
fn ordinal(pod_name: &str) -> Option<i32> {
    pod_name.rsplit_once('-')?.1.parse().ok()
}

fn not_found(kind: &str, name: &str, namespace: &str) -> ProbeError {
    ProbeError::NotFound {
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    fn endpoint(&self) -> String {
        "https://fake-cluster:6443".to_string()
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ProbeError> {
        let state = self.state.lock().unwrap();
        state
            .services
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("service", name, namespace))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.take_read_failure()?;
        state.tick();

        let keys: Vec<Key> = state
            .pods
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .cloned()
            .collect();
        for k in &keys {
            state.observe_pod(k);
        }

        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, pod)| {
                labels_match(selector, &pod.metadata.labels.clone().unwrap_or_default())
            })
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.take_read_failure()?;
        state.tick();
        let k = key(namespace, name);
        state.observe_pod(&k);
        state
            .pods
            .get(&k)
            .cloned()
            .ok_or_else(|| not_found("pod", name, namespace))
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        _grace_period_seconds: Option<u32>,
    ) -> Result<(), ProbeError> {
        let mut state = self.state.lock().unwrap();
        let k = key(namespace, name);
        state.deletes.push(name.to_string());

        if !state.pods.contains_key(&k) {
            return Err(not_found("pod", name, namespace));
        }

        state.retire_pod(&k);
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.take_read_failure()?;
        state.tick();
        state
            .deployments
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("deployment", name, namespace))
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.take_read_failure()?;
        state.tick();
        Ok(state
            .deployments
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<StatefulSet, ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.take_read_failure()?;
        state.tick();
        state
            .stateful_sets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("statefulset", name, namespace))
    }

    async fn list_stateful_sets(&self, namespace: &str) -> Result<Vec<StatefulSet>, ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.take_read_failure()?;
        state.tick();
        Ok(state
            .stateful_sets
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn patch_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ProbeError> {
        self.state
            .lock()
            .unwrap()
            .write_replicas(kind, namespace, name, replicas)
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<CommandResult, ProbeError> {
        let (handler, delay) = {
            let mut state = self.state.lock().unwrap();
            if !state.pods.contains_key(&key(namespace, pod)) {
                return Err(not_found("pod", pod, namespace));
            }
            state.exec_calls.push(ExecCall {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                container: container.to_string(),
                command: command.to_vec(),
            });
            (state.exec_handler.clone(), state.exec_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(match handler {
            Some(handler) => handler(pod, container, command),
            None => CommandResult {
                exit_code: 0,
                stdout: format!("{}\n", command.join(" ")),
                stderr: String::new(),
            },
        })
    }
}

// ----- object builders -----

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

pub fn service(name: &str, namespace: &str, selector: &[(&str, &str)]) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: if selector.is_empty() {
                None
            } else {
                Some(labels(selector))
            },
            type_: Some("ClusterIP".to_string()),
            cluster_ip: Some("172.30.12.7".to_string()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: 9200,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub struct PodBuilder {
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    containers: Vec<String>,
    ip: Option<String>,
    phase: String,
    ready: bool,
    terminating: bool,
    owner: Option<(String, String)>,
}

pub fn pod(name: &str, namespace: &str) -> PodBuilder {
    PodBuilder {
        name: name.to_string(),
        namespace: namespace.to_string(),
        labels: BTreeMap::new(),
        containers: vec!["main".to_string()],
        ip: None,
        phase: "Running".to_string(),
        ready: true,
        terminating: false,
        owner: None,
    }
}

impl PodBuilder {
    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn containers(mut self, names: &[&str]) -> Self {
        self.containers = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    pub fn ip(mut self, ip: &str) -> Self {
        self.ip = Some(ip.to_string());
        self
    }

    pub fn phase(mut self, phase: &str) -> Self {
        self.phase = phase.to_string();
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn terminating(mut self) -> Self {
        self.terminating = true;
        self
    }

    /// Controller reference, as the workload controllers set it
    pub fn owner(mut self, kind: &str, name: &str) -> Self {
        self.owner = Some((kind.to_string(), name.to_string()));
        self
    }

    pub fn build(self) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                labels: Some(self.labels),
                deletion_timestamp: self
                    .terminating
                    .then(|| Time(k8s_openapi::chrono::Utc::now())),
                owner_references: self.owner.map(|(kind, name)| {
                    vec![OwnerReference {
                        api_version: "apps/v1".to_string(),
                        uid: format!("uid-{name}"),
                        kind,
                        name,
                        controller: Some(true),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: self
                    .containers
                    .into_iter()
                    .map(|name| Container {
                        name,
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(self.phase),
                pod_ip: self.ip,
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: if self.ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }
}

fn template(labels: &BTreeMap<String, String>) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: None,
    }
}

/// A StatefulSet whose selector is `app=<app>` and whose status reports `ready` of `replicas`
pub fn stateful_set(name: &str, namespace: &str, app: &str, replicas: i32, ready: i32) -> StatefulSet {
    let selector = labels(&[("app", app)]);
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: template(&selector),
            ..Default::default()
        }),
        status: Some(StatefulSetStatus {
            replicas,
            ready_replicas: Some(ready),
            current_replicas: Some(replicas),
            available_replicas: Some(ready),
            ..Default::default()
        }),
    }
}

/// A Deployment whose selector is `app=<app>` and whose status reports `ready` of `replicas`
pub fn deployment(name: &str, namespace: &str, app: &str, replicas: i32, ready: i32) -> Deployment {
    let selector = labels(&[("app", app)]);
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: template(&selector),
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            replicas: Some(replicas),
            ready_replicas: Some(ready),
            available_replicas: Some(ready),
            ..Default::default()
        }),
    }
}

/// Harness settings with short waits suited to paused-clock tests
pub fn fast_config() -> HarnessConfig {
    HarnessConfig::new()
        .namespace("default")
        .poll(
            PollConfig::default()
                .interval(Duration::from_millis(100))
                .timeout(Duration::from_secs(5)),
        )
        .exec(ExecConfig {
            timeout: Duration::from_secs(10),
            ..Default::default()
        })
        .scale(ScaleConfig {
            delta: 1,
            timeout: Duration::from_secs(5),
        })
        .delete(DeleteConfig {
            grace_period_seconds: Some(0),
            removal_timeout: Duration::from_secs(5),
        })
}

pub fn context(cluster: &Arc<FakeCluster>) -> Context {
    Context::with_api(cluster.clone(), fast_config())
}
