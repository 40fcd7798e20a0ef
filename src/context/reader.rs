use super::Context;
use crate::error::ProbeError;
use crate::model::{
    labels_match, PodRef, ReadyCount, ServiceRef, WorkloadCount, WorkloadKind, WorkloadRef,
};
use std::collections::BTreeMap;
use tracing::debug;

impl Context {
    /// Fetch a service
    ///
    /// # Example
    ///
    /// ```ignore
    /// let svc = ctx.get_service("elasticsearch", "elasticsearch-ns").await?;
    /// assert_eq!(svc.service_type.as_deref(), Some("ClusterIP"));
    /// assert!(svc.has_port(9200));
    /// ```
    pub async fn get_service(&self, name: &str, namespace: &str) -> Result<ServiceRef, ProbeError> {
        let service = self.api().get_service(namespace, name).await?;
        let service = ServiceRef::from_service(&service, namespace);

        debug!(
            namespace = %namespace,
            service = %name,
            selector = ?service.selector,
            "Fetched service"
        );

        Ok(service)
    }

    /// Pods selected by the named service, ordered by name
    pub async fn get_pods_by_service(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Vec<PodRef>, ProbeError> {
        let service = self.get_service(name, namespace).await?;
        self.get_pods_for_service(&service).await
    }

    /// Pods selected by an already fetched service
    ///
    /// A service without a selector has manually managed endpoints and
    /// selects no pods.
    pub async fn get_pods_for_service(&self, service: &ServiceRef) -> Result<Vec<PodRef>, ProbeError> {
        if service.selector.is_empty() {
            debug!(
                namespace = %service.namespace,
                service = %service.name,
                "Service has no selector, no pods selected"
            );
            return Ok(Vec::new());
        }
        self.get_pods_by_selector(&service.selector, &service.namespace)
            .await
    }

    /// Pods whose labels are a superset of `selector`, ordered by name
    pub async fn get_pods_by_selector(
        &self,
        selector: &BTreeMap<String, String>,
        namespace: &str,
    ) -> Result<Vec<PodRef>, ProbeError> {
        let pods = self.api().list_pods(namespace, selector).await?;

        let mut pods: Vec<PodRef> = pods
            .iter()
            .map(|p| PodRef::from_pod(p, namespace))
            .filter(|p| labels_match(selector, &p.labels))
            .collect();
        pods.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(
            namespace = %namespace,
            selector = ?selector,
            count = pods.len(),
            "Listed pods"
        );

        Ok(pods)
    }

    pub async fn get_pod(&self, name: &str, namespace: &str) -> Result<PodRef, ProbeError> {
        let pod = self.api().get_pod(namespace, name).await?;
        Ok(PodRef::from_pod(&pod, namespace))
    }

    /// Resolve a pod from its status IP
    ///
    /// IPs can be reused briefly after pod churn, so a pod that is still live
    /// wins over terminating or finished pods holding the same address. Two
    /// live pods with one IP, or several stale ones and no live one, are
    /// reported as [`ProbeError::AmbiguousResult`].
    ///
    /// # Example
    ///
    /// ```ignore
    /// let pod = ctx.get_pod_by_ip("10.129.2.61", "elasticsearch-ns").await?;
    /// println!("{} owns that address", pod.name);
    /// ```
    pub async fn get_pod_by_ip(&self, ip: &str, namespace: &str) -> Result<PodRef, ProbeError> {
        let pods = self.api().list_pods(namespace, &BTreeMap::new()).await?;

        let matches: Vec<PodRef> = pods
            .iter()
            .map(|p| PodRef::from_pod(p, namespace))
            .filter(|p| p.ip.as_deref() == Some(ip))
            .collect();

        debug!(
            namespace = %namespace,
            ip = %ip,
            matches = matches.len(),
            "Looked up pod by IP"
        );

        select_by_ip(ip, namespace, matches)
    }

    pub async fn get_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<WorkloadRef, ProbeError> {
        let workload = match kind {
            WorkloadKind::Deployment => {
                let deployment = self.api().get_deployment(namespace, name).await?;
                WorkloadRef::from_deployment(&deployment, namespace)
            }
            WorkloadKind::StatefulSet => {
                let stateful_set = self.api().get_stateful_set(namespace, name).await?;
                WorkloadRef::from_stateful_set(&stateful_set, namespace)
            }
        };

        debug!(
            namespace = %namespace,
            workload = %workload.reference(),
            desired = workload.desired_replicas,
            ready = workload.ready_replicas,
            "Fetched workload"
        );

        Ok(workload)
    }

    pub async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
    ) -> Result<Vec<WorkloadRef>, ProbeError> {
        let mut workloads: Vec<WorkloadRef> = match kind {
            WorkloadKind::Deployment => self
                .api()
                .list_deployments(namespace)
                .await?
                .iter()
                .map(|d| WorkloadRef::from_deployment(d, namespace))
                .collect(),
            WorkloadKind::StatefulSet => self
                .api()
                .list_stateful_sets(namespace)
                .await?
                .iter()
                .map(|s| WorkloadRef::from_stateful_set(s, namespace))
                .collect(),
        };
        workloads.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workloads)
    }

    /// Ready versus total pods behind a service
    pub async fn ready_pods_for_service(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<ReadyCount, ProbeError> {
        let pods = self.get_pods_by_service(name, namespace).await?;
        Ok(ReadyCount {
            ready: count_ready_pods(&pods),
            total: pods.len(),
        })
    }

    /// Workloads of `kind` whose pods the service would select
    ///
    /// A workload backs the service when its pod template labels are a
    /// superset of the service selector.
    pub async fn get_workloads_for_service(
        &self,
        kind: WorkloadKind,
        service: &str,
        namespace: &str,
    ) -> Result<Vec<WorkloadRef>, ProbeError> {
        let service = self.get_service(service, namespace).await?;
        if service.selector.is_empty() {
            return Ok(Vec::new());
        }

        let workloads: Vec<WorkloadRef> = self
            .list_workloads(kind, namespace)
            .await?
            .into_iter()
            .filter(|w| labels_match(&service.selector, &w.template_labels))
            .collect();

        debug!(
            namespace = %namespace,
            service = %service.name,
            kind = %kind,
            count = workloads.len(),
            "Resolved workloads for service"
        );

        Ok(workloads)
    }

    /// Active (scaled up and fully ready) versus total workloads behind a service
    pub async fn count_workloads_for_service(
        &self,
        kind: WorkloadKind,
        service: &str,
        namespace: &str,
    ) -> Result<WorkloadCount, ProbeError> {
        let workloads = self
            .get_workloads_for_service(kind, service, namespace)
            .await?;
        Ok(WorkloadCount {
            active: workloads.iter().filter(|w| w.is_active()).count(),
            total: workloads.len(),
        })
    }

    /// Names of the pods a workload manages
    ///
    /// StatefulSet pods have stable ordinal names (`<name>-0`, `<name>-1`, ...)
    /// derived from the desired replica count. Deployment pods are listed
    /// through the workload's selector.
    pub async fn get_pod_names_for_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<Vec<String>, ProbeError> {
        let workload = self.get_workload(kind, name, namespace).await?;

        match kind {
            WorkloadKind::StatefulSet => Ok((0..workload.desired_replicas.max(0))
                .map(|ordinal| format!("{name}-{ordinal}"))
                .collect()),
            WorkloadKind::Deployment => {
                if workload.selector.is_empty() {
                    return Ok(Vec::new());
                }
                let pods = self
                    .get_pods_by_selector(&workload.selector, namespace)
                    .await?;
                Ok(pods.into_iter().map(|p| p.name).collect())
            }
        }
    }
}

/// Number of pods whose `Ready` condition is true
///
/// Pure: works on already fetched snapshots.
#[must_use]
pub fn count_ready_pods(pods: &[PodRef]) -> usize {
    pods.iter().filter(|p| p.ready).count()
}

fn select_by_ip(ip: &str, namespace: &str, matches: Vec<PodRef>) -> Result<PodRef, ProbeError> {
    let (mut live, mut stale): (Vec<PodRef>, Vec<PodRef>) =
        matches.into_iter().partition(PodRef::is_live);

    match (live.len(), stale.len()) {
        (1, _) => Ok(live.remove(0)),
        (0, 0) => Err(ProbeError::not_found("pod with IP", ip, namespace)),
        (0, 1) => Ok(stale.remove(0)),
        (0, _) => Err(ProbeError::AmbiguousResult(format!(
            "IP {ip} is held by {} terminated pods in namespace '{namespace}': {}",
            stale.len(),
            names(&stale)
        ))),
        _ => Err(ProbeError::AmbiguousResult(format!(
            "IP {ip} is held by {} running pods in namespace '{namespace}': {}",
            live.len(),
            names(&live)
        ))),
    }
}

fn names(pods: &[PodRef]) -> String {
    pods.iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
