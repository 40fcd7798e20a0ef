use super::ClusterApi;
use crate::config::{ConfigError, HarnessConfig};
use crate::error::ProbeError;
use crate::model::{selector_string, CommandResult, WorkloadKind};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, DeleteParams, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, instrument};

/// Production [`ClusterApi`] implementation using the kube crate
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    endpoint: String,
    default_namespace: String,
}

impl KubeClient {
    /// Connect using the kubeconfig/context in `config`
    ///
    /// Without an explicit kubeconfig path the configuration is inferred:
    /// 1. In-cluster service account (when running in K8s)
    /// 2. `KUBECONFIG` environment variable
    /// 3. `~/.kube/config`
    pub async fn connect(config: &HarnessConfig) -> Result<Self, ProbeError> {
        let options = KubeConfigOptions {
            context: config.kube_context.clone(),
            ..Default::default()
        };

        let kube_config = match (&config.kubeconfig, &config.kube_context) {
            (Some(path), _) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| ConfigError::Kubeconfig(format!("{path}: {e}")))?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| ConfigError::Kubeconfig(e.to_string()))?
            }
            (None, Some(_)) => Config::from_kubeconfig(&options)
                .await
                .map_err(|e| ConfigError::Kubeconfig(e.to_string()))?,
            (None, None) => Config::infer()
                .await
                .map_err(|e| ConfigError::Kubeconfig(e.to_string()))?,
        };

        let endpoint = kube_config.cluster_url.to_string();
        let default_namespace = kube_config.default_namespace.clone();
        let client = Client::try_from(kube_config)
            .map_err(|e| ProbeError::Connection(format!("failed to create client: {e}")))?;

        debug!(endpoint = %endpoint, namespace = %default_namespace, "K8s client initialized");

        Ok(Self {
            client,
            endpoint,
            default_namespace,
        })
    }

    /// Wrap an already configured client
    pub fn from_client(client: Client, endpoint: impl Into<String>) -> Self {
        let default_namespace = client.default_namespace().to_string();
        Self {
            client,
            endpoint: endpoint.into(),
            default_namespace,
        }
    }

    /// Namespace selected by the kube config
    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }
}

#[async_trait]
impl ClusterApi for KubeClient {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    #[instrument(skip(self))]
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ProbeError> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        services
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, "service", name, namespace))
    }

    #[instrument(skip(self))]
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, ProbeError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector_string(selector));
        }
        let list = pods
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, "pods", "*", namespace))?;
        Ok(list.items)
    }

    #[instrument(skip(self))]
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ProbeError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.get(name)
            .await
            .map_err(|e| map_kube_error(e, "pod", name, namespace))
    }

    #[instrument(skip(self))]
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: Option<u32>,
    ) -> Result<(), ProbeError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            grace_period_seconds,
            ..Default::default()
        };
        pods.delete(name, &params)
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, "pod", name, namespace))
    }

    #[instrument(skip(self))]
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ProbeError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        deployments
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, "deployment", name, namespace))
    }

    #[instrument(skip(self))]
    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ProbeError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = deployments
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, "deployments", "*", namespace))?;
        Ok(list.items)
    }

    #[instrument(skip(self))]
    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<StatefulSet, ProbeError> {
        let stateful_sets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        stateful_sets
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, "statefulset", name, namespace))
    }

    #[instrument(skip(self))]
    async fn list_stateful_sets(&self, namespace: &str) -> Result<Vec<StatefulSet>, ProbeError> {
        let stateful_sets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let list = stateful_sets
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, "statefulsets", "*", namespace))?;
        Ok(list.items)
    }

    #[instrument(skip(self))]
    async fn patch_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ProbeError> {
        // JSON merge patch touches spec.replicas only
        let patch = serde_json::json!({
            "spec": {
                "replicas": replicas
            }
        });
        let params = PatchParams::default();

        match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch))
                    .await
                    .map(|_| ())
                    .map_err(|e| map_kube_error(e, kind.as_str(), name, namespace))
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch))
                    .await
                    .map(|_| ())
                    .map_err(|e| map_kube_error(e, kind.as_str(), name, namespace))
            }
        }
    }

    #[instrument(skip(self, command), fields(command = ?command))]
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<CommandResult, ProbeError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let attach_params = AttachParams {
            container: Some(container.to_string()),
            stdin: false,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut attached = pods
            .exec(pod, command.to_vec(), &attach_params)
            .await
            .map_err(|e| map_kube_error(e, "pod", pod, namespace))?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        // Both streams must be drained together or a chatty stderr stalls stdout
        let (stdout, stderr) = tokio::try_join!(read_stream(stdout), read_stream(stderr))
            .map_err(|e| ProbeError::Connection(format!("exec stream for pod '{pod}': {e}")))?;

        // None: no status channel was opened. Some(None): it closed empty.
        let status = match status {
            Some(status) => Some(status.await),
            None => None,
        };

        attached
            .join()
            .await
            .map_err(|e| ProbeError::Connection(format!("exec session for pod '{pod}': {e}")))?;

        Ok(CommandResult {
            exit_code: resolve_exit_code(pod, status)?,
            stdout,
            stderr,
        })
    }
}

async fn read_stream<R>(reader: Option<R>) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Resolve the exit code of an exec session from its status channel
///
/// Without a status channel there is nothing to report and the stream closing
/// cleanly counts as success. A channel that closes without delivering a
/// status means the session was cut off, so the outcome is unknown.
pub(crate) fn resolve_exit_code(
    pod: &str,
    status: Option<Option<Status>>,
) -> Result<i32, ProbeError> {
    match status {
        None => Ok(0),
        Some(None) => Err(ProbeError::Connection(format!(
            "exec status channel for pod '{pod}' closed without a status"
        ))),
        Some(Some(status)) => Ok(exit_code_from_status(&status)),
    }
}

/// Translate the exec status channel message into a process exit code
///
/// The API server reports `Success`, or a failure whose details carry an
/// `ExitCode` cause with the numeric code as its message.
pub(crate) fn exit_code_from_status(status: &Status) -> i32 {
    if status.status.as_deref() == Some("Success") {
        return 0;
    }

    status
        .details
        .as_ref()
        .and_then(|d| d.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|c| c.reason.as_deref() == Some("ExitCode"))
        })
        .and_then(|c| c.message.as_deref())
        .and_then(|m| m.trim().parse().ok())
        .unwrap_or(1)
}

/// Classify a kube error into the engine's error taxonomy
pub(crate) fn map_kube_error(
    err: kube::Error,
    kind: &str,
    name: &str,
    namespace: &str,
) -> ProbeError {
    match err {
        kube::Error::Api(response) if response.code == 404 => ProbeError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 => {
            ProbeError::Conflict(format!("{kind} '{name}': {}", response.message))
        }
        kube::Error::Api(response) if response.code == 401 || response.code == 403 => {
            ProbeError::Connection(format!(
                "{kind} '{name}': permission denied (check RBAC): {}",
                response.message
            ))
        }
        other => ProbeError::Connection(format!("{kind} '{name}': {other}")),
    }
}
