use super::Context;
use crate::error::ProbeError;
use crate::model::{CommandResult, PodRef};
use tracing::debug;

impl Context {
    /// Execute a command in a pod and collect its output
    ///
    /// With `container` omitted, a single-container pod runs the command in
    /// its only container and a multi-container pod fails with
    /// [`ProbeError::AmbiguousTarget`]. A non-zero exit code is returned in
    /// the [`CommandResult`], not as an error.
    ///
    /// The call fails with [`ProbeError::ExecTimeout`] once the configured
    /// exec timeout elapses, and with [`ProbeError::Cancelled`] when the
    /// context's cancellation token fires.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let result = ctx
    ///     .exec("elasticsearch-0", "elasticsearch-ns", &["ls", "-la"], None)
    ///     .await?;
    /// assert_eq!(result.exit_code, 0);
    /// assert!(!result.stdout.is_empty());
    /// ```
    pub async fn exec(
        &self,
        pod: &str,
        namespace: &str,
        command: &[&str],
        container: Option<&str>,
    ) -> Result<CommandResult, ProbeError> {
        let target = self.get_pod(pod, namespace).await?;
        let container = resolve_container(&target, container)?;

        let command_strings: Vec<String> = command.iter().map(|s| (*s).to_string()).collect();
        let timeout = self.config().exec.timeout;

        debug!(
            namespace = %namespace,
            pod = %pod,
            container = %container,
            command = ?command,
            "Executing command in pod"
        );

        let result = tokio::select! {
            biased;
            () = self.cancellation_token().cancelled() => return Err(ProbeError::Cancelled),
            result = tokio::time::timeout(
                timeout,
                self.api().exec(namespace, pod, &container, &command_strings),
            ) => result,
        };

        let result = result.map_err(|_| ProbeError::ExecTimeout {
            pod: pod.to_string(),
            timeout,
        })??;

        debug!(
            namespace = %namespace,
            pod = %pod,
            container = %container,
            exit_code = result.exit_code,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            "Executed command in pod"
        );

        Ok(result)
    }

    /// Run a whole command line through the configured shell (`/bin/sh -c`)
    ///
    /// ```ignore
    /// let result = ctx.exec_shell("elasticsearch-0", "elasticsearch-ns", "ls -la", None).await?;
    /// ```
    pub async fn exec_shell(
        &self,
        pod: &str,
        namespace: &str,
        command_line: &str,
        container: Option<&str>,
    ) -> Result<CommandResult, ProbeError> {
        let shell = self.config().exec.shell.clone();
        self.exec(pod, namespace, &[shell.as_str(), "-c", command_line], container)
            .await
    }
}

/// Pick the container a command runs in
fn resolve_container(pod: &PodRef, requested: Option<&str>) -> Result<String, ProbeError> {
    match requested {
        Some(name) if pod.containers.iter().any(|c| c == name) => Ok(name.to_string()),
        Some(name) => Err(ProbeError::not_found(
            "container",
            format!("{}/{name}", pod.name),
            &pod.namespace,
        )),
        None => match pod.containers.as_slice() {
            [only] => Ok(only.clone()),
            [] => Err(ProbeError::not_found(
                "container",
                format!("{}/*", pod.name),
                &pod.namespace,
            )),
            _ => Err(ProbeError::AmbiguousTarget {
                pod: pod.name.clone(),
                containers: pod.containers.clone(),
            }),
        },
    }
}
