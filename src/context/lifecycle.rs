use super::Context;
use crate::error::ProbeError;
use crate::wait::{ResourceState, WaitError};
use serde::Serialize;
use tracing::{debug, info};

/// What a pod deletion achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PodDeletion {
    /// Deleted, and the pod was confirmed gone
    Removed,
    /// Deletion accepted; removal was not awaited
    Requested,
    /// There was no such pod to begin with
    AlreadyAbsent,
}

impl Context {
    /// Delete a pod, optionally waiting until it is gone
    ///
    /// Deleting a pod that does not exist succeeds with
    /// [`PodDeletion::AlreadyAbsent`], so repeating a deletion is harmless.
    /// When `wait_for_removal` is set and the pod outlives the removal
    /// timeout, fails with [`ProbeError::ConvergenceTimeout`].
    ///
    /// # Example
    ///
    /// ```ignore
    /// ctx.delete_pod("test-pod-12345", "default", true).await?;
    /// assert!(ctx.get_pod("test-pod-12345", "default").await.is_err());
    /// ```
    pub async fn delete_pod(
        &self,
        name: &str,
        namespace: &str,
        wait_for_removal: bool,
    ) -> Result<PodDeletion, ProbeError> {
        let grace_period = self.config().delete.grace_period_seconds;

        match self.api().delete_pod(namespace, name, grace_period).await {
            Ok(()) => {}
            Err(ProbeError::NotFound { .. }) => {
                info!(namespace = %namespace, pod = %name, "Pod already absent");
                return Ok(PodDeletion::AlreadyAbsent);
            }
            Err(e) => return Err(e),
        }

        info!(
            namespace = %namespace,
            pod = %name,
            grace_period_seconds = ?grace_period,
            "Deleted pod"
        );

        if !wait_for_removal {
            return Ok(PodDeletion::Requested);
        }

        let timeout = self.config().delete.removal_timeout;
        let outcome = self
            .poller()
            .timeout(timeout)
            .wait_until(move || async move {
                match self.get_pod(name, namespace).await {
                    Ok(pod) => Ok((false, Some(pod))),
                    Err(e) if e.is_not_found() => Ok((true, None)),
                    Err(e) => Err(e),
                }
            })
            .await?;

        if outcome.satisfied {
            debug!(
                namespace = %namespace,
                pod = %name,
                elapsed = ?outcome.elapsed,
                "Pod removed"
            );
            return Ok(PodDeletion::Removed);
        }

        let last_state = outcome
            .last_observed
            .flatten()
            .map_or_else(|| "still exists".to_string(), |pod| pod.state_description());

        Err(WaitError::new(format!("pod/{name}"), timeout, outcome.elapsed)
            .with_state(last_state)
            .with_attempts(outcome.attempts)
            .into())
    }
}
