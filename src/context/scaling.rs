use super::Context;
use crate::error::ProbeError;
use crate::model::{WorkloadKind, WorkloadRef};
use crate::wait::{ResourceState, WaitError};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Direction of a relative scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleDirection {
    Up,
    Down,
}

/// How far a service-wide scale moves each workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAmount {
    /// Add or remove this many replicas; scaling down stops at zero
    Delta(u32),
    /// Set exactly this many replicas regardless of direction
    To(u32),
}

impl ScaleAmount {
    /// Replica count after applying this amount to `current`
    #[must_use]
    pub fn target(self, current: i32, direction: ScaleDirection) -> i32 {
        match self {
            Self::To(n) => i32::try_from(n).unwrap_or(i32::MAX),
            Self::Delta(n) => {
                let n = i32::try_from(n).unwrap_or(i32::MAX);
                match direction {
                    ScaleDirection::Up => current.saturating_add(n),
                    ScaleDirection::Down => current.saturating_sub(n).max(0),
                }
            }
        }
    }
}

/// Where a single scale operation ended up
///
/// `Requested -> Applied -> {Converged | TimedOut}`. `Applied` is entered
/// as soon as the write succeeds; a run without verification stops there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalePhase {
    Requested,
    Applied,
    Converged,
    TimedOut,
}

impl fmt::Display for ScalePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::Applied => "applied",
            Self::Converged => "converged",
            Self::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Snapshots taken around one scale operation
///
/// Callers compare `before` and `after` themselves; nothing is remembered
/// between calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScaleReport {
    pub before: WorkloadRef,
    pub after: WorkloadRef,
    pub phase: ScalePhase,
}

impl ScaleReport {
    #[must_use]
    pub fn increased(&self) -> bool {
        self.after.desired_replicas > self.before.desired_replicas
    }

    #[must_use]
    pub fn decreased(&self) -> bool {
        self.after.desired_replicas < self.before.desired_replicas
    }
}

impl Context {
    /// Set the replica count of a workload
    ///
    /// Writes `spec.replicas` once. With `verify`, waits until the workload
    /// reports `desired` ready replicas (for zero: until none of its own pods
    /// remain either, see [`WorkloadRef::owns`]) and fails with [`ProbeError::ConvergenceTimeout`]
    /// otherwise. Without `verify`, returns a fresh read taken after the write.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let sts = ctx
    ///     .set_replicas(WorkloadKind::StatefulSet, "cassandra", "cassandra-ns", 3, true)
    ///     .await?;
    /// assert_eq!(sts.ready_replicas, 3);
    /// ```
    pub async fn set_replicas(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
        desired: i32,
        verify: bool,
    ) -> Result<WorkloadRef, ProbeError> {
        check_replicas(desired)?;
        let before = self.get_workload(kind, name, namespace).await?;
        let report = self.scale_workload(before, desired, verify).await?;
        Ok(report.after)
    }

    /// [`set_replicas`](Self::set_replicas) for an already fetched workload
    pub async fn set_workload_replicas(
        &self,
        workload: &WorkloadRef,
        desired: i32,
        verify: bool,
    ) -> Result<WorkloadRef, ProbeError> {
        check_replicas(desired)?;
        let report = self.scale_workload(workload.clone(), desired, verify).await?;
        Ok(report.after)
    }

    /// Move a workload up or down by the configured delta
    ///
    /// ```ignore
    /// let report = ctx
    ///     .scale(WorkloadKind::Deployment, "my-app", "my-namespace", ScaleDirection::Up, false)
    ///     .await?;
    /// assert!(report.increased());
    /// ```
    pub async fn scale(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
        direction: ScaleDirection,
        verify: bool,
    ) -> Result<ScaleReport, ProbeError> {
        let before = self.get_workload(kind, name, namespace).await?;
        let target =
            ScaleAmount::Delta(self.config().scale.delta).target(before.desired_replicas, direction);
        self.scale_workload(before, target, verify).await
    }

    /// Scale every workload of `kind` backing a service
    ///
    /// All writes are applied first. With `verify` set the workloads are then
    /// verified concurrently, so the call waits at most one scale timeout no
    /// matter how many workloads back the service. Every failure is logged and
    /// the first one is returned. Fails with [`ProbeError::NotFound`] when the
    /// service has no backing workloads.
    ///
    /// ```ignore
    /// let reports = ctx
    ///     .scale_by_service_name(
    ///         WorkloadKind::StatefulSet,
    ///         "cassandra-svc",
    ///         "cassandra-ns",
    ///         ScaleDirection::Down,
    ///         ScaleAmount::To(0),
    ///         true,
    ///     )
    ///     .await?;
    /// ```
    pub async fn scale_by_service_name(
        &self,
        kind: WorkloadKind,
        service: &str,
        namespace: &str,
        direction: ScaleDirection,
        amount: ScaleAmount,
        verify: bool,
    ) -> Result<Vec<ScaleReport>, ProbeError> {
        let workloads = self
            .get_workloads_for_service(kind, service, namespace)
            .await?;

        if workloads.is_empty() {
            return Err(ProbeError::not_found(
                format!("{kind} for service"),
                service,
                namespace,
            ));
        }

        let mut applied = Vec::with_capacity(workloads.len());
        for workload in workloads {
            let target = amount.target(workload.desired_replicas, direction);
            self.apply_replicas(&workload, target).await?;
            applied.push((workload, target));
        }

        // Verify every workload at once so the wait is bounded by one timeout
        let results = join_all(
            applied
                .into_iter()
                .map(|(before, target)| self.finish_scale(before, target, verify)),
        )
        .await;

        let mut reports = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(report) => reports.push(report),
                Err(err) => errors.push(err),
            }
        }

        if !errors.is_empty() {
            for err in &errors {
                warn!(
                    namespace = %namespace,
                    service = %service,
                    error = %err,
                    "Workload for service failed to scale"
                );
            }
            warn!(
                namespace = %namespace,
                service = %service,
                kind = %kind,
                failed = errors.len(),
                finished = reports.len(),
                "Scaled workloads for service with failures"
            );
            return Err(errors.swap_remove(0));
        }

        info!(
            namespace = %namespace,
            service = %service,
            kind = %kind,
            workloads = reports.len(),
            "Scaled workloads for service"
        );

        Ok(reports)
    }

    async fn scale_workload(
        &self,
        before: WorkloadRef,
        target: i32,
        verify: bool,
    ) -> Result<ScaleReport, ProbeError> {
        self.apply_replicas(&before, target).await?;
        self.finish_scale(before, target, verify).await
    }

    /// Single write of `spec.replicas`
    async fn apply_replicas(&self, workload: &WorkloadRef, target: i32) -> Result<(), ProbeError> {
        check_replicas(target)?;

        debug!(
            namespace = %workload.namespace,
            workload = %workload.reference(),
            from = workload.desired_replicas,
            to = target,
            phase = %ScalePhase::Requested,
            "Scaling workload"
        );

        self.api()
            .patch_replicas(workload.kind, &workload.namespace, &workload.name, target)
            .await?;

        info!(
            namespace = %workload.namespace,
            workload = %workload.reference(),
            replicas = target,
            phase = %ScalePhase::Applied,
            "Scaled workload"
        );

        Ok(())
    }

    async fn finish_scale(
        &self,
        before: WorkloadRef,
        target: i32,
        verify: bool,
    ) -> Result<ScaleReport, ProbeError> {
        if !verify {
            let after = self
                .get_workload(before.kind, &before.name, &before.namespace)
                .await?;
            return Ok(ScaleReport {
                before,
                after,
                phase: ScalePhase::Applied,
            });
        }

        let after = self.await_replicas(&before, target).await?;
        Ok(ScaleReport {
            before,
            after,
            phase: ScalePhase::Converged,
        })
    }

    /// Poll until `target` replicas are ready
    async fn await_replicas(
        &self,
        workload: &WorkloadRef,
        target: i32,
    ) -> Result<WorkloadRef, ProbeError> {
        let timeout = self.config().scale.timeout;
        let kind = workload.kind;
        let name = workload.name.as_str();
        let namespace = workload.namespace.as_str();
        let selector = &workload.selector;

        let outcome = self
            .poller()
            .timeout(timeout)
            .wait_until(move || async move {
                let current = self.get_workload(kind, name, namespace).await?;
                if current.ready_replicas != target {
                    return Ok((false, (current, None)));
                }
                // Zero ready replicas can still leave terminating pods behind.
                // Only this workload's pods count; siblings may share labels.
                if target == 0 && !selector.is_empty() {
                    let remaining = self
                        .get_pods_by_selector(selector, namespace)
                        .await?
                        .iter()
                        .filter(|pod| workload.owns(pod))
                        .count();
                    return Ok((remaining == 0, (current, Some(remaining))));
                }
                Ok((true, (current, None)))
            })
            .await?;

        if outcome.satisfied {
            if let Some((current, _)) = outcome.last_observed {
                info!(
                    namespace = %namespace,
                    workload = %current.reference(),
                    replicas = target,
                    attempts = outcome.attempts,
                    elapsed = ?outcome.elapsed,
                    phase = %ScalePhase::Converged,
                    "Workload converged"
                );
                return Ok(current);
            }
        }

        let last_state = match &outcome.last_observed {
            Some((current, Some(remaining))) => {
                format!("{}, {remaining} pods remaining", current.state_description())
            }
            Some((current, None)) => current.state_description(),
            None => "never observed".to_string(),
        };

        warn!(
            namespace = %namespace,
            workload = %workload.reference(),
            target,
            last_state = %last_state,
            phase = %ScalePhase::TimedOut,
            "Workload did not converge"
        );

        Err(WaitError::new(workload.reference(), timeout, outcome.elapsed)
            .with_state(format!("{last_state} (target {target})"))
            .with_attempts(outcome.attempts)
            .into())
    }
}

fn check_replicas(replicas: i32) -> Result<(), ProbeError> {
    if replicas < 0 {
        return Err(ProbeError::InvalidReplicaCount(i64::from(replicas)));
    }
    Ok(())
}
