//! kubeprobe - Kubernetes resource control & verification engine
//!
//! Lets a test runner assert on and manipulate live cluster state: resolve
//! services to pods, poll for readiness, scale workloads with verified
//! convergence, run commands inside containers and resolve pods from their
//! IP address.
//!
//! # Example
//!
//! ```no_run
//! use kubeprobe::{Context, WorkloadKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     kubeprobe::telemetry::init_logging();
//!     let ctx = Context::from_env().await?;
//!
//!     let sts = ctx
//!         .set_replicas(WorkloadKind::StatefulSet, "cassandra", "cassandra-ns", 3, true)
//!         .await?;
//!     assert_eq!(sts.ready_replicas, 3);
//!
//!     let pods = ctx.get_pods_by_service("elasticsearch", "elasticsearch-ns").await?;
//!     println!("{} of {} pods ready", kubeprobe::count_ready_pods(&pods), pods.len());
//!     Ok(())
//! }
//! ```
//!
//! # Test macro
//!
//! ```ignore
//! #[kubeprobe::test]
//! async fn elasticsearch_lists_files(ctx: Context) {
//!     let result = ctx.exec_shell("elasticsearch-0", "elasticsearch-ns", "ls -la", None).await?;
//!     assert!(result.success());
//! }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod poller;
pub mod steps;
pub mod telemetry;
pub mod wait;

pub use client::{ClusterApi, KubeClient};
pub use config::{ConfigError, DeleteConfig, ExecConfig, HarnessConfig, PollConfig, ScaleConfig};
pub use context::{
    count_ready_pods, Context, PodDeletion, ScaleAmount, ScaleDirection, ScalePhase, ScaleReport,
};
pub use error::ProbeError;
pub use model::{
    CommandResult, PodOwner, PodPhase, PodRef, ReadyCount, ServicePortRef, ServiceRef, WorkloadCount,
    WorkloadKind, WorkloadRef,
};
pub use poller::{PollOutcome, Poller};
pub use steps::{Scenario, ScenarioError, ScenarioReport, Step, StepOutcome};
pub use telemetry::init_logging;
pub use wait::WaitError;

// Re-export the test macro
pub use kubeprobe_macros::test;
