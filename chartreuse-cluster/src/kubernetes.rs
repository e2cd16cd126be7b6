//! In-cluster Kubernetes access for the migration hooks
//!
//! A small REST client over reqwest, authenticated with the pod's service account. It only
//! knows the handful of calls the hooks make: scaling the release's deployments, reading
//! their expected scales, and managing the second-phase job.

pub mod client;
pub mod error;
pub mod retry;
pub mod workload;

pub use client::{ClusterConfig, KubeClient};
pub use error::KubeError;
pub use retry::retry_once;
pub use workload::{KubernetesWorkloadController, job_manifest, workload_selector};
