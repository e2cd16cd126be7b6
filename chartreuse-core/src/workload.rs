//! What the coordinator needs from the cluster running the workload.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A one-off Kubernetes Job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub image: String,
    /// Arguments passed to the image's entrypoint
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub backoff_limit: u32,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            service_account: None,
            backoff_limit: 0,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Pod counts of a Job as reported by the API server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub active: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub start_time: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        self.active == 0 && (self.succeeded > 0 || self.failed > 0)
    }
}

/// Control over the release's workload pods and jobs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkloadController: Send + Sync {
    /// Scale every workload deployment of the release to zero
    async fn stop_workload_pods(&self) -> Result<()>;

    /// Scale workload deployments back to their expected replica counts
    async fn start_workload_pods(&self) -> Result<()>;

    /// Whether no workload deployment of the release has replicas left
    async fn is_workload_stopped(&self) -> Result<bool>;

    async fn create_job(&self, spec: &JobSpec) -> Result<()>;

    async fn get_job(&self, name: &str) -> Result<JobStatus>;

    /// Delete a job and its pods; deleting a missing job succeeds
    async fn delete_job(&self, name: &str) -> Result<()>;
}
