//! The release's workload as seen through the API server

use crate::kubernetes::client::KubeClient;
use crate::kubernetes::error::KubeError;
use async_trait::async_trait;
use chartreuse_core::{JobSpec, JobStatus, Result, WorkloadController};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

/// Label selector of the deployments chartreuse stops and starts
pub fn workload_selector(release: &str) -> String {
    format!("chartreuse=enabled,release={}", release)
}

#[derive(Debug, Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    metadata: Metadata,
    #[serde(default)]
    status: DeploymentStatus,
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentStatus {
    #[serde(default)]
    replicas: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ExpectedDeploymentScale {
    spec: ExpectedScaleSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpectedScaleSpec {
    deployment_name: String,
    expected_scale: i32,
}

#[derive(Debug, Deserialize)]
struct Job {
    #[serde(default)]
    status: JobStatusFields,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusFields {
    #[serde(default)]
    active: Option<u32>,
    #[serde(default)]
    succeeded: Option<u32>,
    #[serde(default)]
    failed: Option<u32>,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
}

impl From<JobStatusFields> for JobStatus {
    fn from(fields: JobStatusFields) -> Self {
        JobStatus {
            active: fields.active.unwrap_or_default(),
            succeeded: fields.succeeded.unwrap_or_default(),
            failed: fields.failed.unwrap_or_default(),
            start_time: fields.start_time,
        }
    }
}

/// Manifest of a `batch/v1` Job running `spec` once
pub fn job_manifest(spec: &JobSpec, release: &str) -> Value {
    let env: Vec<Value> = spec
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    let mut pod_spec = json!({
        "restartPolicy": "Never",
        "containers": [{
            "name": spec.name,
            "image": spec.image,
            "args": spec.args,
            "env": env,
        }],
    });
    if let Some(account) = &spec.service_account {
        pod_spec["serviceAccountName"] = json!(account);
    }
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": spec.name,
            "labels": { "release": release, "app.kubernetes.io/managed-by": "chartreuse" },
        },
        "spec": {
            "backoffLimit": spec.backoff_limit,
            "template": {
                "metadata": { "labels": { "release": release } },
                "spec": pod_spec,
            },
        },
    })
}

/// [`WorkloadController`] over the Kubernetes API
#[derive(Debug, Clone)]
pub struct KubernetesWorkloadController {
    client: KubeClient,
    release: String,
}

impl KubernetesWorkloadController {
    pub fn new(client: KubeClient, release: impl Into<String>) -> Self {
        Self {
            client,
            release: release.into(),
        }
    }

    fn deployments_path(&self) -> String {
        format!("/apis/apps/v1/namespaces/{}/deployments", self.client.namespace())
    }

    fn jobs_path(&self) -> String {
        format!("/apis/batch/v1/namespaces/{}/jobs", self.client.namespace())
    }

    async fn workload_deployments(&self) -> std::result::Result<Vec<Deployment>, KubeError> {
        let selector = workload_selector(&self.release);
        let list: List<Deployment> = self
            .client
            .get(&self.deployments_path(), &[("labelSelector", selector.as_str())])
            .await?;
        Ok(list.items)
    }

    async fn scale(&self, deployment: &str, replicas: i32) -> std::result::Result<(), KubeError> {
        let path = format!("{}/{}/scale", self.deployments_path(), deployment);
        self.client
            .merge_patch(&path, &json!({ "spec": { "replicas": replicas } }))
            .await?;
        info!(deployment = %deployment, replicas, "Scaled deployment");
        Ok(())
    }
}

#[async_trait]
impl WorkloadController for KubernetesWorkloadController {
    async fn stop_workload_pods(&self) -> Result<()> {
        let deployments = self.workload_deployments().await?;
        if deployments.is_empty() {
            info!(selector = %workload_selector(&self.release), "No workload deployment to stop");
        }
        for deployment in deployments {
            self.scale(&deployment.metadata.name, 0).await?;
        }
        Ok(())
    }

    async fn start_workload_pods(&self) -> Result<()> {
        let path = format!(
            "/apis/wiremind.fr/v1/namespaces/{}/expecteddeploymentscales",
            self.client.namespace()
        );
        let selector = format!("release={}", self.release);
        let scales: List<ExpectedDeploymentScale> = self
            .client
            .get(&path, &[("labelSelector", selector.as_str())])
            .await?;
        if scales.items.is_empty() {
            info!(release = %self.release, "No expected deployment scale, nothing to start");
        }
        for scale in scales.items {
            self.scale(&scale.spec.deployment_name, scale.spec.expected_scale)
                .await?;
        }
        Ok(())
    }

    async fn is_workload_stopped(&self) -> Result<bool> {
        let deployments = self.workload_deployments().await?;
        Ok(deployments
            .iter()
            .all(|deployment| deployment.status.replicas.unwrap_or(0) == 0))
    }

    async fn create_job(&self, spec: &JobSpec) -> Result<()> {
        self.client
            .post(&self.jobs_path(), &job_manifest(spec, &self.release))
            .await?;
        info!(job = %spec.name, image = %spec.image, "Job created");
        Ok(())
    }

    async fn get_job(&self, name: &str) -> Result<JobStatus> {
        let job: Job = self
            .client
            .get(&format!("{}/{}", self.jobs_path(), name), &[])
            .await?;
        Ok(job.status.into())
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        self.client
            .delete(
                &format!("{}/{}", self.jobs_path(), name),
                &json!({ "propagationPolicy": "Background" }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector() {
        assert_eq!(workload_selector("shop"), "chartreuse=enabled,release=shop");
    }

    #[test]
    fn test_job_manifest() {
        let mut spec = JobSpec::new("chartreuse-migrate", "registry/app:5.2.0")
            .arg("migrate")
            .env("CHARTREUSE_MIGRATE_ENABLE_MIGRATE", "1");
        spec.service_account = Some("chartreuse".to_string());

        let manifest = job_manifest(&spec, "shop");

        assert_eq!(manifest["metadata"]["name"], "chartreuse-migrate");
        assert_eq!(manifest["metadata"]["labels"]["release"], "shop");
        assert_eq!(manifest["spec"]["backoffLimit"], 0);
        let pod = &manifest["spec"]["template"]["spec"];
        assert_eq!(pod["restartPolicy"], "Never");
        assert_eq!(pod["serviceAccountName"], "chartreuse");
        assert_eq!(pod["containers"][0]["args"][0], "migrate");
        assert_eq!(
            pod["containers"][0]["env"][0],
            json!({ "name": "CHARTREUSE_MIGRATE_ENABLE_MIGRATE", "value": "1" })
        );
    }

    #[test]
    fn test_deployment_list_parsing() {
        let list: List<Deployment> = serde_json::from_value(json!({
            "kind": "DeploymentList",
            "items": [
                { "metadata": { "name": "api" }, "status": { "replicas": 0 } },
                { "metadata": { "name": "worker" }, "status": {} },
                { "metadata": { "name": "web" } },
            ]
        }))
        .unwrap();
        assert_eq!(list.items.len(), 3);
        assert!(list.items.iter().all(|d| d.status.replicas.unwrap_or(0) == 0));
    }

    #[test]
    fn test_list_without_items_is_empty() {
        let list: List<ExpectedDeploymentScale> =
            serde_json::from_value(json!({ "kind": "ExpectedDeploymentScaleList" })).unwrap();
        assert!(list.items.is_empty());
    }

    #[test]
    fn test_expected_scale_parsing() {
        let list: List<ExpectedDeploymentScale> = serde_json::from_value(json!({
            "items": [{
                "metadata": { "name": "api-scale" },
                "spec": { "deploymentName": "api", "expectedScale": 3 }
            }]
        }))
        .unwrap();
        assert_eq!(list.items[0].spec.deployment_name, "api");
        assert_eq!(list.items[0].spec.expected_scale, 3);
    }

    #[test]
    fn test_job_status_parsing() {
        let job: Job = serde_json::from_value(json!({
            "metadata": { "name": "chartreuse-migrate" },
            "status": { "active": 1, "startTime": "2024-05-01T10:00:00Z" }
        }))
        .unwrap();
        let status: JobStatus = job.status.into();
        assert_eq!(status.active, 1);
        assert_eq!(status.succeeded, 0);
        assert!(status.start_time.is_some());
    }
}
