//! Authenticated REST client for the API server

use crate::kubernetes::error::{KubeError, map_reqwest_error};
use crate::kubernetes::retry::{RETRY_DELAY, retry_once};
use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Where Kubernetes mounts the pod's service account
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

const MERGE_PATCH: &str = "application/merge-patch+json";

/// Connection settings for the API server
pub struct ClusterConfig {
    pub api_server: String,
    pub namespace: String,
    token: SecretString,
    /// PEM bundle trusted for the API server's certificate
    pub ca_certificate: Option<Vec<u8>>,
}

impl std::fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("api_server", &self.api_server)
            .field("namespace", &self.namespace)
            .field("token", &"<secret>")
            .field("ca_certificate", &self.ca_certificate.as_ref().map(Vec::len))
            .finish()
    }
}

impl ClusterConfig {
    pub fn new(
        api_server: impl Into<String>,
        namespace: impl Into<String>,
        token: SecretString,
    ) -> Self {
        Self {
            api_server: api_server.into(),
            namespace: namespace.into(),
            token,
            ca_certificate: None,
        }
    }

    /// Configuration of the pod this process runs in
    pub fn in_cluster() -> Result<Self, KubeError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| KubeError::Config("KUBERNETES_SERVICE_HOST is not set".to_string()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        Self::from_service_account(Path::new(SERVICE_ACCOUNT_DIR), &host, &port)
    }

    /// Read token, namespace and CA bundle from a service account directory
    pub fn from_service_account(dir: &Path, host: &str, port: &str) -> Result<Self, KubeError> {
        let read = |name: &str| -> Result<String, KubeError> {
            let path: PathBuf = dir.join(name);
            fs::read_to_string(&path)
                .map(|content| content.trim().to_string())
                .map_err(|e| KubeError::Config(format!("Cannot read {}: {}", path.display(), e)))
        };
        let token = read("token")?;
        let namespace = read("namespace")?;
        let ca_certificate = fs::read(dir.join("ca.crt")).ok();

        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]", host)
        } else {
            host.to_string()
        };
        Ok(Self {
            api_server: format!("https://{}:{}", host, port),
            namespace,
            token: SecretString::from(token),
            ca_certificate,
        })
    }
}

/// Thin JSON client; every call retries once on transient failures
#[derive(Clone)]
pub struct KubeClient {
    http: Client,
    api_server: String,
    namespace: String,
    token: SecretString,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient")
            .field("http", &"<reqwest::Client>")
            .field("api_server", &self.api_server)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl KubeClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(config: ClusterConfig) -> Result<Self, KubeError> {
        let mut builder = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("chartreuse/", env!("CARGO_PKG_VERSION")));
        if let Some(pem) = &config.ca_certificate {
            let certificate = reqwest::Certificate::from_pem(pem)
                .map_err(|e| KubeError::Config(format!("Invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(certificate);
        }
        let http = builder
            .build()
            .map_err(|e| KubeError::Config(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_server: config.api_server.trim_end_matches('/').to_string(),
            namespace: config.namespace,
            token: config.token,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.api_server, path);
        debug!(method = %method, url = %url, "Kubernetes request");
        self.http
            .request(method, url)
            .bearer_auth(self.token.expose_secret())
    }

    async fn send(&self, operation: &str, build: impl Fn() -> RequestBuilder) -> Result<Value, KubeError> {
        let build = &build;
        retry_once(operation, RETRY_DELAY, || async move {
            let response = build().send().await.map_err(map_reqwest_error)?;
            handle_response(response).await
        })
        .await
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, KubeError> {
        let value = self
            .send("get", || self.request(Method::GET, path).query(query))
            .await?;
        serde_json::from_value(value).map_err(|e| KubeError::Parse(e.to_string()))
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, KubeError> {
        self.send("post", || self.request(Method::POST, path).json(body))
            .await
    }

    pub async fn merge_patch(&self, path: &str, body: &Value) -> Result<Value, KubeError> {
        self.send("patch", || {
            self.request(Method::PATCH, path)
                .header(reqwest::header::CONTENT_TYPE, MERGE_PATCH)
                .body(body.to_string())
        })
        .await
    }

    /// Delete an object; a missing object counts as deleted
    pub async fn delete(&self, path: &str, body: &Value) -> Result<(), KubeError> {
        match self
            .send("delete", || self.request(Method::DELETE, path).json(body))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(path = %path, "Object already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Turn a response into its JSON body, or an error carrying status and body
async fn handle_response(response: Response) -> Result<Value, KubeError> {
    let status = response.status();
    if status.is_success() {
        let text = response.text().await.map_err(map_reqwest_error)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| KubeError::Parse(e.to_string()))
    } else {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), body = %body, "API server returned error");
        Err(KubeError::Api {
            status: status.as_u16(),
            body,
        })
    }
}
