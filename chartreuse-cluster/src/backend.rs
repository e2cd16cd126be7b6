//! Production wiring of the migration collaborators

use crate::database::inspector_for;
use async_trait::async_trait;
use chartreuse_core::{
    AlembicCli, CommandRunner, DatabaseConfig, DatabaseInspector, EndpointCheck, EslembicCli,
    IndexBackend, IndexConfig, IndexTool, MigrationBackend, MigrationTool, Result,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Real databases, real migration tools
#[derive(Clone)]
pub struct ClusterBackend {
    runner: Arc<dyn CommandRunner>,
    alembic_executable: String,
    eslembic_executable: String,
    check: HttpCheck,
}

impl ClusterBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, alembic_executable: impl Into<String>) -> Self {
        Self {
            runner,
            alembic_executable: alembic_executable.into(),
            eslembic_executable: "eslembic".to_string(),
            check: HttpCheck::new(),
        }
    }

    pub fn with_eslembic_executable(mut self, executable: impl Into<String>) -> Self {
        self.eslembic_executable = executable.into();
        self
    }
}

impl MigrationBackend for ClusterBackend {
    fn inspector(&self, config: &DatabaseConfig) -> Result<Box<dyn DatabaseInspector>> {
        inspector_for(config)
    }

    fn migration_tool(
        &self,
        config: &DatabaseConfig,
        additional_parameters: &str,
    ) -> Result<Box<dyn MigrationTool>> {
        Ok(Box::new(AlembicCli::new(
            self.runner.clone(),
            &self.alembic_executable,
            &config.alembic_directory,
            &config.alembic_config_file,
            additional_parameters,
        )?))
    }
}

impl IndexBackend for ClusterBackend {
    fn index_tool(&self, config: &IndexConfig) -> Result<Box<dyn IndexTool>> {
        Ok(Box::new(EslembicCli::new(
            self.runner.clone(),
            &self.eslembic_executable,
            config,
        )))
    }

    fn endpoint_check(&self) -> &dyn EndpointCheck {
        &self.check
    }
}

/// Reachability through a single HTTP GET
#[derive(Debug, Clone)]
pub struct HttpCheck {
    http: Client,
}

impl HttpCheck {
    const TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(Self::TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { http }
    }
}

impl Default for HttpCheck {
    fn default() -> Self {
        Self::new()
    }
}

/// First entry of a comma-separated URL list
fn first_url(urls: &str) -> &str {
    urls.split(',').next().unwrap_or(urls).trim()
}

#[async_trait]
impl EndpointCheck for HttpCheck {
    async fn is_reachable(&self, url: &str) -> bool {
        match self.http.get(first_url(url)).send().await {
            Ok(response) => {
                debug!(status = response.status().as_u16(), "Search cluster answered");
                true
            }
            Err(e) => {
                warn!(error = %e, "Search cluster did not answer");
                false
            }
        }
    }
}
