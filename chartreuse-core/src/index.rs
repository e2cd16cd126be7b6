//! Search-index migrations driven through `eslembic`.
//!
//! The index is optional. When configured it takes part in the release decision like any
//! database, is upgraded after every database, and may request a second phase (`migrate`
//! and/or `clean`) that runs once the new code is deployed.

use crate::alembic::RevisionStatus;
use crate::command::{CommandLine, CommandRunner};
use crate::config::IndexConfig;
use crate::config_store::ConfigurationStore;
use crate::error::{ChartreuseError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Section of the eslembic ini file holding the cluster URLs
pub const ESLEMBIC_SECTION: &str = "eslembic";

/// Operations the orchestrator needs from the index migration tool
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IndexTool: Send + Sync {
    async fn current_revision(&self) -> Result<RevisionStatus>;

    async fn upgrade_to_head(&self) -> Result<()>;

    /// Copy documents into the indices created by the last upgrade
    async fn migrate(&self) -> Result<()>;

    /// Drop indices no longer referenced by any alias
    async fn clean(&self) -> Result<()>;
}

/// Answers whether a search cluster accepts requests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EndpointCheck: Send + Sync {
    async fn is_reachable(&self, url: &str) -> bool;
}

/// `eslembic current` marks the head revision with `(head)`, not necessarily on its own line
pub fn parse_index_current_output(output: &str) -> RevisionStatus {
    let revision_id = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .and_then(|line| line.split_whitespace().next())
        .map(str::to_string);
    RevisionStatus {
        revision_id,
        is_head: output.contains("(head)"),
    }
}

/// Drives the `eslembic` command line
pub struct EslembicCli {
    runner: Arc<dyn CommandRunner>,
    executable: String,
    directory: PathBuf,
    config_file: PathBuf,
}

impl EslembicCli {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        executable: impl Into<String>,
        config: &IndexConfig,
    ) -> Self {
        Self {
            runner,
            executable: executable.into(),
            directory: config.directory_path.clone(),
            config_file: config.config_file_path.clone(),
        }
    }

    fn command(&self, subcommand: &[&str]) -> CommandLine {
        CommandLine::new(&self.executable)
            .arg("-c")
            .arg(self.config_file.display().to_string())
            .args(subcommand.iter().copied())
    }
}

#[async_trait]
impl IndexTool for EslembicCli {
    async fn current_revision(&self) -> Result<RevisionStatus> {
        let output = self
            .runner
            .run_or_fail(&self.command(&["current"]), &self.directory)
            .await?;
        Ok(parse_index_current_output(&output.stdout))
    }

    async fn upgrade_to_head(&self) -> Result<()> {
        let history = self
            .runner
            .run_or_fail(&self.command(&["history"]), &self.directory)
            .await?;
        info!("Index revisions:\n{}", history.stdout.trim_end());
        self.runner
            .run_or_fail(&self.command(&["upgrade", "head"]), &self.directory)
            .await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        self.runner
            .run_or_fail(&self.command(&["migrate"]), &self.directory)
            .await?;
        Ok(())
    }

    async fn clean(&self) -> Result<()> {
        self.runner
            .run_or_fail(&self.command(&["clean"]), &self.directory)
            .await?;
        Ok(())
    }
}

/// Migration state and operations for the search index
pub struct IndexMigrationHelper {
    config: IndexConfig,
    tool: Box<dyn IndexTool>,
    migration_needed: bool,
}

impl IndexMigrationHelper {
    pub async fn new(
        config: IndexConfig,
        store: &mut dyn ConfigurationStore,
        tool: Box<dyn IndexTool>,
        check: &dyn EndpointCheck,
        skip_checks: bool,
    ) -> Result<Self> {
        let mut helper = Self::configure(config, store, tool)?;

        helper.migration_needed = if skip_checks {
            false
        } else if !check.is_reachable(&helper.config.url).await {
            warn!("Search cluster is not reachable, not upgrading the index");
            false
        } else {
            let status = helper.tool.current_revision().await?;
            if status.is_head {
                info!("Index does not need migration");
            } else {
                info!("Index can be migrated");
            }
            !status.is_head
        };
        Ok(helper)
    }

    /// Point the tool at the index without asking it anything
    ///
    /// The second phase only needs the ini rewrite; the revision check belongs to the hook.
    pub fn configure(
        config: IndexConfig,
        store: &mut dyn ConfigurationStore,
        tool: Box<dyn IndexTool>,
    ) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(ChartreuseError::config(
                "Search index URL is not set, not upgrading the index",
            ));
        }

        store.set_connection_string(&config.config_file(), ESLEMBIC_SECTION, &config.url)?;

        Ok(Self {
            config,
            tool,
            migration_needed: false,
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn is_migration_needed(&self) -> bool {
        self.migration_needed
    }

    pub async fn upgrade_db(&self) -> Result<()> {
        info!("Index needs to be upgraded. Proceeding");
        self.tool.upgrade_to_head().await?;
        info!("Done upgrading index");
        Ok(())
    }

    pub async fn migrate(&self) -> Result<()> {
        info!("Migrating index documents");
        self.tool.migrate().await
    }

    pub async fn clean(&self) -> Result<()> {
        info!("Cleaning unused indices");
        self.tool.clean().await
    }

    /// Run the second phase steps enabled by `enable_migrate` and `enable_clean`
    pub async fn run_second_phase(&self, enable_migrate: bool, enable_clean: bool) -> Result<()> {
        if enable_migrate {
            self.migrate().await?;
        }
        if enable_clean {
            self.clean().await?;
        }
        Ok(())
    }
}
