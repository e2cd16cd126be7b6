//! The migration tool as a capability.
//!
//! Callers see [`MigrationTool`]; the text scraping of `alembic current` stays in this
//! module so it can be replaced by a structured call without touching the decision logic.

use crate::command::{CommandLine, CommandRunner, split_parameters};
use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use tracing::info;

/// Bookkeeping table the migration tool keeps in every managed database
pub const VERSION_TABLE: &str = "alembic_version";

static HEAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mR)^(\w+)\s\(head\)$").expect("head pattern is valid"));
static REVISION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mR)^(\w+)$").expect("revision pattern is valid"));

/// Where a database stands in the tool's revision graph
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RevisionStatus {
    /// Current revision, when the tool reported one
    pub revision_id: Option<String>,
    pub is_head: bool,
}

/// Operations the orchestrator needs from a migration tool
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MigrationTool: Send + Sync {
    /// Ask the tool where the database currently stands
    async fn current_revision(&self) -> Result<RevisionStatus>;

    /// Apply every pending revision
    async fn upgrade_to_head(&self) -> Result<()>;
}

/// Interpret the output of `alembic current`
///
/// Only a line of the exact form `<revision> (head)` means the database is current.
/// Anything else, the empty string included, means it is not.
pub fn parse_current_output(output: &str) -> RevisionStatus {
    if let Some(captures) = HEAD_RE.captures(output) {
        return RevisionStatus {
            revision_id: Some(captures[1].to_string()),
            is_head: true,
        };
    }
    let revision_id = REVISION_RE
        .captures_iter(output)
        .last()
        .map(|captures| captures[1].to_string());
    RevisionStatus {
        revision_id,
        is_head: false,
    }
}

/// Drives the `alembic` command line for one configuration section
pub struct AlembicCli {
    runner: Arc<dyn CommandRunner>,
    executable: String,
    directory: PathBuf,
    config_file: PathBuf,
    parameters: Vec<String>,
}

impl AlembicCli {
    /// `additional_parameters` is split shell-style and placed before the subcommand
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        executable: impl Into<String>,
        directory: impl Into<PathBuf>,
        config_file: impl Into<PathBuf>,
        additional_parameters: &str,
    ) -> Result<Self> {
        Ok(Self {
            runner,
            executable: executable.into(),
            directory: directory.into(),
            config_file: config_file.into(),
            parameters: split_parameters(additional_parameters)?,
        })
    }

    fn command(&self, subcommand: &[&str]) -> CommandLine {
        CommandLine::new(&self.executable)
            .arg("-c")
            .arg(self.config_file.display().to_string())
            .args(self.parameters.iter().cloned())
            .args(subcommand.iter().copied())
    }
}

#[async_trait]
impl MigrationTool for AlembicCli {
    async fn current_revision(&self) -> Result<RevisionStatus> {
        let output = self
            .runner
            .run_or_fail(&self.command(&["current"]), &self.directory)
            .await?;
        let status = parse_current_output(&output.stdout);
        info!(
            revision = status.revision_id.as_deref().unwrap_or("none"),
            is_head = status.is_head,
            "Current revision"
        );
        Ok(status)
    }

    async fn upgrade_to_head(&self) -> Result<()> {
        let history = self
            .runner
            .run_or_fail(&self.command(&["history", "-r", "current:head"]), &self.directory)
            .await?;
        info!("Pending revisions:\n{}", history.stdout.trim_end());

        self.runner
            .run_or_fail(&self.command(&["upgrade", "head"]), &self.directory)
            .await?;
        Ok(())
    }
}
