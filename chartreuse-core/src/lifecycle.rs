//! One Helm hook invocation, from compatibility gate to pod restart.
//!
//! Every hook goes through the same state machine:
//!
//! ```text
//! Start -> GateChecked -> Decided -> [PodsStopped] -> Upgraded -> [PodsStarted] -> Done
//! ```
//!
//! `pre-deploy` stops after the pods are stopped; the upgrade itself belongs to `post-deploy`.
//! `post-rollback` only starts the pods back.

use crate::compat::ensure_safe_run;
use crate::config::{IndexConfig, MultiDatabaseConfig};
use crate::error::{ChartreuseError, Result};
use crate::logging::LogContext;
use crate::orchestrator::{MultiDatabaseOrchestrator, OrchestratorBuilder};
use crate::poll::{PollPolicy, poll_until};
use crate::workload::{JobSpec, WorkloadController};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, warn};

/// Environment variables read by the `migrate` subcommand of the second-phase job
pub const MIGRATE_ENABLE_MIGRATE_ENV: &str = "CHARTREUSE_MIGRATE_ENABLE_MIGRATE";
pub const MIGRATE_ENABLE_CLEAN_ENV: &str = "CHARTREUSE_MIGRATE_ENABLE_CLEAN";
pub const MULTI_CONFIG_PATH_ENV: &str = "CHARTREUSE_MULTI_CONFIG_PATH";
/// Index settings handed to the job, whose pod does not mount the hook's configuration file
pub const INDEX_URL_ENV: &str = "CHARTREUSE_INDEX_URL";
pub const INDEX_DIRECTORY_ENV: &str = "CHARTREUSE_INDEX_DIRECTORY";
pub const INDEX_CONFIG_FILE_ENV: &str = "CHARTREUSE_INDEX_CONFIG_FILE";

/// Which Helm hook invoked this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookKind {
    /// pre-install / pre-upgrade
    PreDeploy,
    /// post-install / post-upgrade
    PostDeploy,
    PostRollback,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::PreDeploy => "pre-deploy",
            HookKind::PostDeploy => "post-deploy",
            HookKind::PostRollback => "post-rollback",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Start,
    GateChecked,
    Decided { needed: bool },
    PodsStopped,
    Upgraded,
    PodsStarted,
    Done,
}

/// How the second migration phase of the index was handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondPhase {
    NotRequested,
    Inline,
    Scheduled { job_name: String },
}

/// What happened during one hook run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleReport {
    pub hook: HookKind,
    pub states: Vec<LifecycleState>,
    pub migration_needed: bool,
    /// False when the restart was skipped or failed
    pub pods_restarted: bool,
    pub second_phase: SecondPhase,
}

impl LifecycleReport {
    fn new(hook: HookKind) -> Self {
        Self {
            hook,
            states: vec![LifecycleState::Start],
            migration_needed: false,
            pods_restarted: false,
            second_phase: SecondPhase::NotRequested,
        }
    }

    fn enter(&mut self, state: LifecycleState) {
        debug!(state = ?state, "Lifecycle transition");
        self.states.push(state);
    }
}

/// Process-wide switches of the coordinator
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Version of the Helm chart that invoked the hook
    pub packaging_version: String,
    pub orchestrator_version: String,
    pub enable_stop_pods: bool,
    pub enable_start_pods: bool,
    /// Migrations run before the new code is rolled out
    pub upgrade_before_deployment: bool,
    pub is_install: bool,
    pub pods_stopped: PollPolicy,
    /// Configuration path handed to the second-phase job
    pub config_path: PathBuf,
}

impl LifecycleSettings {
    /// Restart pods after an upgrade only when stopping and starting are both enabled
    ///
    /// When upgrading before deployment on an existing release, Helm rolls the new pods
    /// out itself and restarting here would bring back the old ones.
    pub fn should_restart_pods(&self) -> bool {
        self.enable_stop_pods
            && self.enable_start_pods
            && !(self.upgrade_before_deployment && !self.is_install)
    }
}

/// Job re-invoking this binary in `migrate` mode for the index second phase
pub fn second_phase_job(index: &IndexConfig, image: &str, config_path: &Path) -> JobSpec {
    JobSpec::new(&index.job_name, image)
        .arg("migrate")
        .env(MIGRATE_ENABLE_MIGRATE_ENV, flag(index.enable_migrate))
        .env(MIGRATE_ENABLE_CLEAN_ENV, flag(index.enable_clean))
        .env(MULTI_CONFIG_PATH_ENV, config_path.display().to_string())
        .env(INDEX_URL_ENV, &index.url)
        .env(INDEX_DIRECTORY_ENV, index.directory_path.display().to_string())
        .env(INDEX_CONFIG_FILE_ENV, index.config_file_path.display().to_string())
}

/// Index settings carried by a second-phase job's environment, if any
pub fn index_config_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<IndexConfig> {
    let url = lookup(INDEX_URL_ENV).filter(|url| !url.trim().is_empty())?;
    let directory = lookup(INDEX_DIRECTORY_ENV)
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(IndexConfig::default_directory);
    let mut config = IndexConfig::new(url, directory);
    if let Some(file) = lookup(INDEX_CONFIG_FILE_ENV).filter(|file| !file.trim().is_empty()) {
        config.config_file_path = PathBuf::from(file);
    }
    config.enable_migrate = lookup(MIGRATE_ENABLE_MIGRATE_ENV).as_deref() == Some("1");
    config.enable_clean = lookup(MIGRATE_ENABLE_CLEAN_ENV).as_deref() == Some("1");
    Some(config)
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

/// Runs a hook against an orchestrator and the release's workload
pub struct DeploymentLifecycleCoordinator {
    settings: LifecycleSettings,
    builder: OrchestratorBuilder,
    workload: Arc<dyn WorkloadController>,
}

impl DeploymentLifecycleCoordinator {
    pub fn new(
        settings: LifecycleSettings,
        builder: OrchestratorBuilder,
        workload: Arc<dyn WorkloadController>,
    ) -> Self {
        Self {
            settings,
            builder,
            workload,
        }
    }

    pub async fn run(
        &mut self,
        hook: HookKind,
        config: MultiDatabaseConfig,
    ) -> Result<LifecycleReport> {
        let context = LogContext::new(hook.as_str(), "lifecycle");
        self.run_hook(hook, config).instrument(context.span()).await
    }

    async fn run_hook(
        &mut self,
        hook: HookKind,
        config: MultiDatabaseConfig,
    ) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::new(hook);
        info!(hook = %hook, "Starting chartreuse");

        if hook == HookKind::PostRollback {
            info!("Rollback detected, starting workload pods back");
            self.workload.start_workload_pods().await?;
            report.pods_restarted = true;
            report.enter(LifecycleState::PodsStarted);
            report.enter(LifecycleState::Done);
            return Ok(report);
        }

        ensure_safe_run(
            &self.settings.packaging_version,
            &self.settings.orchestrator_version,
        )?;
        report.enter(LifecycleState::GateChecked);

        let orchestrator = self.builder.build(config).await?;
        report.migration_needed = orchestrator.is_migration_needed();
        report.enter(LifecycleState::Decided {
            needed: report.migration_needed,
        });

        if !report.migration_needed {
            info!("No migration needed, nothing to do");
            report.enter(LifecycleState::Done);
            return Ok(report);
        }

        if self.settings.enable_stop_pods {
            self.stop_pods().await?;
            report.enter(LifecycleState::PodsStopped);
        }

        if hook == HookKind::PreDeploy {
            info!("Workload stopped, the upgrade will run in the post-deploy hook");
            report.enter(LifecycleState::Done);
            return Ok(report);
        }

        orchestrator.upgrade().await?;
        report.enter(LifecycleState::Upgraded);

        if self.settings.should_restart_pods() {
            match self.restart_pods().await {
                Ok(()) => {
                    report.pods_restarted = true;
                    report.enter(LifecycleState::PodsStarted);
                }
                Err(e) => {
                    error!(
                        error = %e,
                        recoverable = e.is_recoverable(),
                        "Could not start workload pods after a successful migration. THIS SHOULD BE DONE MANUALLY!"
                    );
                }
            }
        } else {
            info!("Not restarting workload pods");
        }

        report.second_phase = self.second_phase(&orchestrator).await?;
        report.enter(LifecycleState::Done);
        Ok(report)
    }

    async fn stop_pods(&self) -> Result<()> {
        info!("Stopping workload pods");
        self.workload.stop_workload_pods().await?;

        let policy = self.settings.pods_stopped;
        let workload = self.workload.as_ref();
        let stopped = poll_until(&policy, || async move {
            let stopped = workload.is_workload_stopped().await?;
            if !stopped {
                info!("Waiting for workload pods to stop");
            }
            Ok(stopped)
        })
        .await?;

        if !stopped {
            return Err(ChartreuseError::readiness_timeout(
                "workload pods to stop",
                policy.timeout.as_secs(),
                "Check `kubectl get deployments -l chartreuse=enabled` for deployments still running",
            ));
        }
        info!("Workload pods stopped");
        Ok(())
    }

    async fn restart_pods(&self) -> Result<()> {
        info!("Starting workload pods");
        self.workload
            .start_workload_pods()
            .await
            .map_err(|e| ChartreuseError::pod_restart(e.to_string()))
    }

    async fn second_phase(&self, orchestrator: &MultiDatabaseOrchestrator) -> Result<SecondPhase> {
        let Some(index) = orchestrator.index() else {
            return Ok(SecondPhase::NotRequested);
        };
        let config = index.config();
        if !config.has_second_phase() {
            return Ok(SecondPhase::NotRequested);
        }

        match &config.job_image {
            Some(image) => {
                let spec = second_phase_job(config, image, &self.settings.config_path);
                self.workload.delete_job(&spec.name).await?;
                self.workload.create_job(&spec).await?;
                let status = self.workload.get_job(&spec.name).await?;
                info!(
                    job = %spec.name,
                    active = status.active,
                    finished = status.is_finished(),
                    "Second migration phase scheduled"
                );
                Ok(SecondPhase::Scheduled {
                    job_name: spec.name,
                })
            }
            None => {
                warn!("No job image configured, running the second migration phase inline");
                index
                    .run_second_phase(config.enable_migrate, config.enable_clean)
                    .await?;
                Ok(SecondPhase::Inline)
            }
        }
    }
}
