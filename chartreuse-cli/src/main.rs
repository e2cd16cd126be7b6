use anyhow::{Context, Result, anyhow};
use chartreuse_cluster::{ClusterBackend, ClusterConfig, KubeClient, KubernetesWorkloadController};
use chartreuse_core::{
    DeploymentLifecycleCoordinator, HookKind, IniFileStore, LifecycleReport, LogContext,
    MultiDatabaseConfig, ORCHESTRATOR_VERSION, OrchestratorBuilder, ProcessRunner,
    ensure_safe_run, init_hook_logging,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

mod config;
use config::HookSettings;


#[derive(Parser)]
#[command(name = "chartreuse")]
#[command(about = "Run database migrations from Helm hooks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the multi-database configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Helm release whose workload is stopped and started
    #[arg(short, long, global = true)]
    release: Option<String>,
}

#[derive(Parser)]
enum Commands {
    /// Pre-install/pre-upgrade hook: stop the workload when a migration is needed
    PreDeploy,
    /// Post-install/post-upgrade hook: migrate and restart the workload
    PostDeploy,
    /// Post-rollback hook: start the workload back
    PostRollback,
    /// Second phase of the search-index migration
    Migrate {
        /// Run the index `migrate` step regardless of the environment
        #[arg(long)]
        enable_migrate: bool,
        /// Run the index `clean` step regardless of the environment
        #[arg(long)]
        enable_clean: bool,
    },
    /// Load the configuration file and print the databases it defines
    ValidateConfig,
}

impl Commands {
    fn hook(&self) -> Option<HookKind> {
        match self {
            Commands::PreDeploy => Some(HookKind::PreDeploy),
            Commands::PostDeploy => Some(HookKind::PostDeploy),
            Commands::PostRollback => Some(HookKind::PostRollback),
            Commands::Migrate { .. } | Commands::ValidateConfig => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_hook_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = HookSettings::load()?.with_overrides(cli.config, cli.release);

    match cli.command {
        Commands::ValidateConfig => validate_config(&settings),
        Commands::Migrate {
            enable_migrate,
            enable_clean,
        } => {
            migrate(
                &settings,
                enable_migrate || settings.migrate_enable_migrate,
                enable_clean || settings.migrate_enable_clean,
            )
            .await
        }
        command => {
            let hook = command
                .hook()
                .ok_or_else(|| anyhow!("not a hook subcommand"))?;
            let report = run_hook(&settings, hook).await?;
            info!(
                hook = %report.hook,
                migration_needed = report.migration_needed,
                pods_restarted = report.pods_restarted,
                second_phase = ?report.second_phase,
                "Hook completed"
            );
            Ok(())
        }
    }
}

fn builder(settings: &HookSettings) -> OrchestratorBuilder {
    let backend = ClusterBackend::new(Arc::new(ProcessRunner::new()), &settings.alembic_executable)
        .with_eslembic_executable(&settings.eslembic_executable);
    OrchestratorBuilder {
        database_store: Box::new(IniFileStore::alembic()),
        index_store: Box::new(IniFileStore::eslembic()),
        backend: Box::new(backend.clone()),
        index_backend: Box::new(backend),
        options: settings.helper_options(),
    }
}

async fn run_hook(settings: &HookSettings, hook: HookKind) -> Result<LifecycleReport> {
    if hook != HookKind::PostRollback {
        ensure_safe_run(&settings.packaging_version, ORCHESTRATOR_VERSION)?;
    }

    let release = settings.release_name()?;
    let client = KubeClient::new(ClusterConfig::in_cluster()?)?;
    let workload = Arc::new(KubernetesWorkloadController::new(client, release));

    // Rolling back only starts pods; the configuration may not even be mounted anymore
    let config = if hook == HookKind::PostRollback {
        MultiDatabaseConfig {
            databases: Vec::new(),
            index: None,
        }
    } else {
        MultiDatabaseConfig::from_file(&settings.config_path)?
    };

    let mut coordinator = DeploymentLifecycleCoordinator::new(
        settings.to_lifecycle_settings(),
        builder(settings),
        workload,
    );
    Ok(coordinator.run(hook, config).await?)
}

async fn migrate(settings: &HookSettings, enable_migrate: bool, enable_clean: bool) -> Result<()> {
    let context = LogContext::new("migrate", "chartreuse-cli");
    context.info("Running the index second phase");

    // The job's pod gets the index through its environment, the hook's pod through the file
    let index = match &settings.job_index {
        Some(index) => index.clone(),
        None => MultiDatabaseConfig::from_file(&settings.config_path)?
            .index
            .with_context(|| {
                format!(
                    "{} defines no [index] table, nothing to migrate",
                    settings.config_path.display()
                )
            })?,
    };

    let helper = builder(settings).configure_index(index)?;
    helper.run_second_phase(enable_migrate, enable_clean).await?;
    context.info("Index second phase completed");
    Ok(())
}

fn validate_config(settings: &HookSettings) -> Result<()> {
    let config = MultiDatabaseConfig::from_file(&settings.config_path)?;
    println!("Configuration: {}", settings.config_path.display());
    for database in &config.databases {
        println!("  {}: {}", database.name, database.redacted_url());
    }
    if let Some(index) = &config.index {
        println!("  [index]: {}", chartreuse_core::redact_url(&index.url));
    }
    Ok(())
}
