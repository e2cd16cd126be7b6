pub mod alembic;
pub mod command;
pub mod compat;
pub mod config;
pub mod config_store;
pub mod error;
pub mod helper;
pub mod index;
pub mod inspector;
pub mod lifecycle;
pub mod logging;
pub mod orchestrator;
pub mod poll;
pub mod workload;

mod integration_tests;
#[cfg(test)]
mod testing;

pub use alembic::{AlembicCli, MigrationTool, RevisionStatus, VERSION_TABLE, parse_current_output};
pub use command::{CommandLine, CommandOutput, CommandRunner, ProcessRunner, split_parameters};
pub use compat::{ORCHESTRATOR_VERSION, ensure_safe_run};
pub use config::{DatabaseConfig, IndexConfig, MultiDatabaseConfig, redact_url};
pub use config_store::{ConfigurationStore, IniFileStore, rewrite_section_key};
pub use error::{ChartreuseError, Result, ToolFailure};
pub use helper::{HA_OPERATOR_PARAMETER, HelperOptions, MigrationBackend, MigrationHelper};
pub use index::{EndpointCheck, EslembicCli, IndexMigrationHelper, IndexTool};
pub use inspector::{DatabaseInspector, is_database_empty};
pub use lifecycle::{
    DeploymentLifecycleCoordinator, HookKind, LifecycleReport, LifecycleSettings, LifecycleState,
    SecondPhase, index_config_from_env,
};
pub use logging::{
    LOG_FORMAT_ENV, LogConfig, LogContext, LogFormat, RunId, init_hook_logging, init_logging,
};
pub use orchestrator::{IndexBackend, MultiDatabaseOrchestrator, OrchestratorBuilder};
pub use poll::{PollPolicy, poll_until};
pub use workload::{JobSpec, JobStatus, WorkloadController};
