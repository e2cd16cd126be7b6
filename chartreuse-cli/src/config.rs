use chartreuse_core::lifecycle::{
    MIGRATE_ENABLE_CLEAN_ENV, MIGRATE_ENABLE_MIGRATE_ENV, MULTI_CONFIG_PATH_ENV,
};
use chartreuse_core::{
    HelperOptions, IndexConfig, LifecycleSettings, ORCHESTRATOR_VERSION, PollPolicy,
    index_config_from_env,
};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "/app/config/chartreuse.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{name} must be a number of seconds, got '{value}'")]
    InvalidSeconds { name: &'static str, value: String },

    #[error("{0} is not set")]
    Missing(&'static str),
}

/// Process settings of a hook invocation, read from the environment Helm renders
#[derive(Debug, Clone)]
pub struct HookSettings {
    pub packaging_version: String,
    pub release_name: Option<String>,
    pub enable_stop_pods: bool,
    pub enable_start_pods: bool,
    pub upgrade_before_deployment: bool,
    pub is_install: bool,
    pub skip_db_checks: bool,
    pub alembic_executable: String,
    pub eslembic_executable: String,
    pub ha_timeout: Duration,
    pub stop_pods_timeout: Duration,
    pub config_path: PathBuf,
    pub migrate_enable_migrate: bool,
    pub migrate_enable_clean: bool,
    /// Index settings a second-phase job received through its environment
    pub job_index: Option<IndexConfig>,
}

impl HookSettings {
    /// Load settings from the process environment
    pub fn load() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let flag = |name: &str, default: bool| lookup(name).map_or(default, |v| parse_flag(&v));
        let seconds = |name: &'static str, default: u64| -> Result<Duration, SettingsError> {
            match lookup(name) {
                Some(value) if !value.trim().is_empty() => value
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| SettingsError::InvalidSeconds { name, value }),
                _ => Ok(Duration::from_secs(default)),
            }
        };

        Ok(Self {
            packaging_version: lookup("HELM_CHART_VERSION").unwrap_or_default(),
            release_name: lookup("CHARTREUSE_RELEASE_NAME").filter(|name| !name.trim().is_empty()),
            enable_stop_pods: flag("CHARTREUSE_ENABLE_STOP_PODS", true),
            enable_start_pods: flag("CHARTREUSE_ENABLE_START_PODS", true),
            upgrade_before_deployment: flag("CHARTREUSE_UPGRADE_BEFORE_DEPLOYMENT", false),
            is_install: flag("HELM_IS_INSTALL", false),
            skip_db_checks: flag("CHARTREUSE_SKIP_DB_CHECKS", false),
            alembic_executable: lookup("CHARTREUSE_ALEMBIC_EXECUTABLE")
                .filter(|exe| !exe.trim().is_empty())
                .unwrap_or_else(|| "alembic".to_string()),
            eslembic_executable: lookup("CHARTREUSE_ESLEMBIC_EXECUTABLE")
                .filter(|exe| !exe.trim().is_empty())
                .unwrap_or_else(|| "eslembic".to_string()),
            ha_timeout: seconds("CHARTREUSE_HA_TIMEOUT_SECONDS", 60)?,
            stop_pods_timeout: seconds("CHARTREUSE_STOP_PODS_TIMEOUT_SECONDS", 3600)?,
            config_path: lookup(MULTI_CONFIG_PATH_ENV)
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            migrate_enable_migrate: flag(MIGRATE_ENABLE_MIGRATE_ENV, false),
            migrate_enable_clean: flag(MIGRATE_ENABLE_CLEAN_ENV, false),
            job_index: index_config_from_env(&lookup),
        })
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, config: Option<PathBuf>, release: Option<String>) -> Self {
        if let Some(config) = config {
            self.config_path = config;
        }
        if let Some(release) = release {
            self.release_name = Some(release);
        }
        self
    }

    pub fn release_name(&self) -> Result<&str, SettingsError> {
        self.release_name
            .as_deref()
            .ok_or(SettingsError::Missing("CHARTREUSE_RELEASE_NAME"))
    }

    pub fn helper_options(&self) -> HelperOptions {
        let default = PollPolicy::role_privileges();
        HelperOptions {
            skip_db_checks: self.skip_db_checks,
            role_privileges: PollPolicy::new(default.interval, self.ha_timeout),
        }
    }

    pub fn to_lifecycle_settings(&self) -> LifecycleSettings {
        let default = PollPolicy::pods_stopped();
        LifecycleSettings {
            packaging_version: self.packaging_version.clone(),
            orchestrator_version: ORCHESTRATOR_VERSION.to_string(),
            enable_stop_pods: self.enable_stop_pods,
            enable_start_pods: self.enable_start_pods,
            upgrade_before_deployment: self.upgrade_before_deployment,
            is_install: self.is_install,
            pods_stopped: PollPolicy::new(default.interval, self.stop_pods_timeout),
            config_path: self.config_path.clone(),
        }
    }
}

/// Empty, `false` and `0` are false, anything else is true
pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    !(value.is_empty() || value.eq_ignore_ascii_case("false") || value == "0")
}
