//! Declarative configuration of the databases under migration management.
//!
//! The chart renders a TOML file with one `[databases.<name>]` table per database and an
//! optional `[index]` table for search-index migrations. Databases keep the order in which
//! they appear in the file; that order is the upgrade order.

use crate::error::{ChartreuseError, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SUPPORTED_DIALECTS: &[&str] = &[
    "postgresql",
    "mysql",
    "sqlite",
    "oracle",
    "mssql",
    "clickhouse",
];

/// One database under migration management
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug)]
pub struct DatabaseConfig {
    /// Unique key, also the alembic section name
    pub name: String,
    url: SecretString,
    pub alembic_directory: PathBuf,
    /// Relative paths resolve against `alembic_directory`
    pub alembic_config_file: PathBuf,
    pub allow_migration_on_empty_database: bool,
    pub additional_parameters: String,
    /// Whether an HA operator (Patroni) provisions this database's roles
    pub is_managed_by_ha_operator: bool,
}

impl DatabaseConfig {
    /// Create a configuration with the default options
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        alembic_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            url: SecretString::from(url.into()),
            alembic_directory: alembic_directory.into(),
            alembic_config_file: PathBuf::from(default_alembic_config_file()),
            allow_migration_on_empty_database: true,
            additional_parameters: String::new(),
            is_managed_by_ha_operator: false,
        }
    }

    pub fn with_config_file(mut self, config_file: impl Into<PathBuf>) -> Self {
        self.alembic_config_file = config_file.into();
        self
    }

    pub fn with_allow_migration_on_empty_database(mut self, allow: bool) -> Self {
        self.allow_migration_on_empty_database = allow;
        self
    }

    pub fn with_additional_parameters(mut self, parameters: impl Into<String>) -> Self {
        self.additional_parameters = parameters.into();
        self
    }

    pub fn with_ha_operator(mut self, managed: bool) -> Self {
        self.is_managed_by_ha_operator = managed;
        self
    }

    /// Connection URL, credentials included
    pub fn url(&self) -> &SecretString {
        &self.url
    }

    /// Connection URL safe for logs
    pub fn redacted_url(&self) -> String {
        redact_url(self.url.expose_secret())
    }

    /// URL scheme without driver suffix (`postgresql+psycopg2` gives `postgresql`)
    pub fn dialect(&self) -> Option<String> {
        let url = self.url.expose_secret();
        let (scheme, _) = url.split_once("://")?;
        let dialect = scheme.split('+').next().unwrap_or(scheme);
        Some(dialect.to_lowercase())
    }

    /// Path of the alembic ini file
    pub fn config_file_path(&self) -> PathBuf {
        self.alembic_directory.join(&self.alembic_config_file)
    }
}

/// Search-index (Eslembic) migration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    pub url: String,
    #[serde(default = "default_index_directory")]
    pub directory_path: PathBuf,
    #[serde(default = "default_index_config_file")]
    pub config_file_path: PathBuf,
    #[serde(default)]
    pub enable_migrate: bool,
    #[serde(default)]
    pub enable_clean: bool,
    /// Image for the second-phase job; without it that phase runs inline
    #[serde(default)]
    pub job_image: Option<String>,
    #[serde(default = "default_job_name")]
    pub job_name: String,
}

impl IndexConfig {
    pub fn new(url: impl Into<String>, directory_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            directory_path: directory_path.into(),
            config_file_path: default_index_config_file(),
            enable_migrate: false,
            enable_clean: false,
            job_image: None,
            job_name: default_job_name(),
        }
    }

    /// Where the application image ships the eslembic project
    pub fn default_directory() -> PathBuf {
        default_index_directory()
    }

    /// Whether a second migration phase was requested
    pub fn has_second_phase(&self) -> bool {
        self.enable_migrate || self.enable_clean
    }

    pub fn config_file(&self) -> PathBuf {
        self.directory_path.join(&self.config_file_path)
    }
}

/// Whole configuration file
#[derive(Debug)]
pub struct MultiDatabaseConfig {
    /// Databases in file order
    pub databases: Vec<DatabaseConfig>,
    pub index: Option<IndexConfig>,
}

impl MultiDatabaseConfig {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ChartreuseError::config(format!(
                "Multi-database configuration file not found: {}",
                path.display()
            )));
        }
        if !path.is_file() {
            return Err(ChartreuseError::config(format!(
                "Multi-database configuration path is not a file: {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(
            count = config.databases.len(),
            databases = %config.database_names().join(", "),
            "Loaded database configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)?;

        if raw.databases.is_empty() {
            return Err(ChartreuseError::config(
                "At least one database must be configured",
            ));
        }

        let mut databases = Vec::with_capacity(raw.databases.len());
        for (name, value) in raw.databases {
            let entry: DatabaseEntry = value.try_into().map_err(|e: toml::de::Error| {
                ChartreuseError::config(format!("Invalid configuration for database '{}': {}", name, e))
            })?;
            databases.push(entry.into_config(name)?);
        }

        if let Some(index) = &raw.index
            && index.url.trim().is_empty()
        {
            return Err(ChartreuseError::config("[index] url must not be empty"));
        }

        Ok(Self {
            databases,
            index: raw.index,
        })
    }

    pub fn database_names(&self) -> Vec<&str> {
        self.databases.iter().map(|db| db.name.as_str()).collect()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    databases: toml::Table,
    #[serde(default)]
    index: Option<IndexConfig>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseEntry {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    dialect: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u32>,
    #[serde(default)]
    database: Option<String>,
    alembic_directory_path: PathBuf,
    #[serde(default = "default_alembic_config_file")]
    alembic_config_file_path: PathBuf,
    #[serde(default = "default_true")]
    allow_migration_for_empty_database: bool,
    #[serde(default)]
    additional_parameters: String,
    #[serde(default)]
    is_patroni_postgresql: bool,
}

impl DatabaseEntry {
    fn into_config(self, name: String) -> Result<DatabaseConfig> {
        if name.trim().is_empty() {
            return Err(ChartreuseError::config("Database names must not be empty"));
        }
        let url = self.build_url(&name)?;
        let config = DatabaseConfig {
            name,
            url: SecretString::from(url),
            alembic_directory: self.alembic_directory_path,
            alembic_config_file: self.alembic_config_file_path,
            allow_migration_on_empty_database: self.allow_migration_for_empty_database,
            additional_parameters: self.additional_parameters,
            is_managed_by_ha_operator: self.is_patroni_postgresql,
        };
        if let Some(dialect) = config.dialect()
            && !SUPPORTED_DIALECTS.contains(&dialect.as_str())
        {
            warn!(
                database = %config.name,
                dialect = %dialect,
                "Dialect might not be supported. Supported dialects: {}",
                SUPPORTED_DIALECTS.join(", ")
            );
        }
        Ok(config)
    }

    fn build_url(&self, name: &str) -> Result<String> {
        if let Some(url) = self.url.as_deref().filter(|url| !url.trim().is_empty()) {
            return Ok(url.to_string());
        }

        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
        let mut missing = Vec::new();
        for (field, value) in [
            ("dialect", &self.dialect),
            ("user", &self.user),
            ("password", &self.password),
            ("host", &self.host),
            ("database", &self.database),
        ] {
            if !present(value) {
                missing.push(field);
            }
        }
        if self.port.is_none() {
            missing.push("port");
        }
        if !missing.is_empty() {
            return Err(ChartreuseError::config(format!(
                "Database '{}' has no url and is missing connection components: {}",
                name,
                missing.join(", ")
            )));
        }

        let port = self.port.unwrap_or_default();
        if port == 0 || port > 65535 {
            return Err(ChartreuseError::config(format!(
                "Database '{}' has an invalid port: {}",
                name, port
            )));
        }

        Ok(format!(
            "{}://{}:{}@{}:{}/{}",
            self.dialect.as_deref().unwrap_or_default(),
            self.user.as_deref().unwrap_or_default(),
            self.password.as_deref().unwrap_or_default(),
            self.host.as_deref().unwrap_or_default(),
            port,
            self.database.as_deref().unwrap_or_default(),
        ))
    }
}

/// Replace the password of a URL with `***`
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                // Only fails for cannot-be-a-base URLs, which carry no password.
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable url>".to_string(),
    }
}

fn default_alembic_config_file() -> PathBuf {
    PathBuf::from("alembic.ini")
}

fn default_true() -> bool {
    true
}

fn default_index_directory() -> PathBuf {
    PathBuf::from("/app/eslembic")
}

fn default_index_config_file() -> PathBuf {
    PathBuf::from("eslembic.ini")
}

fn default_job_name() -> String {
    "chartreuse-migrate".to_string()
}
