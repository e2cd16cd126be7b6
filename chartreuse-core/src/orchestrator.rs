//! One release, many databases.

use crate::config::{DatabaseConfig, IndexConfig, MultiDatabaseConfig};
use crate::config_store::ConfigurationStore;
use crate::error::{ChartreuseError, Result};
use crate::helper::{HelperOptions, MigrationBackend, MigrationHelper};
use crate::index::{EndpointCheck, IndexMigrationHelper, IndexTool};
use tracing::info;

/// Owns one [`MigrationHelper`] per configured database, in configuration order
pub struct MultiDatabaseOrchestrator {
    helpers: Vec<MigrationHelper>,
    index: Option<IndexMigrationHelper>,
    migration_needed: bool,
}

impl MultiDatabaseOrchestrator {
    /// Build every helper in order
    ///
    /// Each database's alembic invocations select its ini section with `-n <name>`, appended
    /// to the user's additional parameters. Helpers are built one after the other, so the
    /// shared ini file is only ever rewritten by one of them at a time.
    pub async fn new(
        databases: Vec<DatabaseConfig>,
        store: &mut dyn ConfigurationStore,
        backend: &dyn MigrationBackend,
        options: &HelperOptions,
    ) -> Result<Self> {
        if databases.is_empty() {
            return Err(ChartreuseError::config("No database configured"));
        }

        let mut helpers: Vec<MigrationHelper> = Vec::with_capacity(databases.len());
        for database in databases {
            if helpers.iter().any(|helper| helper.name() == database.name) {
                return Err(ChartreuseError::config(format!(
                    "Database '{}' is configured twice",
                    database.name
                )));
            }
            let parameters = format!("{} -n {}", database.additional_parameters, database.name)
                .trim()
                .to_string();
            let database = database.with_additional_parameters(parameters);
            helpers.push(MigrationHelper::new(database, store, backend, options).await?);
        }

        let migration_needed = helpers.iter().any(MigrationHelper::is_migration_needed);
        Ok(Self {
            helpers,
            index: None,
            migration_needed,
        })
    }

    /// Add the search index to the release decision and upgrade
    pub fn with_index(mut self, index: IndexMigrationHelper) -> Self {
        self.migration_needed |= index.is_migration_needed();
        self.index = Some(index);
        self
    }

    /// Whether any database (or the index) is behind, decided at construction
    pub fn is_migration_needed(&self) -> bool {
        self.migration_needed
    }

    pub fn helpers(&self) -> &[MigrationHelper] {
        &self.helpers
    }

    pub fn index(&self) -> Option<&IndexMigrationHelper> {
        self.index.as_ref()
    }

    /// Upgrade every database that needs it, then the index
    ///
    /// Stops at the first failure. Databases already upgraded stay upgraded.
    pub async fn upgrade(&self) -> Result<()> {
        for helper in &self.helpers {
            if helper.is_migration_needed() {
                helper.upgrade_db().await?;
            } else {
                info!(database = %helper.name(), "Skipping database, no migration needed");
            }
        }
        if let Some(index) = &self.index {
            if index.is_migration_needed() {
                index.upgrade_db().await?;
            } else {
                info!("Skipping index, no migration needed");
            }
        }
        Ok(())
    }
}

/// Builds the collaborators an index helper needs
pub trait IndexBackend: Send + Sync {
    fn index_tool(&self, config: &IndexConfig) -> Result<Box<dyn IndexTool>>;

    fn endpoint_check(&self) -> &dyn EndpointCheck;
}

/// Everything needed to build an orchestrator from a configuration file
pub struct OrchestratorBuilder {
    pub database_store: Box<dyn ConfigurationStore>,
    pub index_store: Box<dyn ConfigurationStore>,
    pub backend: Box<dyn MigrationBackend>,
    pub index_backend: Box<dyn IndexBackend>,
    pub options: HelperOptions,
}

impl OrchestratorBuilder {
    pub async fn build(&mut self, config: MultiDatabaseConfig) -> Result<MultiDatabaseOrchestrator> {
        let orchestrator = MultiDatabaseOrchestrator::new(
            config.databases,
            self.database_store.as_mut(),
            self.backend.as_ref(),
            &self.options,
        )
        .await?;

        match config.index {
            Some(index) => {
                let helper = self.build_index(index).await?;
                Ok(orchestrator.with_index(helper))
            }
            None => Ok(orchestrator),
        }
    }

    /// Index helper for the second phase: the ini is rewritten, nothing is queried
    pub fn configure_index(&mut self, config: IndexConfig) -> Result<IndexMigrationHelper> {
        let tool = self.index_backend.index_tool(&config)?;
        IndexMigrationHelper::configure(config, self.index_store.as_mut(), tool)
    }

    /// Build the index helper on its own
    pub async fn build_index(&mut self, config: IndexConfig) -> Result<IndexMigrationHelper> {
        let tool = self.index_backend.index_tool(&config)?;
        IndexMigrationHelper::new(
            config,
            self.index_store.as_mut(),
            tool,
            self.index_backend.endpoint_check(),
            self.options.skip_db_checks,
        )
        .await
    }
}
