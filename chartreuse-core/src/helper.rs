//! Migration decisions for one database.
//!
//! A [`MigrationHelper`] is built once per database and per process. Construction
//! validates the configuration, waits for an HA operator when one manages the database,
//! points the migration tool at the database and decides whether a migration is needed.
//! That decision is never recomputed; build a new helper for a fresh answer.

use crate::alembic::MigrationTool;
use crate::config::DatabaseConfig;
use crate::config_store::ConfigurationStore;
use crate::error::{ChartreuseError, Result};
use crate::inspector::{DatabaseInspector, is_database_empty};
use crate::poll::{PollPolicy, poll_until};
use secrecy::ExposeSecret;
use tracing::{debug, info};

/// Extra alembic argument telling the migration environment it runs against Patroni
pub const HA_OPERATOR_PARAMETER: &str = "-x patroni_postgresql=yes";

/// Builds the per-database collaborators a helper drives
pub trait MigrationBackend: Send + Sync {
    fn inspector(&self, config: &DatabaseConfig) -> Result<Box<dyn DatabaseInspector>>;

    fn migration_tool(
        &self,
        config: &DatabaseConfig,
        additional_parameters: &str,
    ) -> Result<Box<dyn MigrationTool>>;
}

/// Process-wide options for every helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperOptions {
    /// Skip every live database check (testing and bootstrap escape hatch)
    pub skip_db_checks: bool,
    pub role_privileges: PollPolicy,
}

impl Default for HelperOptions {
    fn default() -> Self {
        Self {
            skip_db_checks: false,
            role_privileges: PollPolicy::role_privileges(),
        }
    }
}

/// Migration state and operations for exactly one database
pub struct MigrationHelper {
    config: DatabaseConfig,
    additional_parameters: String,
    tool: Box<dyn MigrationTool>,
    migration_needed: bool,
}

impl MigrationHelper {
    pub async fn new(
        config: DatabaseConfig,
        store: &mut dyn ConfigurationStore,
        backend: &dyn MigrationBackend,
        options: &HelperOptions,
    ) -> Result<Self> {
        if config.url().expose_secret().trim().is_empty() {
            return Err(ChartreuseError::config(format!(
                "Database URL of '{}' is not set, not upgrading database",
                config.name
            )));
        }

        let additional_parameters = if config.is_managed_by_ha_operator {
            format!("{} {}", config.additional_parameters, HA_OPERATOR_PARAMETER)
                .trim()
                .to_string()
        } else {
            config.additional_parameters.clone()
        };

        let inspector = backend.inspector(&config)?;

        if config.is_managed_by_ha_operator && !options.skip_db_checks {
            wait_for_role_privileges(inspector.as_ref(), &config, &options.role_privileges)
                .await?;
        }

        store.set_connection_string(
            &config.config_file_path(),
            &config.name,
            config.url().expose_secret(),
        )?;

        let tool = backend.migration_tool(&config, &additional_parameters)?;

        let migration_needed = if options.skip_db_checks {
            info!(database = %config.name, "Database checks are disabled, assuming no migration is needed");
            false
        } else {
            check_migration_needed(&config, inspector.as_ref(), tool.as_ref()).await?
        };

        Ok(Self {
            config,
            additional_parameters,
            tool,
            migration_needed,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Parameters passed to every tool invocation, HA flag included
    pub fn additional_parameters(&self) -> &str {
        &self.additional_parameters
    }

    /// Decided once, at construction
    pub fn is_migration_needed(&self) -> bool {
        self.migration_needed
    }

    /// Upgrade the database to head
    ///
    /// Any failure must fail the release; callers never swallow it.
    pub async fn upgrade_db(&self) -> Result<()> {
        info!(database = %self.config.name, "Database needs to be upgraded. Proceeding");
        self.tool.upgrade_to_head().await?;
        info!(database = %self.config.name, "Done upgrading database");
        Ok(())
    }
}

async fn wait_for_role_privileges(
    inspector: &dyn DatabaseInspector,
    config: &DatabaseConfig,
    policy: &PollPolicy,
) -> Result<()> {
    info!(
        database = %config.name,
        timeout_secs = policy.timeout.as_secs(),
        "Waiting for the postgres operator to configure default privileges"
    );
    let configured = poll_until(policy, || async move {
        match inspector.check_role_privileges().await {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!(database = %config.name, error = %e, "Default privileges not configured yet");
                Ok(false)
            }
        }
    })
    .await?;

    if !configured {
        return Err(ChartreuseError::readiness_timeout(
            format!("default privileges of database '{}'", config.name),
            policy.timeout.as_secs(),
            "Check the postgres operator logs, it may not have finished provisioning the roles",
        ));
    }
    info!(database = %config.name, "Default privileges are configured");
    Ok(())
}

async fn check_migration_needed(
    config: &DatabaseConfig,
    inspector: &dyn DatabaseInspector,
    tool: &dyn MigrationTool,
) -> Result<bool> {
    if config.allow_migration_on_empty_database {
        debug!(database = %config.name, "Migration of an empty database is allowed");
    } else {
        let tables = inspector.list_tables().await?;
        debug!(database = %config.name, tables = ?tables, "Tables in database");
        if is_database_empty(&tables) {
            info!(
                database = %config.name,
                "Database is not populated yet and migrating an empty database is forbidden, not upgrading it"
            );
            return Ok(false);
        }
    }

    let status = tool.current_revision().await?;
    if status.is_head {
        info!(database = %config.name, "Database does not need migration");
        Ok(false)
    } else {
        info!(
            database = %config.name,
            revision = status.revision_id.as_deref().unwrap_or("none"),
            "Database can be migrated"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alembic::{MockMigrationTool, RevisionStatus};
    use crate::config_store::MockConfigurationStore;
    use crate::inspector::MockDatabaseInspector;
    use crate::testing::{FakeBackend, RecordingStore, ScriptedRunner};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    /// Hands out one pre-programmed mock pair
    struct MockBackend {
        inspector: Mutex<Option<MockDatabaseInspector>>,
        tool: Mutex<Option<MockMigrationTool>>,
        parameters: Mutex<Option<String>>,
    }

    impl MockBackend {
        fn new(inspector: MockDatabaseInspector, tool: MockMigrationTool) -> Self {
            Self {
                inspector: Mutex::new(Some(inspector)),
                tool: Mutex::new(Some(tool)),
                parameters: Mutex::new(None),
            }
        }
    }

    impl MigrationBackend for MockBackend {
        fn inspector(&self, _config: &DatabaseConfig) -> Result<Box<dyn DatabaseInspector>> {
            let inspector = self.inspector.lock().unwrap().take().unwrap();
            Ok(Box::new(inspector))
        }

        fn migration_tool(
            &self,
            _config: &DatabaseConfig,
            additional_parameters: &str,
        ) -> Result<Box<dyn MigrationTool>> {
            *self.parameters.lock().unwrap() = Some(additional_parameters.to_string());
            let tool = self.tool.lock().unwrap().take().unwrap();
            Ok(Box::new(tool))
        }
    }

    fn database() -> DatabaseConfig {
        DatabaseConfig::new("main", "postgresql://app:pw@db:5432/app", "/app/alembic")
    }

    fn fast_options() -> HelperOptions {
        HelperOptions {
            skip_db_checks: false,
            role_privileges: PollPolicy::new(Duration::from_millis(1), Duration::from_millis(100)),
        }
    }

    fn tool_at(is_head: bool) -> MockMigrationTool {
        let mut tool = MockMigrationTool::new();
        tool.expect_current_revision().times(1).returning(move || {
            Ok(RevisionStatus {
                revision_id: Some("e1f79bafdfa2".to_string()),
                is_head,
            })
        });
        tool
    }

    #[tokio::test]
    async fn test_empty_url_fails_before_any_io() {
        let config = DatabaseConfig::new("main", "", "/app/alembic");
        let backend = MockBackend::new(MockDatabaseInspector::new(), MockMigrationTool::new());
        let mut store = MockConfigurationStore::new();
        store.expect_set_connection_string().never();

        let result = MigrationHelper::new(config, &mut store, &backend, &fast_options()).await;
        assert!(matches!(result, Err(ChartreuseError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_empty_database_is_skipped_when_forbidden() {
        let mut inspector = MockDatabaseInspector::new();
        inspector
            .expect_list_tables()
            .times(1)
            .returning(|| Ok(vec!["alembic_version".to_string()]));
        let mut tool = MockMigrationTool::new();
        tool.expect_current_revision().never();
        let backend = MockBackend::new(inspector, tool);
        let mut store = RecordingStore::default();

        let config = database().with_allow_migration_on_empty_database(false);
        let helper = MigrationHelper::new(config, &mut store, &backend, &fast_options())
            .await
            .unwrap();

        assert!(!helper.is_migration_needed());
    }

    #[tokio::test]
    async fn test_populated_database_behind_head_needs_migration() {
        let mut inspector = MockDatabaseInspector::new();
        inspector
            .expect_list_tables()
            .returning(|| Ok(vec!["alembic_version".to_string(), "users".to_string()]));
        let backend = MockBackend::new(inspector, tool_at(false));
        let mut store = RecordingStore::default();

        let config = database().with_allow_migration_on_empty_database(false);
        let helper = MigrationHelper::new(config, &mut store, &backend, &fast_options())
            .await
            .unwrap();

        assert!(helper.is_migration_needed());
    }

    #[tokio::test]
    async fn test_database_at_head_needs_nothing() {
        let backend = MockBackend::new(MockDatabaseInspector::new(), tool_at(true));
        let mut store = RecordingStore::default();

        let helper = MigrationHelper::new(database(), &mut store, &backend, &fast_options())
            .await
            .unwrap();

        assert!(!helper.is_migration_needed());
    }

    #[tokio::test]
    async fn test_allowed_empty_database_still_checks_revision() {
        let mut inspector = MockDatabaseInspector::new();
        inspector.expect_list_tables().never();
        let backend = MockBackend::new(inspector, tool_at(false));
        let mut store = RecordingStore::default();

        let helper = MigrationHelper::new(database(), &mut store, &backend, &fast_options())
            .await
            .unwrap();

        assert!(helper.is_migration_needed());
    }

    #[tokio::test]
    async fn test_revision_check_failure_propagates() {
        let mut tool = MockMigrationTool::new();
        tool.expect_current_revision()
            .returning(|| Err(ChartreuseError::internal("alembic crashed")));
        let backend = MockBackend::new(MockDatabaseInspector::new(), tool);
        let mut store = RecordingStore::default();

        let result = MigrationHelper::new(database(), &mut store, &backend, &fast_options()).await;
        assert!(matches!(result, Err(ChartreuseError::Internal { .. })));
    }

    #[tokio::test]
    async fn test_connection_string_points_at_named_section() {
        let backend = MockBackend::new(MockDatabaseInspector::new(), tool_at(true));
        let mut store = RecordingStore::default();

        let config = database().with_config_file("multi.ini");
        MigrationHelper::new(config, &mut store, &backend, &fast_options())
            .await
            .unwrap();

        assert_eq!(
            store.writes,
            vec![(
                PathBuf::from("/app/alembic/multi.ini"),
                "main".to_string(),
                "postgresql://app:pw@db:5432/app".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal() {
        let backend = MockBackend::new(MockDatabaseInspector::new(), MockMigrationTool::new());
        let mut store = MockConfigurationStore::new();
        store
            .expect_set_connection_string()
            .returning(|_, section, _| {
                Err(ChartreuseError::config(format!("Section [{}] not found", section)))
            });

        let result = MigrationHelper::new(database(), &mut store, &backend, &fast_options()).await;
        assert!(matches!(result, Err(ChartreuseError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_skip_db_checks_defaults_to_not_needed() {
        let mut inspector = MockDatabaseInspector::new();
        inspector.expect_list_tables().never();
        inspector.expect_check_role_privileges().never();
        let mut tool = MockMigrationTool::new();
        tool.expect_current_revision().never();
        let backend = MockBackend::new(inspector, tool);
        let mut store = RecordingStore::default();
        let options = HelperOptions {
            skip_db_checks: true,
            ..fast_options()
        };

        let config = database().with_ha_operator(true);
        let helper = MigrationHelper::new(config, &mut store, &backend, &options)
            .await
            .unwrap();

        assert!(!helper.is_migration_needed());
        assert_eq!(store.writes.len(), 1);
    }

    #[tokio::test]
    async fn test_ha_operator_adds_parameter_and_waits() {
        let backend = FakeBackend::new(ScriptedRunner::new().respond("current", "abc (head)\n", 0))
            .with_privilege_failures(3);
        let mut store = RecordingStore::default();

        let config = database()
            .with_ha_operator(true)
            .with_additional_parameters("--raiseerr");
        let helper = MigrationHelper::new(config, &mut store, &backend, &fast_options())
            .await
            .unwrap();

        assert_eq!(
            helper.additional_parameters(),
            "--raiseerr -x patroni_postgresql=yes"
        );
        assert_eq!(
            backend.runner.calls(),
            vec!["alembic -c alembic.ini --raiseerr -x patroni_postgresql=yes current"]
        );
    }

    #[tokio::test]
    async fn test_without_ha_operator_parameters_are_untouched() {
        let mut inspector = MockDatabaseInspector::new();
        inspector.expect_check_role_privileges().never();
        let backend = MockBackend::new(inspector, tool_at(true));
        let mut store = RecordingStore::default();

        let config = database().with_additional_parameters("--raiseerr");
        let helper = MigrationHelper::new(config, &mut store, &backend, &fast_options())
            .await
            .unwrap();

        assert_eq!(helper.additional_parameters(), "--raiseerr");
        assert_eq!(
            backend.parameters.lock().unwrap().as_deref(),
            Some("--raiseerr")
        );
    }

    #[tokio::test]
    async fn test_ha_operator_timeout_names_timeout_and_operator() {
        let backend = FakeBackend::new(ScriptedRunner::new()).with_privilege_failures(u32::MAX);
        let mut store = RecordingStore::default();
        let options = HelperOptions {
            skip_db_checks: false,
            role_privileges: PollPolicy::new(Duration::from_millis(1), Duration::from_millis(10)),
        };

        let config = database().with_ha_operator(true);
        let error = match MigrationHelper::new(config, &mut store, &backend, &options).await {
            Ok(_) => panic!("Expected a readiness timeout"),
            Err(error) => error,
        };

        assert!(matches!(error, ChartreuseError::ReadinessTimeout { .. }));
        assert!(error.to_string().contains("postgres operator logs"));
        assert!(store.writes.is_empty());
        assert_eq!(backend.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upgrade_db_propagates_failure() {
        let mut tool = tool_at(false);
        tool.expect_upgrade_to_head()
            .times(1)
            .returning(|| Err(ChartreuseError::internal("upgrade exploded")));
        let backend = MockBackend::new(MockDatabaseInspector::new(), tool);
        let mut store = RecordingStore::default();

        let helper = MigrationHelper::new(database(), &mut store, &backend, &fast_options())
            .await
            .unwrap();

        assert!(helper.upgrade_db().await.is_err());
    }
}
