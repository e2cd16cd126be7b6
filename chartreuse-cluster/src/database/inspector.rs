//! Table listing and the HA-operator role canary

use crate::database::config::{DatabaseType, sqlx_url};
use crate::database::connection::DatabasePool;
use crate::database::error::DatabaseError;
use async_trait::async_trait;
use chartreuse_core::{DatabaseConfig, DatabaseInspector, Result};
use secrecy::ExposeSecret;
use sqlx::postgres::PgConnectOptions;
use std::str::FromStr;
use tracing::debug;

const POSTGRES_TABLES: &str =
    "SELECT tablename::text FROM pg_catalog.pg_tables WHERE schemaname = current_schema()";
const MYSQL_TABLES: &str = "SELECT CAST(table_name AS CHAR) FROM information_schema.tables \
     WHERE table_schema = DATABASE()";
const CANARY_TABLE: &str = "chartreuse_privileges_canary";

/// Build the inspector matching the database's dialect
///
/// Dialects without an inspector still get one; it only fails when asked something, so
/// databases that never need introspection keep working.
pub fn inspector_for(config: &DatabaseConfig) -> Result<Box<dyn DatabaseInspector>> {
    let dialect = config.dialect().unwrap_or_default();
    match DatabaseType::from_str(&dialect) {
        Ok(database_type) => Ok(Box::new(SqlDatabaseInspector::connect_lazy(
            config,
            database_type,
        )?)),
        Err(_) => Ok(Box::new(UnsupportedDialectInspector {
            database: config.name.clone(),
            dialect,
        })),
    }
}

/// Inspector backed by a sqlx pool
pub struct SqlDatabaseInspector {
    database: String,
    /// Database name from the URL, prefix of the HA operator's roles
    database_name: Option<String>,
    pool: DatabasePool,
}

impl SqlDatabaseInspector {
    pub fn connect_lazy(config: &DatabaseConfig, database_type: DatabaseType) -> Result<Self> {
        let url = config.url().expose_secret();
        let pool = DatabasePool::connect_lazy(&config.name, database_type, url)?;
        let database_name = match database_type {
            DatabaseType::Postgres => PgConnectOptions::from_str(&sqlx_url(url))
                .ok()
                .and_then(|options| options.get_database().map(str::to_string)),
            DatabaseType::MySql => None,
        };
        Ok(Self {
            database: config.name.clone(),
            database_name,
            pool,
        })
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    fn query_error(&self, e: sqlx::Error) -> DatabaseError {
        DatabaseError::Query {
            database: self.database.clone(),
            message: e.to_string(),
        }
    }

    fn privileges_error(&self, e: sqlx::Error) -> DatabaseError {
        DatabaseError::RolePrivileges {
            database: self.database.clone(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl DatabaseInspector for SqlDatabaseInspector {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = match &self.pool {
            DatabasePool::Postgres(pool) => sqlx::query_scalar::<_, String>(POSTGRES_TABLES)
                .fetch_all(pool)
                .await
                .map_err(|e| self.query_error(e))?,
            DatabasePool::MySql(pool) => sqlx::query_scalar::<_, String>(MYSQL_TABLES)
                .fetch_all(pool)
                .await
                .map_err(|e| self.query_error(e))?,
        };
        debug!(database = %self.database, count = tables.len(), "Listed tables");
        Ok(tables)
    }

    /// Create a table as owner, write as writer, read as reader, then roll everything back
    async fn check_role_privileges(&self) -> Result<()> {
        let Some(pool) = self.pool.as_postgres() else {
            return Err(DatabaseError::UnsupportedDialect {
                database: self.database.clone(),
                dialect: self.pool.database_type().to_string(),
            }
            .into());
        };
        let Some(name) = &self.database_name else {
            return Err(DatabaseError::RolePrivileges {
                database: self.database.clone(),
                message: "the connection URL names no database".to_string(),
            }
            .into());
        };

        let mut tx = pool.begin().await.map_err(|e| self.privileges_error(e))?;
        for statement in canary_statements(name) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| self.privileges_error(e))?;
        }
        tx.rollback().await.map_err(|e| self.privileges_error(e))?;
        Ok(())
    }
}

/// Inspector for a dialect no driver is compiled in for
pub struct UnsupportedDialectInspector {
    database: String,
    dialect: String,
}

impl UnsupportedDialectInspector {
    fn error(&self) -> chartreuse_core::ChartreuseError {
        DatabaseError::UnsupportedDialect {
            database: self.database.clone(),
            dialect: self.dialect.clone(),
        }
        .into()
    }
}

#[async_trait]
impl DatabaseInspector for UnsupportedDialectInspector {
    async fn list_tables(&self) -> Result<Vec<String>> {
        Err(self.error())
    }

    async fn check_role_privileges(&self) -> Result<()> {
        Err(self.error())
    }
}

fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Statements proving the operator's default privileges are in place
fn canary_statements(database_name: &str) -> Vec<String> {
    let role = |suffix: &str| quote_identifier(&format!("{}_{}", database_name, suffix));
    vec![
        format!("SET LOCAL ROLE {}", role("owner")),
        format!("CREATE TABLE {} (id integer)", CANARY_TABLE),
        format!("SET LOCAL ROLE {}", role("writer")),
        format!("INSERT INTO {} (id) VALUES (1)", CANARY_TABLE),
        format!("SET LOCAL ROLE {}", role("reader")),
        format!("SELECT id FROM {}", CANARY_TABLE),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canary_switches_roles_in_order() {
        let statements = canary_statements("app");
        assert_eq!(statements[0], "SET LOCAL ROLE \"app_owner\"");
        assert_eq!(statements[2], "SET LOCAL ROLE \"app_writer\"");
        assert_eq!(statements[4], "SET LOCAL ROLE \"app_reader\"");
        assert!(statements[1].starts_with("CREATE TABLE"));
        assert!(statements[5].starts_with("SELECT"));
    }

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote_identifier("my\"db_owner"), "\"my\"\"db_owner\"");
    }

    #[tokio::test]
    async fn test_unknown_dialect_fails_only_when_queried() {
        let config = DatabaseConfig::new("events", "clickhouse://u:p@ch/events", "/app/alembic");
        let inspector = inspector_for(&config).unwrap();
        assert!(inspector.list_tables().await.is_err());
        assert!(inspector.check_role_privileges().await.is_err());
    }

    #[tokio::test]
    async fn test_postgres_inspector_is_built_without_connecting() {
        let config = DatabaseConfig::new(
            "main",
            "postgresql+psycopg2://u:p@127.0.0.1:1/app",
            "/app/alembic",
        );
        let inspector = SqlDatabaseInspector::connect_lazy(&config, DatabaseType::Postgres).unwrap();
        assert_eq!(inspector.database_name.as_deref(), Some("app"));
        assert_eq!(inspector.pool().database_type(), DatabaseType::Postgres);
    }

    #[tokio::test]
    async fn test_mysql_has_no_role_canary() {
        let config = DatabaseConfig::new("main", "mysql://u:p@127.0.0.1:1/app", "/app/alembic");
        let inspector = SqlDatabaseInspector::connect_lazy(&config, DatabaseType::MySql).unwrap();
        assert!(inspector.check_role_privileges().await.is_err());
    }
}
