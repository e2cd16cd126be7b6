//! Database kinds and connection URLs

use chartreuse_core::{ChartreuseError, Result};

/// Databases the inspector can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Postgres,
    MySql,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseType::Postgres => write!(f, "postgres"),
            DatabaseType::MySql => write!(f, "mysql"),
        }
    }
}

impl std::str::FromStr for DatabaseType {
    type Err = ChartreuseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            "mysql" | "mariadb" => Ok(DatabaseType::MySql),
            _ => Err(ChartreuseError::database(format!(
                "Unsupported database type: {}",
                s
            ))),
        }
    }
}

/// Drop the SQLAlchemy driver suffix (`postgresql+psycopg2://`) sqlx does not understand
pub fn sqlx_url(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let dialect = scheme.split('+').next().unwrap_or(scheme);
            format!("{}://{}", dialect, rest)
        }
        None => url.to_string(),
    }
}
