//! Database error types and conversions

use chartreuse_core::ChartreuseError;

/// Database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error on '{database}': {message}")]
    Connection { database: String, message: String },

    #[error("Query error on '{database}': {message}")]
    Query { database: String, message: String },

    #[error("Unsupported dialect '{dialect}' for database '{database}'")]
    UnsupportedDialect { database: String, dialect: String },

    #[error("Role privileges of '{database}' are not configured: {message}")]
    RolePrivileges { database: String, message: String },
}

impl From<DatabaseError> for ChartreuseError {
    fn from(error: DatabaseError) -> Self {
        ChartreuseError::Database {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_to_database_error() {
        let error: ChartreuseError = DatabaseError::UnsupportedDialect {
            database: "events".to_string(),
            dialect: "clickhouse".to_string(),
        }
        .into();
        assert!(matches!(error, ChartreuseError::Database { .. }));
        assert!(error.to_string().contains("clickhouse"));
    }
}
