use thiserror::Error;

/// Main result type for Chartreuse operations
pub type Result<T> = std::result::Result<T, ChartreuseError>;

/// Main error type for Chartreuse operations
///
/// Every variant except [`ChartreuseError::PodRestart`] is fatal and travels up to the
/// process boundary, where it becomes a nonzero exit code and fails the Helm release.
#[derive(Debug, Error)]
pub enum ChartreuseError {
    /// Missing or invalid configuration, raised before any I/O
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The migration tool (or another external command) exited nonzero
    #[error(transparent)]
    ExternalTool(#[from] ToolFailure),

    /// A bounded wait ran out of time
    #[error("Timed out after {timeout_secs}s waiting for {what}. {hint}")]
    ReadinessTimeout {
        what: String,
        timeout_secs: u64,
        hint: String,
    },

    /// The packaging (Helm chart) and orchestrator versions are incompatible
    #[error(
        "Helm chart version '{packaging_version}' and chartreuse version '{orchestrator_version}' \
         don't have the same 'major.minor' ({packaging_major_minor} != {orchestrator_major_minor}), \
         they may be incompatible. Make sure they're semver, align them and retry, ABORTING!"
    )]
    CompatibilityMismatch {
        packaging_version: String,
        orchestrator_version: String,
        packaging_major_minor: String,
        orchestrator_major_minor: String,
    },

    /// Database introspection failed
    #[error("Database error: {message}")]
    Database { message: String },

    /// Kubernetes API interaction failed
    #[error("Kubernetes error: {message}")]
    Kubernetes { message: String },

    /// Workload pods could not be restarted after a successful migration
    #[error("Pod restart failed: {message}")]
    PodRestart { message: String },

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors (should not normally occur)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// A command that ran to completion with a nonzero exit code
#[derive(Debug, Error)]
#[error(
    "Command `{command}` failed with exit code {exit_code}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}"
)]
pub struct ToolFailure {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Convenience methods for creating specific errors
impl ChartreuseError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a Kubernetes error
    pub fn kubernetes(message: impl Into<String>) -> Self {
        Self::Kubernetes {
            message: message.into(),
        }
    }

    /// Create a pod restart error
    pub fn pod_restart(message: impl Into<String>) -> Self {
        Self::PodRestart {
            message: message.into(),
        }
    }

    /// Create a readiness timeout error
    pub fn readiness_timeout(
        what: impl Into<String>,
        timeout_secs: u64,
        hint: impl Into<String>,
    ) -> Self {
        Self::ReadinessTimeout {
            what: what.into(),
            timeout_secs,
            hint: hint.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether callers may log and swallow this error instead of failing the hook
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PodRestart { .. })
    }
}

impl From<toml::de::Error> for ChartreuseError {
    fn from(error: toml::de::Error) -> Self {
        ChartreuseError::Configuration {
            message: format!("Invalid configuration file: {}", error),
        }
    }
}

impl From<serde_json::Error> for ChartreuseError {
    fn from(error: serde_json::Error) -> Self {
        ChartreuseError::Internal {
            message: format!("Serialization error: {}", error),
        }
    }
}
