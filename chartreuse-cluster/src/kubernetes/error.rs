//! Kubernetes API error types and conversions

use chartreuse_core::ChartreuseError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum KubeError {
    #[error("In-cluster configuration unavailable: {0}")]
    Config(String),
    #[error("Request to the API server timed out")]
    Timeout,
    #[error("API server is unreachable: {0}")]
    Unreachable(String),
    #[error("Request to the API server failed: {0}")]
    Transport(String),
    #[error("API server returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Failed to parse API response: {0}")]
    Parse(String),
}

impl KubeError {
    /// Returns true if the error is transient and could be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Unreachable(_) | Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Config(_) | Self::Parse(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

pub(crate) fn map_reqwest_error(e: reqwest::Error) -> KubeError {
    if e.is_timeout() {
        KubeError::Timeout
    } else if e.is_connect() {
        KubeError::Unreachable(e.to_string())
    } else if e.is_decode() {
        KubeError::Parse(e.to_string())
    } else {
        KubeError::Transport(e.to_string())
    }
}

impl From<KubeError> for ChartreuseError {
    fn from(error: KubeError) -> Self {
        ChartreuseError::Kubernetes {
            message: error.to_string(),
        }
    }
}
