//! Error types for the orchestrator

use sigpath_core::ApiError;
use thiserror::Error;

/// Orchestrator result type
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur in the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Collaborator call failed where the caller cannot carry on without it
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// HTTP client construction error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operator or caller picked something that is not eligible
    #[error("Invalid selection: {0}")]
    Validation(String),

    /// The action has nothing it could act on
    #[error("{0}")]
    Precondition(String),

    /// Source id has no usable encoder record
    #[error("No encoder found for {0}")]
    Resolution(String),

    /// Operator declined the confirmation
    #[error("Action cancelled by operator")]
    Cancelled,
}

impl OrchestratorError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Terminal outcomes that still end the process with exit code 0
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::Precondition(_) | Self::Cancelled)
    }
}
