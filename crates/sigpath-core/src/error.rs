//! Error types for collaborator calls

use thiserror::Error;

/// Result type for collaborator operations
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// What a single remote call can fail with
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Connection refused, DNS failure, reset, ...
    #[error("transport error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// No response within the client's timeout
    #[error("timed out calling {endpoint}")]
    Timeout { endpoint: String },

    /// Non-success HTTP status
    #[error("{endpoint} answered with status {status}")]
    Status { endpoint: String, status: u16 },

    /// Response body could not be decoded
    #[error("could not decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl ApiError {
    /// Create a transport error
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Endpoint the failed call was addressed to
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Transport { endpoint, .. }
            | Self::Timeout { endpoint }
            | Self::Status { endpoint, .. }
            | Self::Decode { endpoint, .. } => endpoint,
        }
    }

    /// True for failures where the remote system was never reached
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}
