//! Error types for eic-ssh

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for eic-ssh
#[derive(Debug, Error)]
pub enum EicSshError {
    /// Supplied private key file is unreadable, malformed or encrypted
    #[error("failed to load private key from {path}: {reason}")]
    KeyLoad { path: PathBuf, reason: String },

    /// Generating or persisting a fresh keypair failed
    #[error("failed to generate keypair: {0}")]
    KeyGeneration(String),

    /// No instance matched the target under any lookup strategy
    #[error("no instance found for {0}")]
    InstanceNotFound(String),

    /// More than one instance matched a reverse lookup filter
    #[error("{filter}={value} matches multiple instances: {}", .candidates.join(", "))]
    AmbiguousInstance {
        filter: String,
        value: String,
        candidates: Vec<String>,
    },

    /// The provider declined the public key push
    #[error("public key push to {instance_id} rejected: {reason}")]
    PushRejected { instance_id: String, reason: String },

    /// Any other provider API failure
    #[error("provider error: {0}")]
    Provider(String),

    /// Provider call or command execution timed out
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// SSH connection failed
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// SSH authentication failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Invalid command or call parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using EicSshError
pub type Result<T> = std::result::Result<T, EicSshError>;

impl EicSshError {
    /// Create a key load error for the given file
    pub fn key_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        EicSshError::KeyLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a key generation error
    pub fn key_generation(reason: impl ToString) -> Self {
        EicSshError::KeyGeneration(reason.to_string())
    }

    /// Create a provider error from a string
    pub fn provider(msg: impl Into<String>) -> Self {
        EicSshError::Provider(msg.into())
    }

    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        EicSshError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        EicSshError::Authentication(msg.into())
    }

    /// Create an invalid params error from a string
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        EicSshError::InvalidParams(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        EicSshError::Config(msg.into())
    }

    /// Whether the session can retry the same command later.
    ///
    /// Push and provider failures leave the session usable; key and
    /// configuration failures do not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EicSshError::PushRejected { .. }
                | EicSshError::Provider(_)
                | EicSshError::Timeout(_)
                | EicSshError::Connection(_)
        )
    }
}
