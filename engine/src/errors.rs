//! Error types for the discovery engine

use thiserror::Error;

/// Main error type for the discovery engine
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Rejected input at a call boundary (empty topic list, bad timeout, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation conflicts with the current engine state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Messaging error: {0}")]
    MessagingError(String),

    #[error("MQTT error: {0}")]
    MqttError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DiscoveryError {
    fn from(err: anyhow::Error) -> Self {
        DiscoveryError::Internal(err.to_string())
    }
}

impl DiscoveryError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        DiscoveryError::InvalidArgument(msg.into())
    }

    pub fn not_found(kind: &str, id: &str) -> Self {
        DiscoveryError::NotFound(format!("{} '{}'", kind, id))
    }
}
