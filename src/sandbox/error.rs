//! Error types for the container runtime.

/// Errors that can occur while talking to the container engine.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Docker daemon is not available or not running.
    #[error("Docker not available: {reason}")]
    DockerNotAvailable { reason: String },

    /// Image pull, container creation, or container start failed.
    ///
    /// No container id is ever handed out alongside this error.
    #[error("Provisioning {image} failed: {reason}")]
    Provision { image: String, reason: String },

    /// The live log stream broke off.
    #[error("Log stream for container {container_id} failed: {reason}")]
    LogStream {
        container_id: String,
        reason: String,
    },

    /// Docker API error.
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
