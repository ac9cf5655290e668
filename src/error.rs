//! Error types shared across the service and the sidecar.

use crate::sandbox::RuntimeError;

/// Errors returned by the job registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The caller passed a job id this registry never issued.
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// The container for a new job could not be provisioned.
    #[error("Failed to start job: {0}")]
    StartFailed(#[source] RuntimeError),

    /// The runtime failed while serving a request for an existing job.
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Errors from the sidecar's client for the remote registry.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Unauthorized: the registry rejected the API key")]
    Unauthorized,

    #[error("Unexpected response from {url}: HTTP {status}: {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },
}

/// Errors raised by a job event listener.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("{0}")]
    Other(String),
}

impl From<deadpool_postgres::PoolError> for ListenerError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        ListenerError::Pool(e.to_string())
    }
}

/// Invalid configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Missing required setting: {key}")]
    Missing { key: String },
}
