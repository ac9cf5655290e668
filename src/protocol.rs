//! Request and response bodies for the job service HTTP API.
//!
//! Shared by the server handlers and the sidecar's client.

use serde::{Deserialize, Serialize};

use crate::job::JobStatus;
use crate::sandbox::ResourceLimits;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartJobRequest {
    pub command: String,
    #[serde(flatten)]
    pub limits: ResourceLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartJobResponse {
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobsResponse {
    pub job_ids: Vec<String>,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// SSE event names used by the log watch endpoint.
pub mod log_events {
    pub const LINE: &str = "line";
    pub const COMPLETE: &str = "complete";
    pub const ERROR: &str = "error";
}
