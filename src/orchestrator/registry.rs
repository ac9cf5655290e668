//! Job registry: job id to container id mapping plus the job operations.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::job::JobStatus;
use crate::orchestrator::status;
use crate::sandbox::{ContainerRuntime, LogStream, ResourceLimits};

/// A caller-visible unit of work, mapped 1:1 to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub job_id: String,
    pub container_id: String,
}

/// Owns the job-id → container-id map.
///
/// Entries are written once when a job starts and never change afterwards.
pub struct JobRegistry {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    jobs: RwLock<HashMap<String, String>>,
}

impl JobRegistry {
    /// Create a registry that starts jobs from `image` (empty = runtime default).
    pub fn new(runtime: Arc<dyn ContainerRuntime>, image: impl Into<String>) -> Self {
        Self {
            runtime,
            image: image.into(),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Start a new job and return its id.
    ///
    /// The id is only issued once the container has started, and it is
    /// recorded before this returns, so it is immediately queryable.
    pub async fn start_job(
        &self,
        command: &str,
        limits: &ResourceLimits,
    ) -> Result<String, RegistryError> {
        let container_id = self
            .runtime
            .start_container(&self.image, command, limits)
            .await
            .map_err(RegistryError::StartFailed)?;

        let mut jobs = self.jobs.write().await;
        let job_id = loop {
            let candidate = Uuid::new_v4().to_string();
            if let Entry::Vacant(slot) = jobs.entry(candidate.clone()) {
                slot.insert(container_id.clone());
                break candidate;
            }
        };

        tracing::info!(job_id = %job_id, container_id = %container_id, "Job started");
        Ok(job_id)
    }

    /// Look up the job for an id.
    pub async fn get_job(&self, job_id: &str) -> Result<Job, RegistryError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|container_id| Job {
                job_id: job_id.to_string(),
                container_id: container_id.clone(),
            })
            .ok_or_else(|| RegistryError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Current status of a job.
    ///
    /// Unknown job ids fail with [`RegistryError::JobNotFound`]. A container
    /// that vanished underneath a known job is reported as a system error
    /// status, not as a failure.
    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatus, RegistryError> {
        let job = self.get_job(job_id).await?;
        let state = self.runtime.inspect_container(&job.container_id).await?;
        Ok(status::resolve(self.runtime.as_ref(), &state).await)
    }

    /// Follow a job's output.
    pub async fn watch_job_logs(&self, job_id: &str) -> Result<LogStream, RegistryError> {
        let job = self.get_job(job_id).await?;
        tracing::debug!(job_id = %job_id, container_id = %job.container_id, "Watching job logs");
        Ok(self.runtime.stream_logs(&job.container_id))
    }

    /// All job ids issued by this registry, sorted.
    pub async fn list_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of jobs issued so far.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
