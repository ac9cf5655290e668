//! Local cache of the last status seen for each job.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::job::{JobStatus, JobStatusKind};

/// Last-seen status per job id.
///
/// Owned by the polling engine and independent of the registry, so it may
/// lag behind the registry between cycles.
#[derive(Default)]
pub struct StatusCache {
    entries: RwLock<HashMap<String, JobStatus>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, job_id: &str) -> Option<JobStatus> {
        self.entries.read().await.get(job_id).cloned()
    }

    /// Variant kind of the cached entry, `None` if never fetched.
    pub async fn kind(&self, job_id: &str) -> Option<JobStatusKind> {
        self.entries.read().await.get(job_id).map(JobStatus::kind)
    }

    /// Store `status` and return the entry it replaced, in one step.
    pub async fn replace(&self, job_id: &str, status: JobStatus) -> Option<JobStatus> {
        self.entries
            .write()
            .await
            .insert(job_id.to_string(), status)
    }

    /// Keep the ids that still need a fetch: never seen, or last seen running.
    pub async fn needs_fetch(&self, job_ids: Vec<String>) -> Vec<String> {
        let entries = self.entries.read().await;
        job_ids
            .into_iter()
            .filter(|id| match entries.get(id) {
                None => true,
                Some(status) => !status.is_terminal(),
            })
            .collect()
    }

    /// Whether any cached job is running.
    pub async fn any_running(&self) -> bool {
        self.entries
            .read()
            .await
            .values()
            .any(|s| s.kind() == JobStatusKind::Running)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
