//! Persist the latest state of every job.
//!
//! One row per job, overwritten on each transition:
//!
//! ```text
//! job_id | instance_id | updated_at (epoch seconds) | result (JSONB)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use serde::Serialize;
use serde_json::{Value, json};
use tokio_postgres::NoTls;

use crate::error::ListenerError;
use crate::job::JobStatus;
use crate::sidecar::listener::{JobEventListener, JobStateChanged};

/// `instance_id` used when none is configured.
pub const DEFAULT_INSTANCE_ID: &str = "unknown";

/// A single persisted job state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStateRecord {
    pub job_id: String,
    pub instance_id: String,
    pub updated_at: i64,
    pub result: Value,
}

/// Document stored in the `result` column.
pub fn result_document(status: &JobStatus) -> Value {
    match status {
        JobStatus::Running { started_at } => json!({
            "Running": {
                "StartedAt": started_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            }
        }),
        JobStatus::Completed {
            exit_code,
            oom_killed,
            recent_logs,
        } => json!({
            "Completed": {
                "ExitCode": exit_code,
                "OomKilled": oom_killed,
                "RecentLogs": recent_logs,
            }
        }),
        JobStatus::SystemError { reason, message } => json!({
            "SystemError": {
                "Reason": reason,
                "Message": message,
            }
        }),
    }
}

/// Backend that stores job state records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert or overwrite the record for `record.job_id`.
    async fn put(&self, record: &JobStateRecord) -> Result<(), ListenerError>;
}

/// Listener that writes each transition to a [`StateStore`].
pub struct StatePersister {
    store: Arc<dyn StateStore>,
    instance_id: String,
}

impl StatePersister {
    pub fn new(store: Arc<dyn StateStore>, instance_id: impl Into<String>) -> Self {
        Self {
            store,
            instance_id: instance_id.into(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Build the record for `job_id` in `status`, stamped with the current time.
    pub fn to_record(&self, job_id: &str, status: &JobStatus) -> JobStateRecord {
        JobStateRecord {
            job_id: job_id.to_string(),
            instance_id: self.instance_id.clone(),
            updated_at: Utc::now().timestamp(),
            result: result_document(status),
        }
    }
}

#[async_trait]
impl JobEventListener for StatePersister {
    fn name(&self) -> &str {
        "state_persister"
    }

    async fn on_job_state_changed(&self, event: &JobStateChanged) -> Result<(), ListenerError> {
        let record = self.to_record(&event.job_id, &event.current);
        self.store.put(&record).await?;
        tracing::debug!(
            job_id = %event.job_id,
            state = %event.current.kind(),
            "Persisted job state"
        );
        Ok(())
    }
}

/// PostgreSQL-backed [`StateStore`].
pub struct PostgresStateStore {
    pool: Pool,
}

impl PostgresStateStore {
    /// Create a connection pool for `database_url`.
    pub fn connect(database_url: &str) -> Result<Self, ListenerError> {
        let mut cfg = Config::new();
        cfg.url = Some(database_url.to_string());

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ListenerError::Pool(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Create the `job_state` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), ListenerError> {
        let client = self.pool.get().await?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS job_state (
                    job_id      TEXT PRIMARY KEY,
                    instance_id TEXT NOT NULL,
                    updated_at  BIGINT NOT NULL,
                    result      JSONB NOT NULL
                )",
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn put(&self, record: &JobStateRecord) -> Result<(), ListenerError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO job_state (job_id, instance_id, updated_at, result)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (job_id) DO UPDATE SET
                    instance_id = EXCLUDED.instance_id,
                    updated_at = EXCLUDED.updated_at,
                    result = EXCLUDED.result",
                &[
                    &record.job_id,
                    &record.instance_id,
                    &record.updated_at,
                    &record.result,
                ],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::DateTime;
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<JobStateRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl StateStore for MemoryStore {
        async fn put(&self, record: &JobStateRecord) -> Result<(), ListenerError> {
            if self.fail {
                return Err(ListenerError::Other("store unavailable".into()));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn event(job_id: &str, current: JobStatus) -> JobStateChanged {
        JobStateChanged {
            job_id: job_id.to_string(),
            previous: None,
            current,
        }
    }

    #[tokio::test]
    async fn test_running_state_is_persisted() {
        let store = Arc::new(MemoryStore::default());
        let persister = StatePersister::new(store.clone(), "test-instance");
        assert_eq!(persister.instance_id(), "test-instance");
        let started_at: DateTime<Utc> = "2026-02-16T00:00:00Z".parse().unwrap();

        let before = Utc::now().timestamp();
        persister
            .on_job_state_changed(&event("job-1", JobStatus::Running { started_at }))
            .await
            .unwrap();

        let records = store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.job_id, "job-1");
        assert_eq!(record.instance_id, "test-instance");
        assert!(record.updated_at >= before);
        assert_eq!(
            record.result,
            json!({"Running": {"StartedAt": "2026-02-16T00:00:00Z"}})
        );
    }

    #[tokio::test]
    async fn test_completed_state_is_persisted() {
        let store = Arc::new(MemoryStore::default());
        let persister = StatePersister::new(store.clone(), "test-instance");

        persister
            .on_job_state_changed(&event(
                "job-2",
                JobStatus::Completed {
                    exit_code: 0,
                    oom_killed: false,
                    recent_logs: vec!["log line 1".into(), "log line 2".into()],
                },
            ))
            .await
            .unwrap();

        let records = store.records.lock().unwrap();
        assert_eq!(
            records[0].result,
            json!({"Completed": {
                "ExitCode": 0,
                "OomKilled": false,
                "RecentLogs": ["log line 1", "log line 2"],
            }})
        );
    }

    #[tokio::test]
    async fn test_system_error_state_is_persisted() {
        let store = Arc::new(MemoryStore::default());
        let persister = StatePersister::new(store.clone(), "test-instance");

        persister
            .on_job_state_changed(&event(
                "job-3",
                JobStatus::SystemError {
                    reason: "OOM_KILLED".into(),
                    message: "Container exceeded memory limit".into(),
                },
            ))
            .await
            .unwrap();

        let records = store.records.lock().unwrap();
        assert_eq!(
            records[0].result,
            json!({"SystemError": {
                "Reason": "OOM_KILLED",
                "Message": "Container exceeded memory limit",
            }})
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_returned() {
        let store = Arc::new(MemoryStore {
            fail: true,
            ..Default::default()
        });
        let persister = StatePersister::new(store, DEFAULT_INSTANCE_ID);

        let result = persister
            .on_job_state_changed(&event("job-4", JobStatus::system_error("boom")))
            .await;
        assert!(matches!(result, Err(ListenerError::Other(_))));
    }

    #[test]
    fn test_subsecond_start_times_keep_precision() {
        let started_at: DateTime<Utc> = "2026-02-16T00:00:00.250Z".parse().unwrap();
        assert_eq!(
            result_document(&JobStatus::Running { started_at }),
            json!({"Running": {"StartedAt": "2026-02-16T00:00:00.250Z"}})
        );
    }
}
