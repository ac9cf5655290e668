//! Job state change events and the listeners that consume them.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::ListenerError;
use crate::job::JobStatus;

/// A job's observed variant kind changed (or the job was seen for the first time).
#[derive(Debug, Clone, PartialEq)]
pub struct JobStateChanged {
    pub job_id: String,
    pub previous: Option<JobStatus>,
    pub current: JobStatus,
}

impl JobStateChanged {
    /// Build an event if `current` is a transition from `previous`.
    ///
    /// Returns `None` when the variant kind is unchanged, even if fields
    /// inside the variant differ.
    pub fn detect(
        job_id: &str,
        previous: Option<JobStatus>,
        current: JobStatus,
    ) -> Option<Self> {
        if previous.as_ref().map(JobStatus::kind) == Some(current.kind()) {
            return None;
        }
        Some(Self {
            job_id: job_id.to_string(),
            previous,
            current,
        })
    }
}

/// Consumer of job state changes (persistence, logging, metrics).
#[async_trait]
pub trait JobEventListener: Send + Sync {
    /// Name used in logs when this listener fails.
    fn name(&self) -> &str;

    async fn on_job_state_changed(&self, event: &JobStateChanged) -> Result<(), ListenerError>;
}

/// Registered listeners, invoked in registration order.
///
/// Registration may happen while a dispatch is in progress; the running
/// dispatch keeps the list it started with.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn JobEventListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn JobEventListener>) {
        tracing::debug!(listener = listener.name(), "Registered job event listener");
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener. A listener that errors or panics is
    /// logged and skipped; the rest still receive the event.
    ///
    /// Returns the number of listeners that failed.
    pub async fn dispatch(&self, event: &JobStateChanged) -> usize {
        self.dispatch_from(event, 0, |_| {}).await
    }

    /// Like [`dispatch`](Self::dispatch), starting at the listener at index
    /// `start` in registration order.
    ///
    /// `on_delivered(n)` is called once listener `n - 1` has returned, so a
    /// caller can resume an interrupted dispatch at `n`.
    pub async fn dispatch_from(
        &self,
        event: &JobStateChanged,
        start: usize,
        mut on_delivered: impl FnMut(usize) + Send,
    ) -> usize {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failures = 0;
        for (index, listener) in listeners.iter().enumerate().skip(start) {
            match AssertUnwindSafe(listener.on_job_state_changed(event))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::error!(
                        job_id = %event.job_id,
                        listener = listener.name(),
                        "Listener failed: {}",
                        e
                    );
                }
                Err(_) => {
                    failures += 1;
                    tracing::error!(
                        job_id = %event.job_id,
                        listener = listener.name(),
                        "Listener panicked"
                    );
                }
            }
            on_delivered(index + 1);
        }
        failures
    }
}

/// Logs every transition.
#[derive(Debug, Default)]
pub struct LoggingSubscriber;

#[async_trait]
impl JobEventListener for LoggingSubscriber {
    fn name(&self) -> &str {
        "logging"
    }

    async fn on_job_state_changed(&self, event: &JobStateChanged) -> Result<(), ListenerError> {
        match &event.current {
            JobStatus::Running { started_at } => tracing::info!(
                job_id = %event.job_id,
                started_at = %started_at,
                "Job is now RUNNING"
            ),
            JobStatus::Completed {
                exit_code,
                oom_killed,
                ..
            } => tracing::info!(
                job_id = %event.job_id,
                exit_code,
                oom_killed,
                "Job COMPLETED"
            ),
            JobStatus::SystemError { reason, message } => tracing::info!(
                job_id = %event.job_id,
                reason = %reason,
                message = %message,
                "Job SYSTEM_ERROR"
            ),
        }
        Ok(())
    }
}
