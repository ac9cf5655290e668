//! In-memory fakes shared by unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{ClientError, ListenerError};
use crate::job::JobStatus;
use crate::sandbox::runtime::keep_last;
use crate::sandbox::{
    ContainerRuntime, ContainerState, LogStream, ResourceLimits, RuntimeError,
};
use crate::sidecar::client::JobSource;
use crate::sidecar::listener::{JobEventListener, JobStateChanged};

pub fn running() -> JobStatus {
    JobStatus::Running {
        started_at: Utc::now(),
    }
}

pub fn completed(exit_code: i64) -> JobStatus {
    JobStatus::Completed {
        exit_code,
        oom_killed: false,
        recent_logs: vec![],
    }
}

pub fn system_error(message: &str) -> JobStatus {
    JobStatus::system_error(message)
}

/// A container the fake was asked to start.
#[derive(Debug, Clone)]
pub struct StartedContainer {
    pub container_id: String,
    pub image: String,
    pub command: String,
    pub limits: ResourceLimits,
}

#[derive(Default)]
struct FakeContainer {
    running: bool,
    exit_code: Option<i64>,
    oom_killed: bool,
    logs: Vec<String>,
    stream_error: Option<String>,
}

/// [`ContainerRuntime`] that keeps containers in memory.
///
/// Started containers report running until [`FakeRuntime::finish`] is called.
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    started: Mutex<Vec<StartedContainer>>,
    fail_starts: AtomicBool,
    tail_calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn containers(&self) -> std::sync::MutexGuard<'_, HashMap<String, FakeContainer>> {
        self.containers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_starts(&self, fail: bool) {
        self.fail_starts.store(fail, Ordering::SeqCst);
    }

    pub fn finish(&self, container_id: &str, exit_code: i64, oom_killed: bool) {
        let mut containers = self.containers();
        let container = containers.entry(container_id.to_string()).or_default();
        container.running = false;
        container.exit_code = Some(exit_code);
        container.oom_killed = oom_killed;
    }

    /// Forget a container, as if it was removed behind the registry's back.
    pub fn remove(&self, container_id: &str) {
        self.containers().remove(container_id);
    }

    pub fn set_logs(&self, container_id: &str, logs: Vec<String>) {
        self.containers()
            .entry(container_id.to_string())
            .or_default()
            .logs = logs;
    }

    /// Make the log stream fail with `message` after the stored lines.
    pub fn fail_stream(&self, container_id: &str, message: &str) {
        self.containers()
            .entry(container_id.to_string())
            .or_default()
            .stream_error = Some(message.to_string());
    }

    pub fn started(&self) -> Vec<StartedContainer> {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn tail_calls(&self) -> usize {
        self.tail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn start_container(
        &self,
        image: &str,
        command: &str,
        limits: &ResourceLimits,
    ) -> crate::sandbox::error::Result<String> {
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(RuntimeError::Provision {
                image: image.to_string(),
                reason: "engine unavailable".to_string(),
            });
        }

        let container_id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers().insert(
            container_id.clone(),
            FakeContainer {
                running: true,
                ..Default::default()
            },
        );
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StartedContainer {
                container_id: container_id.clone(),
                image: image.to_string(),
                command: command.to_string(),
                limits: *limits,
            });
        Ok(container_id)
    }

    async fn inspect_container(
        &self,
        container_id: &str,
    ) -> crate::sandbox::error::Result<ContainerState> {
        let containers = self.containers();
        let Some(container) = containers.get(container_id) else {
            return Ok(ContainerState::not_found(container_id));
        };
        Ok(ContainerState {
            container_id: container_id.to_string(),
            is_running: container.running,
            exit_code: container.exit_code,
            oom_killed: container.oom_killed,
            system_error: None,
        })
    }

    async fn tail_logs(&self, container_id: &str, max_lines: usize) -> Vec<String> {
        self.tail_calls.fetch_add(1, Ordering::SeqCst);
        let logs = self
            .containers()
            .get(container_id)
            .map(|c| c.logs.clone())
            .unwrap_or_default();
        keep_last(logs, max_lines)
    }

    fn stream_logs(&self, container_id: &str) -> LogStream {
        let (logs, error) = self
            .containers()
            .get(container_id)
            .map(|c| (c.logs.clone(), c.stream_error.clone()))
            .unwrap_or_default();

        let mut items: Vec<crate::sandbox::error::Result<String>> =
            logs.into_iter().map(Ok).collect();
        if let Some(reason) = error {
            items.push(Err(RuntimeError::LogStream {
                container_id: container_id.to_string(),
                reason,
            }));
        }
        Box::pin(futures::stream::iter(items))
    }
}

/// [`JobSource`] serving statuses from memory, with fetch accounting.
#[derive(Default)]
pub struct FakeJobSource {
    jobs: Mutex<BTreeMap<String, JobStatus>>,
    failing: Mutex<HashSet<String>>,
    fail_list: AtomicBool,
    fetches: Mutex<HashMap<String, usize>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeJobSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, job_id: &str, status: JobStatus) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string(), status);
    }

    pub fn fail_fetch(&self, job_id: &str, fail: bool) {
        let mut failing = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
        if fail {
            failing.insert(job_id.to_string());
        } else {
            failing.remove(job_id);
        }
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Delay applied to every status fetch started from now on.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn fetch_count(&self, job_id: &str) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobSource for FakeJobSource {
    async fn list_jobs(&self) -> Result<Vec<String>, ClientError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(ClientError::RequestFailed {
                url: "fake://jobs".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    async fn get_job_status(&self, job_id: &str) -> Result<JobStatus, ClientError> {
        *self
            .fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(job_id.to_string())
            .or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(job_id)
        {
            return Err(ClientError::RequestFailed {
                url: format!("fake://jobs/{}", job_id),
                reason: "timed out".to_string(),
            });
        }

        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
            .ok_or_else(|| ClientError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }
}

/// Listener that records every event it receives.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<JobStateChanged>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<JobStateChanged> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl JobEventListener for RecordingListener {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_job_state_changed(&self, event: &JobStateChanged) -> Result<(), ListenerError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
