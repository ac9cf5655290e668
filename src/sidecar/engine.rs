//! Polling engine: periodically discovers jobs, fetches the status of the
//! ones that are not finished, and tells listeners about transitions.
//!
//! One cycle:
//!
//! 1. discover job ids from the [`JobSource`]
//! 2. drop ids whose cached status is terminal
//! 3. fetch the rest, bounded by `max_concurrent_fetches`
//! 4. replace each cache entry, keeping the previous one
//! 5. emit a [`JobStateChanged`] when the variant kind changed
//! 6. refresh the last-active time if anything is still running
//!
//! An event stays pending until every listener has returned for it. If a
//! cycle is abandoned mid-dispatch, the next cycle (including the final one
//! run by shutdown) resumes that dispatch at the first listener that had not
//! returned yet.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::error::ConfigError;
use crate::sidecar::cache::StatusCache;
use crate::sidecar::client::JobSource;
use crate::sidecar::listener::{JobEventListener, JobStateChanged, ListenerRegistry};

/// Polling schedule and limits.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Time between cycle starts.
    pub interval: Duration,
    /// Upper bound on in-flight status fetches within one cycle.
    pub max_concurrent_fetches: usize,
    /// How long shutdown waits for an in-flight cycle before abandoning it.
    pub shutdown_grace: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_concurrent_fetches: 5,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl PollingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "interval".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_fetches".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Ids returned by discovery.
    pub discovered: usize,
    /// Status fetches that succeeded.
    pub fetched: usize,
    /// Status fetches that failed.
    pub failed: usize,
    /// Transitions that were dispatched to listeners.
    pub events: usize,
    /// Interrupted dispatches from an earlier cycle that were resumed.
    pub redelivered: usize,
}

/// An event whose dispatch has started but not finished.
struct PendingDelivery {
    event: JobStateChanged,
    /// Listeners, in registration order, that have already returned.
    delivered: usize,
}

enum FetchOutcome {
    Changed,
    Unchanged,
    Failed,
}

struct EngineCore {
    source: Arc<dyn JobSource>,
    config: PollingConfig,
    cache: StatusCache,
    listeners: ListenerRegistry,
    last_active: Mutex<DateTime<Utc>>,
    cycle_lock: tokio::sync::Mutex<()>,
    pending: Mutex<HashMap<String, PendingDelivery>>,
}

impl EngineCore {
    /// Run one cycle, waiting for any cycle already in progress.
    async fn poll(self: &Arc<Self>) -> CycleSummary {
        let _guard = self.cycle_lock.lock().await;
        self.run_cycle().await
    }

    /// Run one cycle unless another is still in progress.
    async fn try_poll(self: &Arc<Self>) -> Option<CycleSummary> {
        let _guard = self.cycle_lock.try_lock().ok()?;
        Some(self.run_cycle().await)
    }

    async fn run_cycle(self: &Arc<Self>) -> CycleSummary {
        let mut summary = CycleSummary {
            redelivered: self.resume_pending().await,
            ..Default::default()
        };

        let job_ids = match self.source.list_jobs().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("Polling cycle failed to discover jobs: {}", e);
                return summary;
            }
        };
        summary.discovered = job_ids.len();

        let to_fetch = self.cache.needs_fetch(job_ids).await;
        if !to_fetch.is_empty() {
            self.fetch_and_update(to_fetch, &mut summary).await;
        }

        self.update_idle_timer().await;

        tracing::debug!(
            discovered = summary.discovered,
            fetched = summary.fetched,
            failed = summary.failed,
            events = summary.events,
            redelivered = summary.redelivered,
            "Polling cycle finished"
        );
        summary
    }

    async fn fetch_and_update(self: &Arc<Self>, job_ids: Vec<String>, summary: &mut CycleSummary) {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_fetches));
        let mut tasks = JoinSet::new();

        for job_id in job_ids {
            let core = Arc::clone(self);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move { core.fetch_one(&job_id, &permits).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(FetchOutcome::Changed) => {
                    summary.fetched += 1;
                    summary.events += 1;
                }
                Ok(FetchOutcome::Unchanged) => summary.fetched += 1,
                Ok(FetchOutcome::Failed) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!("Status fetch task failed: {}", e);
                }
            }
        }
    }

    async fn fetch_one(&self, job_id: &str, permits: &Semaphore) -> FetchOutcome {
        let fetched = {
            let Ok(_permit) = permits.acquire().await else {
                return FetchOutcome::Failed;
            };
            self.source.get_job_status(job_id).await
        };

        let status = match fetched {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(job_id = %job_id, "Failed to fetch job status: {}", e);
                return FetchOutcome::Failed;
            }
        };

        // The pending record follows the cache write with no await in
        // between, so cancellation cannot land between the two.
        let previous = self.cache.replace(job_id, status.clone()).await;
        match JobStateChanged::detect(job_id, previous, status) {
            Some(event) => {
                self.pending_deliveries().insert(
                    job_id.to_string(),
                    PendingDelivery {
                        event: event.clone(),
                        delivered: 0,
                    },
                );
                self.deliver(&event, 0).await;
                FetchOutcome::Changed
            }
            None => FetchOutcome::Unchanged,
        }
    }

    fn pending_deliveries(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingDelivery>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dispatch `event` from listener `start` on, tracking progress in the
    /// pending ledger and clearing the entry once every listener returned.
    async fn deliver(&self, event: &JobStateChanged, start: usize) {
        let job_id = event.job_id.as_str();
        self.listeners
            .dispatch_from(event, start, |delivered| {
                if let Some(entry) = self.pending_deliveries().get_mut(job_id) {
                    entry.delivered = delivered;
                }
            })
            .await;
        self.pending_deliveries().remove(job_id);
    }

    /// Finish dispatches that an abandoned cycle left behind.
    async fn resume_pending(&self) -> usize {
        let resumable: Vec<(JobStateChanged, usize)> = self
            .pending_deliveries()
            .values()
            .map(|p| (p.event.clone(), p.delivered))
            .collect();

        for (event, delivered) in &resumable {
            tracing::info!(
                job_id = %event.job_id,
                state = %event.current.kind(),
                resume_at = delivered,
                "Resuming interrupted event dispatch"
            );
            self.deliver(event, *delivered).await;
        }
        resumable.len()
    }

    async fn update_idle_timer(&self) {
        if self.cache.any_running().await {
            *self
                .last_active
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Utc::now();
        }
    }
}

/// Drives polling cycles on a fixed schedule.
pub struct PollingEngine {
    core: Arc<EngineCore>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingEngine {
    pub fn new(source: Arc<dyn JobSource>, config: PollingConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            core: Arc::new(EngineCore {
                source,
                config,
                cache: StatusCache::new(),
                listeners: ListenerRegistry::new(),
                last_active: Mutex::new(Utc::now()),
                cycle_lock: tokio::sync::Mutex::new(()),
                pending: Mutex::new(HashMap::new()),
            }),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Register a listener. Safe to call while the engine is running.
    pub fn add_listener(&self, listener: Arc<dyn JobEventListener>) {
        self.core.listeners.register(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.core.listeners.len()
    }

    /// Last time a cycle saw at least one running job. Starts at creation time.
    pub fn last_active_time(&self) -> DateTime<Utc> {
        *self
            .core
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The engine's view of every job it has fetched.
    pub fn cache(&self) -> &StatusCache {
        &self.core.cache
    }

    /// Spawn the polling schedule. The first cycle runs immediately.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() || *self.shutdown_tx.borrow() {
            tracing::warn!("Polling engine already started or shut down");
            return;
        }

        let core = Arc::clone(&self.core);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tracing::info!(
            interval_secs = core.config.interval.as_secs_f64(),
            max_concurrent_fetches = core.config.max_concurrent_fetches,
            "Polling engine started"
        );

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(core.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if core.try_poll().await.is_none() {
                            tracing::debug!("Previous cycle still running, skipping tick");
                        }
                    }
                }
            }
        }));
    }

    /// Stop scheduling, wait for the in-flight cycle (up to the grace
    /// period), then run one final cycle so the last transitions are seen.
    pub async fn shutdown(&self) -> CycleSummary {
        tracing::info!("Shutting down polling engine");
        self.shutdown_tx.send_replace(true);

        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.core.config.shutdown_grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Polling task failed: {}", e),
                Err(_) => {
                    tracing::warn!(
                        grace_secs = self.core.config.shutdown_grace.as_secs_f64(),
                        "In-flight cycle did not finish in time, abandoning it"
                    );
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }

        tracing::info!("Running final poll before shutdown");
        self.core.poll().await
    }

    /// Run a single cycle now, after any cycle already in progress.
    pub async fn poll(&self) -> CycleSummary {
        self.core.poll().await
    }
}
