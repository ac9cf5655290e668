//! Sidecar that watches a job service and reacts to job state changes.
//!
//! The [`PollingEngine`] polls a [`JobSource`], keeps a [`StatusCache`] of
//! what it last saw, and hands every transition to the registered
//! [`JobEventListener`]s.

pub mod cache;
pub mod client;
pub mod engine;
pub mod listener;
pub mod persister;

pub use cache::StatusCache;
pub use client::{HttpJobSource, JobSource};
pub use engine::{CycleSummary, PollingConfig, PollingEngine};
pub use listener::{JobEventListener, JobStateChanged, ListenerRegistry, LoggingSubscriber};
pub use persister::{
    DEFAULT_INSTANCE_ID, JobStateRecord, PostgresStateStore, StatePersister, StateStore,
    result_document,
};
