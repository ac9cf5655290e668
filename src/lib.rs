//! shellbox: run shell commands as sandboxed container jobs, and watch them
//! from a sidecar that reacts to job state transitions.
//!
//! - [`sandbox`] talks to the container engine
//! - [`orchestrator`] owns jobs and serves the HTTP API
//! - [`sidecar`] polls the API and fans transitions out to listeners

pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod orchestrator;
pub mod protocol;
pub mod sandbox;
pub mod sidecar;

#[cfg(test)]
pub(crate) mod testing;

pub use job::{JobStatus, JobStatusKind};
