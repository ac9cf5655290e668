//! Container runtime abstraction.
//!
//! The job registry only ever talks to this trait. [`DockerRuntime`] is the
//! production implementation; tests use in-memory fakes.
//!
//! [`DockerRuntime`]: crate::sandbox::container::DockerRuntime

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::sandbox::config::ResourceLimits;
use crate::sandbox::error::{Result, RuntimeError};

/// `system_error` reported when the engine no longer knows a container.
pub const CONTAINER_NOT_FOUND: &str = "Container not found";

/// Snapshot of a container as reported by the engine.
///
/// Produced fresh by every inspect call and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub container_id: String,
    pub is_running: bool,
    pub exit_code: Option<i64>,
    pub oom_killed: bool,
    pub system_error: Option<String>,
}

impl ContainerState {
    /// State for a container id the engine does not recognise.
    pub fn not_found(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            is_running: false,
            exit_code: None,
            oom_killed: false,
            system_error: Some(CONTAINER_NOT_FOUND.to_string()),
        }
    }
}

/// Live log lines for a single container.
///
/// Yields `Ok(line)` in emission order. The stream then either ends (the
/// container's output is complete) or yields exactly one `Err` and ends.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Capability over a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull `image` (or the default image), then create and start a container
    /// running `sh -c <command>` under `limits`. Returns the container id.
    async fn start_container(
        &self,
        image: &str,
        command: &str,
        limits: &ResourceLimits,
    ) -> Result<String>;

    /// Inspect a container. An unknown id is reported through
    /// [`ContainerState::system_error`], not as an error.
    async fn inspect_container(&self, container_id: &str) -> Result<ContainerState>;

    /// Up to `max_lines` most recent lines of combined stdout/stderr, oldest
    /// first. Never blocks past the runtime's log deadline.
    async fn tail_logs(&self, container_id: &str, max_lines: usize) -> Vec<String>;

    /// Follow the container's output until it exits.
    fn stream_logs(&self, container_id: &str) -> LogStream;
}

/// Split a raw output frame into lines with trailing whitespace removed.
///
/// A bare carriage return (progress output such as `10%\r50%`) also ends a
/// line, so no returned line contains `\r`.
pub(crate) fn frame_lines(frame: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(frame)
        .lines()
        .flat_map(|line| {
            let mut parts: Vec<&str> = line.split('\r').filter(|p| !p.is_empty()).collect();
            if parts.is_empty() {
                parts.push("");
            }
            parts
        })
        .map(|line| line.trim_end().to_string())
        .collect()
}

/// Keep only the last `max_lines` entries.
pub(crate) fn keep_last(mut lines: Vec<String>, max_lines: usize) -> Vec<String> {
    if lines.len() > max_lines {
        lines.drain(..lines.len() - max_lines);
    }
    lines
}

/// A stream that immediately fails with `error`.
pub(crate) fn failed_stream(error: RuntimeError) -> LogStream {
    Box::pin(futures::stream::once(async move { Err(error) }))
}
