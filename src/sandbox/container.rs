//! Docker container lifecycle for sandboxed jobs.
//!
//! # Container Setup
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      Job Container                            │
//! │                                                               │
//! │  Command:  sh -c <command>                                    │
//! │  Labels:   shellbox.job=true                                  │
//! │                                                               │
//! │  Limits (only when non-zero):                                 │
//! │    Memory:  memory_limit_mb * 1 MiB                           │
//! │    CPU:     cpu_limit * 1024 shares                           │
//! │                                                               │
//! │  Hardening:                                                   │
//! │    All capabilities dropped                                   │
//! │    no-new-privileges                                          │
//! │    Not auto-removed (exit state must stay inspectable)        │
//! └───────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::sandbox::config::{ResourceLimits, RuntimeConfig, effective_image};
use crate::sandbox::error::{Result, RuntimeError};
use crate::sandbox::runtime::{
    ContainerRuntime, ContainerState, LogStream, failed_stream, frame_lines, keep_last,
};

/// Buffered lines between the engine reader task and a log stream consumer.
const LOG_STREAM_BUFFER: usize = 256;

/// [`ContainerRuntime`] backed by a Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    config: RuntimeConfig,
}

impl DockerRuntime {
    /// Create a runtime over an existing Docker connection.
    pub fn new(docker: Docker, config: RuntimeConfig) -> Self {
        Self { docker, config }
    }

    /// Connect to the local Docker daemon with default settings.
    pub async fn connect(config: RuntimeConfig) -> Result<Self> {
        let docker = connect_docker().await?;
        Ok(Self::new(docker, config))
    }

    /// Check if the Docker daemon is available.
    pub async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    /// Pull an image, waiting at most `pull_timeout`.
    ///
    /// A pull that is still running when the deadline passes is abandoned
    /// and creation is attempted anyway; the image may already be local.
    async fn pull_image(&self, image: &str) -> Result<()> {
        let (from_image, tag) = split_image_tag(image);
        tracing::info!(image = %image, "Pulling job image");

        let options = CreateImageOptions {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let pull = async {
            let mut stream = self.docker.create_image(Some(options), None, None);
            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(status) = info.status {
                            tracing::debug!("Pull status: {}", status);
                        }
                    }
                    Err(e) => {
                        return Err(RuntimeError::Provision {
                            image: image.to_string(),
                            reason: format!("image pull failed: {}", e),
                        });
                    }
                }
            }
            Ok(())
        };

        match tokio::time::timeout(self.config.pull_timeout, pull).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    image = %image,
                    timeout = ?self.config.pull_timeout,
                    "Image pull did not finish in time, continuing with local image"
                );
                Ok(())
            }
        }
    }

    /// Force-remove a container that was created but never started.
    async fn discard(&self, container_id: &str) {
        if let Err(e) = self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            tracing::warn!(container_id = %container_id, "Failed to remove container: {}", e);
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start_container(
        &self,
        image: &str,
        command: &str,
        limits: &ResourceLimits,
    ) -> Result<String> {
        let image = effective_image(image);

        self.pull_image(image).await?;

        let options = CreateContainerOptions {
            name: format!("shellbox-{}", uuid::Uuid::new_v4()),
            ..Default::default()
        };

        let config = container_config(&self.config.container_label, image, command, limits);
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| RuntimeError::Provision {
                image: image.to_string(),
                reason: format!("container create failed: {}", e),
            })?;

        if let Err(e) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            self.discard(&response.id).await;
            return Err(RuntimeError::Provision {
                image: image.to_string(),
                reason: format!("container start failed: {}", e),
            });
        }

        tracing::info!(container_id = %response.id, image = %image, "Container started");
        Ok(response.id)
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerState> {
        let response = match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => response,
            Err(e) if is_not_found_error(&e) => {
                tracing::debug!(container_id = %container_id, "Container not found");
                return Ok(ContainerState::not_found(container_id));
            }
            Err(e) => return Err(e.into()),
        };

        let state = response.state.unwrap_or_default();
        let system_error = state.error.filter(|e| !e.trim().is_empty());

        Ok(ContainerState {
            container_id: container_id.to_string(),
            is_running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
            oom_killed: state.oom_killed.unwrap_or(false),
            system_error,
        })
    }

    async fn tail_logs(&self, container_id: &str, max_lines: usize) -> Vec<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            tail: max_lines.to_string(),
            ..Default::default()
        };

        let mut lines = Vec::new();
        let collect = async {
            let mut stream = self.docker.logs(container_id, Some(options));
            while let Some(result) = stream.next().await {
                match result {
                    Ok(output) => {
                        if let Some(frame) = output_bytes(output) {
                            lines.extend(frame_lines(&frame));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(container_id = %container_id, "Error reading container logs: {}", e);
                        break;
                    }
                }
            }
        };

        if tokio::time::timeout(self.config.log_timeout, collect)
            .await
            .is_err()
        {
            tracing::warn!(
                container_id = %container_id,
                timeout = ?self.config.log_timeout,
                "Log tail timed out, returning partial output"
            );
        }

        keep_last(lines, max_lines)
    }

    fn stream_logs(&self, container_id: &str) -> LogStream {
        if container_id.is_empty() {
            return failed_stream(RuntimeError::LogStream {
                container_id: String::new(),
                reason: "empty container id".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(LOG_STREAM_BUFFER);
        let docker = self.docker.clone();
        let container_id = container_id.to_string();

        tokio::spawn(async move {
            let options = LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            };
            let mut stream = docker.logs(&container_id, Some(options));

            while let Some(result) = stream.next().await {
                match result {
                    Ok(output) => {
                        let Some(frame) = output_bytes(output) else {
                            continue;
                        };
                        for line in frame_lines(&frame) {
                            if tx.send(Ok(line)).await.is_err() {
                                // Consumer went away.
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(RuntimeError::LogStream {
                                container_id: container_id.clone(),
                                reason: e.to_string(),
                            }))
                            .await;
                        return;
                    }
                }
            }
            tracing::debug!(container_id = %container_id, "Log stream complete");
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

/// Build the create request for a job container.
pub(crate) fn container_config(
    label: &str,
    image: &str,
    command: &str,
    limits: &ResourceLimits,
) -> Config<String> {
    let labels: HashMap<String, String> = [(label.to_string(), "true".to_string())]
        .into_iter()
        .collect();

    Config {
        image: Some(image.to_string()),
        cmd: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            command.to_string(),
        ]),
        labels: Some(labels),
        host_config: Some(host_config(limits)),
        ..Default::default()
    }
}

/// Build the host config for a job. Zero limits are left unset.
pub(crate) fn host_config(limits: &ResourceLimits) -> HostConfig {
    HostConfig {
        memory: limits.memory_bytes(),
        cpu_shares: limits.cpu_shares(),
        auto_remove: Some(false),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges:true".to_string()]),
        ..Default::default()
    }
}

/// Split `name[:tag]` into its parts, defaulting the tag to `latest`.
///
/// A colon inside a registry host (`localhost:5000/img`) is not a tag.
pub(crate) fn split_image_tag(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let last_segment = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_segment..].rfind(':') {
        Some(pos) => {
            let split = last_segment + pos;
            (&image[..split], &image[split + 1..])
        }
        None => (image, "latest"),
    }
}

fn output_bytes(output: LogOutput) -> Option<Bytes> {
    match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::Console { message } => Some(message),
        LogOutput::StdIn { .. } => None,
    }
}

fn is_not_found_error(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Connect to the Docker daemon.
///
/// Tries these locations in order:
/// 1. `DOCKER_HOST` env var (bollard default)
/// 2. `/var/run/docker.sock` (Linux default)
/// 3. `~/.docker/run/docker.sock` (Docker Desktop on macOS)
pub async fn connect_docker() -> Result<Docker> {
    if let Ok(docker) = Docker::connect_with_local_defaults()
        && docker.ping().await.is_ok()
    {
        return Ok(docker);
    }

    if let Some(home) = std::env::var_os("HOME") {
        let desktop_sock = std::path::Path::new(&home).join(".docker/run/docker.sock");
        if desktop_sock.exists() {
            let sock_str = desktop_sock.to_string_lossy();
            if let Ok(docker) =
                Docker::connect_with_socket(&sock_str, 120, bollard::API_DEFAULT_VERSION)
                && docker.ping().await.is_ok()
            {
                return Ok(docker);
            }
        }
    }

    Err(RuntimeError::DockerNotAvailable {
        reason: "Socket not found: /var/run/docker.sock".to_string(),
    })
}
