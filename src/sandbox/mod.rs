//! Sandboxed container runtime.
//!
//! Jobs run as `sh -c <command>` inside a fresh Docker container with the
//! resource limits of the request applied at creation time.

pub mod config;
pub mod container;
pub mod error;
pub mod runtime;

pub use config::{DEFAULT_IMAGE, ResourceLimits, RuntimeConfig};
pub use container::{DockerRuntime, connect_docker};
pub use error::RuntimeError;
pub use runtime::{CONTAINER_NOT_FOUND, ContainerRuntime, ContainerState, LogStream};
