//! Job service: the registry of running jobs and its HTTP surface.

pub mod api;
pub mod auth;
pub mod registry;
pub mod status;

pub use api::{ApiError, ApiState, JobApi};
pub use auth::{ApiKeyAuth, api_key_middleware};
pub use registry::{Job, JobRegistry};
pub use status::{RECENT_LOG_LINES, resolve};
