//! Command line and environment configuration for both binaries.
//!
//! Every flag can also be set through the environment; a `.env` file in the
//! working directory is loaded first by each binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;

use crate::error::ConfigError;
use crate::logging::LogFormat;
use crate::sidecar::{DEFAULT_INSTANCE_ID, PollingConfig};

/// Default port of the job service.
pub const DEFAULT_PORT: u16 = 9090;

/// Arguments of the `shellbox` job service.
#[derive(Debug, Clone, Parser)]
#[command(name = "shellbox", version, about = "Run shell commands in sandboxed containers")]
pub struct ServerArgs {
    /// Port to listen on.
    #[arg(long, env = "SHELLBOX_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind.
    #[arg(long, env = "SHELLBOX_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Bearer key required on job routes. Auth is disabled when unset.
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Image for job containers. Empty selects the runtime default.
    #[arg(long, env = "SHELLBOX_IMAGE", default_value = "")]
    pub image: String,

    #[arg(long, env = "SHELLBOX_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Resolved job service settings.
#[derive(Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub api_key: Option<SecretString>,
    pub image: String,
}

impl ServerArgs {
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SHELLBOX_PORT".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(ServerConfig {
            addr: SocketAddr::new(self.bind, self.port),
            api_key: non_blank(self.api_key),
            image: self.image.trim().to_string(),
        })
    }
}

/// Arguments of the `shellbox-sidecar` poller.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "shellbox-sidecar",
    version,
    about = "Watch a shellbox service and persist job state transitions"
)]
pub struct SidecarArgs {
    /// Base URL of the job service, e.g. `http://localhost:9090` or `localhost:9090`.
    pub target: String,

    /// Only log transitions; do not persist them.
    #[arg(long)]
    pub dry_run: bool,

    /// Seconds between polling cycles.
    #[arg(long, env = "SHELLBOX_POLL_INTERVAL_SECS", default_value_t = 10)]
    pub interval_secs: u64,

    /// Maximum status fetches in flight within one cycle.
    #[arg(long, env = "SHELLBOX_MAX_CONCURRENT_FETCHES", default_value_t = 5)]
    pub max_concurrent_fetches: usize,

    /// Seconds shutdown waits for an in-flight cycle.
    #[arg(long, env = "SHELLBOX_SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    pub shutdown_grace_secs: u64,

    /// Bearer key for the job service.
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// PostgreSQL connection string for persisted job state.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Tag written with every persisted record.
    #[arg(long, env = "INSTANCE_ID", default_value = DEFAULT_INSTANCE_ID)]
    pub instance_id: String,

    #[arg(long, env = "SHELLBOX_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Resolved sidecar settings.
#[derive(Debug)]
pub struct SidecarConfig {
    pub target: String,
    pub dry_run: bool,
    pub polling: PollingConfig,
    pub api_key: Option<SecretString>,
    /// Always set unless `dry_run`.
    pub database_url: Option<SecretString>,
    pub instance_id: String,
}

impl SidecarArgs {
    pub fn into_config(self) -> Result<SidecarConfig, ConfigError> {
        let target = self.target.trim().to_string();
        if target.is_empty() {
            return Err(ConfigError::Missing {
                key: "target".to_string(),
            });
        }

        let polling = PollingConfig {
            interval: Duration::from_secs(self.interval_secs),
            max_concurrent_fetches: self.max_concurrent_fetches,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        };
        polling.validate()?;

        let database_url = non_blank(self.database_url);
        if !self.dry_run && database_url.is_none() {
            return Err(ConfigError::Missing {
                key: "DATABASE_URL".to_string(),
            });
        }

        let instance_id = match self.instance_id.trim() {
            "" => DEFAULT_INSTANCE_ID.to_string(),
            id => id.to_string(),
        };

        Ok(SidecarConfig {
            target,
            dry_run: self.dry_run,
            polling,
            api_key: non_blank(self.api_key),
            database_url,
            instance_id,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<SecretString> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}
