//! Job service binary.

use std::sync::Arc;

use clap::Parser;

use shellbox::config::ServerArgs;
use shellbox::orchestrator::{ApiKeyAuth, ApiState, JobApi, JobRegistry};
use shellbox::sandbox::{DockerRuntime, RuntimeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = ServerArgs::parse();
    shellbox::logging::init(args.log_format);
    let config = args.into_config()?;

    let runtime = DockerRuntime::connect(RuntimeConfig::default()).await?;
    if !runtime.is_available().await {
        anyhow::bail!("Docker daemon is not responding");
    }

    let registry = Arc::new(JobRegistry::new(Arc::new(runtime), config.image));
    let state = ApiState {
        registry,
        auth: ApiKeyAuth::from_optional(config.api_key),
    };

    JobApi::serve(state, config.addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown signal received");
    })
    .await?;

    tracing::info!("Job service stopped");
    Ok(())
}
