//! Sidecar binary: polls a job service and records job state transitions.

use std::sync::Arc;

use clap::Parser;
use secrecy::ExposeSecret;

use shellbox::config::SidecarArgs;
use shellbox::sidecar::{
    HttpJobSource, LoggingSubscriber, PollingEngine, PostgresStateStore, StatePersister,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = SidecarArgs::parse();
    shellbox::logging::init(args.log_format);
    let config = args.into_config()?;

    let source = HttpJobSource::new(&config.target, config.api_key)?;
    tracing::info!(target_url = %source.base_url(), "Watching job service");

    let engine = PollingEngine::new(Arc::new(source), config.polling);
    engine.add_listener(Arc::new(LoggingSubscriber));

    if config.dry_run {
        tracing::info!("Dry run: job state will only be logged");
    } else if let Some(ref url) = config.database_url {
        let store = PostgresStateStore::connect(url.expose_secret())?;
        store.ensure_schema().await?;
        engine.add_listener(Arc::new(StatePersister::new(
            Arc::new(store),
            config.instance_id.clone(),
        )));
        tracing::info!(instance_id = %config.instance_id, "Persisting job state to PostgreSQL");
    }

    engine.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    let summary = engine.shutdown().await;
    tracing::info!(
        fetched = summary.fetched,
        events = summary.events,
        last_active = %engine.last_active_time(),
        "Sidecar stopped"
    );
    Ok(())
}
