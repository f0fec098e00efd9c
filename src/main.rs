//! ElasticDash export worker.
//!
//! Connects to Postgres, bootstraps the queue tables and runs the export
//! engine until SIGINT or SIGTERM, then drains in-flight jobs.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use elasticdash_core::{storage::Storage, Clock, ErrorTracker, RealClock, TracingErrorTracker};
use elasticdash_export::{
    client::DestinationClient, storage::PostgresStorage, Config, DeletionReconciler, ExportEngine,
    ExportJobHandler, HandlerRegistry, MixpanelDestination, PostHogDestination, TraceDeleteHandler,
};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        workers = config.worker_pool_size,
        posthog_host = %config.posthog_host,
        mixpanel_host = %config.mixpanel_host,
        "configuration loaded"
    );
    if config.posthog_api_key.is_none() {
        warn!("POSTHOG_API_KEY is not set, posthog export jobs will fail");
    }
    if config.mixpanel_token.is_none() {
        warn!("MIXPANEL_TOKEN is not set, mixpanel export jobs will fail");
    }

    let pool = create_database_pool(&config).await?;
    let storage = Arc::new(Storage::new(pool.clone()));
    storage.ensure_schema().await.context("failed to bootstrap schema")?;
    info!("database ready");

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let tracker: Arc<dyn ErrorTracker> = Arc::new(TracingErrorTracker::new());
    let engine_config = config.to_engine_config();
    let postgres = Arc::new(PostgresStorage::new(storage));

    let client = DestinationClient::new(engine_config.client_config.clone())?;
    let posthog = PostHogDestination::new(
        client.clone(),
        config.posthog_host.clone(),
        config.posthog_api_key.clone(),
    );
    let mixpanel = MixpanelDestination::new(
        client,
        config.mixpanel_host.clone(),
        config.mixpanel_token.clone(),
    );
    let reconciler = DeletionReconciler::new(postgres.clone(), tracker.clone());

    let handlers = HandlerRegistry::new()
        .with_handler(Arc::new(ExportJobHandler::new(
            Arc::new(posthog),
            postgres.clone(),
            engine_config.export_batch_size,
        )))
        .with_handler(Arc::new(ExportJobHandler::new(
            Arc::new(mixpanel),
            postgres.clone(),
            engine_config.export_batch_size,
        )))
        .with_handler(Arc::new(TraceDeleteHandler::new(Arc::new(reconciler))));

    let mut engine = ExportEngine::new(postgres, handlers, engine_config, clock, tracker);
    engine.start().await?;
    info!("export worker running");

    shutdown_signal().await?;
    info!("shutdown signal received, draining workers");

    engine.shutdown().await?;
    pool.close().await;

    info!("export worker stopped");
    Ok(())
}

/// Installs the `fmt` subscriber filtered by `RUST_LOG`.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,elasticdash=debug"))
        .context("invalid RUST_LOG directive")?;

    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true).with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to install tracing subscriber")
}

/// Connects to Postgres, retrying while the database comes up.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

async fn shutdown_signal() -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to install SIGTERM handler")?;

        tokio::select! {
            result = ctrl_c => {
                result.context("failed to listen for ctrl-c")?;
                info!("received ctrl-c");
            },
            _ = terminate.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("failed to listen for ctrl-c")?;
        info!("received ctrl-c");
    }

    Ok(())
}
