//! Enqueues one cloud usage metering job outside the regular schedule.
//!
//! Exits non-zero if the queue could not be reached or rejected the job.
//! The queue connection is released before exit either way.

use std::sync::Arc;

use anyhow::{Context, Result};
use elasticdash_core::RealClock;
use elasticdash_export::{retrigger_metering, storage::PgQueueConnector, Config};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid RUST_LOG directive")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load()?;
    let connector = PgQueueConnector::new(config.database_url.clone(), 1);

    match retrigger_metering(&connector, Arc::new(RealClock::new())).await {
        Ok(job_id) => {
            info!(%job_id, "metering job enqueued");
            Ok(())
        },
        Err(e) => {
            error!(
                error = %e,
                database_url = %config.database_url_masked(),
                "failed to enqueue metering job"
            );
            Err(e).context("metering retrigger failed")
        },
    }
}
