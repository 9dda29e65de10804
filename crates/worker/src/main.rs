//! Background worker: outbox publisher, snapshot jobs, retention and hold expiry
//! against the Postgres store.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tokio::runtime::Handle;

use stockledger_events::{EventEnvelope, InMemoryEventBus};
use stockledger_infra::config::StockConfig;
use stockledger_infra::jobs::{JobScheduler, SchedulerConfig};
use stockledger_infra::mutation::MutationService;
use stockledger_infra::outbox::{BusTransport, EventTransport, OutboxPublishJob, OutboxPublisher};
use stockledger_infra::retention::{HoldExpiryJob, LedgerRetentionJob, OutboxRetentionJob};
use stockledger_infra::snapshots::{
    DailySnapshotJob, PeriodEndSnapshotJob, SnapshotRetentionJob, SnapshotService,
};
use stockledger_infra::store::PostgresStockStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockledger_observability::init();

    let config = StockConfig::from_env().context("invalid configuration")?;
    let database_url = config.require_database_url()?;

    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = Arc::new(PostgresStockStore::new(pool, Handle::current()));
    store.migrate().await.context("failed to apply schema")?;

    let transport = build_transport(&config)?;
    let hour = config.snapshot_hour_utc;

    let service = Arc::new(
        MutationService::new(store.clone()).with_max_retries(config.max_mutation_retries),
    );
    let snapshots = Arc::new(
        SnapshotService::new(store.clone()).with_retention(config.snapshot_retention),
    );

    let mut scheduler = JobScheduler::new(store.clone());
    scheduler
        .register(OutboxPublishJob::new(
            OutboxPublisher::new(store.clone(), transport)
                .with_batch_size(config.outbox_batch_size),
            config.outbox_poll_interval,
        ))
        .register(DailySnapshotJob::new(snapshots.clone(), hour))
        .register(PeriodEndSnapshotJob::new(snapshots.clone(), hour))
        .register(SnapshotRetentionJob::new(snapshots, hour))
        .register(LedgerRetentionJob::new(store.clone(), config.ledger_retention, hour))
        .register(OutboxRetentionJob::new(store.clone(), config.outbox_retention, hour))
        .register(HoldExpiryJob::new(service, config.hold_expiry_interval));

    tracing::info!(jobs = ?scheduler.job_names(), "starting stock ledger worker");
    let handle = scheduler
        .spawn(SchedulerConfig::default())
        .context("failed to start job threads")?;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    // Job threads may be inside a blocking store call; join them off the runtime.
    let stats = tokio::task::spawn_blocking(move || {
        let stats = handle.stats();
        handle.shutdown();
        stats
    })
    .await
    .context("scheduler shutdown panicked")?;

    tracing::info!(
        runs_succeeded = stats.runs_succeeded,
        runs_failed = stats.runs_failed,
        record_errors = stats.record_errors,
        uptime_secs = stats.uptime_secs,
        "worker stopped"
    );
    Ok(())
}

fn build_transport(config: &StockConfig) -> anyhow::Result<Arc<dyn EventTransport>> {
    if let Some(url) = config.redis_url.as_deref() {
        return redis_transport(url);
    }

    tracing::warn!("REDIS_URL not set; outbox events go to an in-process bus");
    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
    Ok(Arc::new(BusTransport::new(bus)))
}

#[cfg(feature = "redis")]
fn redis_transport(url: &str) -> anyhow::Result<Arc<dyn EventTransport>> {
    let redis = stockledger_infra::outbox::RedisStreamsTransport::new(url, None)
        .context("failed to open Redis client")?;
    tracing::info!(stream_key = redis.stream_key(), "publishing outbox to Redis Streams");
    Ok(Arc::new(redis))
}

#[cfg(not(feature = "redis"))]
fn redis_transport(_url: &str) -> anyhow::Result<Arc<dyn EventTransport>> {
    anyhow::bail!("REDIS_URL is set but the worker was built without the redis feature")
}
