//! Stock ledger worker: runs the reservation expiration sweeper.
//!
//! `stockledger-worker` runs the sweeper until Ctrl-C.
//! `stockledger-worker sweep-once` runs a single tick and prints its summary as JSON.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use stockledger_core::{Clock, SystemClock};
use stockledger_infra::store::migrate;
use stockledger_infra::{
    ExpirationSweeper, LedgerStore, PostgresLedgerStore, PostgresReservationStore,
    ReservationService, Settings, StockEventPublisher, TracingStockEventPublisher,
};

const MAX_DB_CONNECTIONS: u32 = 5;

type Adapters = (Arc<dyn LedgerStore>, Arc<dyn StockEventPublisher>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockledger_observability::init();

    let settings = Settings::from_env().context("failed to load settings from environment")?;
    let database_url = settings.require_database_url()?;

    let pool = PgPoolOptions::new()
        .max_connections(MAX_DB_CONNECTIONS)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    migrate(&pool)
        .await
        .context("failed to apply stock ledger schema")?;

    let reservations = Arc::new(PostgresReservationStore::new(pool.clone()));
    let (ledger, publisher) = build_adapters(&settings, PostgresLedgerStore::new(pool)).await;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = Arc::new(ReservationService::with_config(
        ledger,
        reservations,
        clock,
        settings.reservation,
    ));
    let sweeper = Arc::new(ExpirationSweeper::new(
        service,
        publisher,
        settings.sweeper.clone(),
    ));

    if std::env::args().nth(1).as_deref() == Some("sweep-once") {
        let summary = sweeper.trigger().await.context("sweep failed")?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let handle = sweeper.spawn();
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutdown requested; waiting for the sweeper to stop");
    let stats = handle.stats();
    handle.shutdown().await.context("sweeper task failed")?;
    info!(
        ticks = stats.ticks,
        skipped = stats.skipped,
        released = stats.released,
        failed = stats.failed,
        deferred = stats.deferred,
        "worker stopped"
    );
    Ok(())
}

fn without_redis(ledger: PostgresLedgerStore) -> Adapters {
    (Arc::new(ledger), Arc::new(TracingStockEventPublisher))
}

#[cfg(feature = "redis")]
async fn build_adapters(settings: &Settings, ledger: PostgresLedgerStore) -> Adapters {
    use stockledger_infra::CachedLedgerStore;
    use stockledger_infra::cache::RedisCache;
    use stockledger_infra::publish::RedisStockEventPublisher;

    let Some(redis_url) = settings.redis_url.as_deref() else {
        info!("REDIS_URL not set; running without cache");
        return without_redis(ledger);
    };

    let cache = match RedisCache::connect(redis_url).await {
        Ok(cache) => cache,
        Err(e) => {
            warn!(error = %e, "redis unavailable at startup; running without cache");
            return without_redis(ledger);
        }
    };

    let publisher: Arc<dyn StockEventPublisher> =
        match RedisStockEventPublisher::connect(redis_url, settings.stock_events_channel.clone())
            .await
        {
            Ok(publisher) => Arc::new(publisher),
            Err(e) => {
                warn!(error = %e, "redis publisher unavailable; logging stock events instead");
                Arc::new(TracingStockEventPublisher)
            }
        };

    info!(channel = %settings.stock_events_channel, "redis cache and event publishing enabled");
    (
        Arc::new(CachedLedgerStore::with_config(ledger, cache, settings.cache)),
        publisher,
    )
}

#[cfg(not(feature = "redis"))]
async fn build_adapters(settings: &Settings, ledger: PostgresLedgerStore) -> Adapters {
    if settings.redis_url.is_some() {
        warn!("REDIS_URL is set but this build has no redis support; ignoring it");
    }
    without_redis(ledger)
}
