use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use appointment_cell::{AppointmentJobExecutor, BookingService, SupabaseAppointmentStore};
use booking_queue_cell::{JobBroker, JobProducer, RedisBroker, TracingNotifier, WorkerConfig, WorkerPool};
use performance_cell::{CacheService, RedisCacheStore};
use shared_config::AppConfig;
use shared_database::SupabaseClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    let redis_broker = RedisBroker::new(&config.redis_url)?;
    redis_broker.ping().await?;
    let broker: Arc<dyn JobBroker> = Arc::new(redis_broker);

    // Queued bookings invalidate the same cache the API reads from.
    let cache = Arc::new(CacheService::new(
        Arc::new(RedisCacheStore::new(&config.redis_url)?),
        Duration::from_secs(config.cache_ttl_seconds),
    ));
    let store = Arc::new(SupabaseAppointmentStore::new(Arc::new(SupabaseClient::new(&config))));
    let booking = Arc::new(
        BookingService::new(store, cache, Duration::from_secs(config.slot_lock_ttl_seconds))
            .with_producer(JobProducer::new(broker.clone(), config.queue_max_retry)),
    );

    let executor = Arc::new(AppointmentJobExecutor::new(booking, Arc::new(TracingNotifier)));
    let worker_config = WorkerConfig::from_app_config(&config);
    info!(
        "Starting worker {} on queues {:?}",
        worker_config.worker_id,
        worker_config.queue_names()
    );

    let pool = WorkerPool::new(broker, executor, worker_config).start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if let Err(e) = pool.shutdown().await {
        error!("Worker shutdown incomplete: {}", e);
        return Err(e.into());
    }

    info!("Worker stopped");
    Ok(())
}
