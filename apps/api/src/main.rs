use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{BookingService, SupabaseAppointmentStore};
use booking_queue_cell::{JobBroker, JobProducer, RedisBroker};
use performance_cell::{CacheService, RedisCacheStore};
use shared_config::AppConfig;
use shared_database::SupabaseClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting booking core API server");

    let config = Arc::new(AppConfig::from_env());

    let cache = Arc::new(CacheService::new(
        Arc::new(RedisCacheStore::new(&config.redis_url)?),
        Duration::from_secs(config.cache_ttl_seconds),
    ));
    // An unreachable broker degrades async booking and notices; it does not stop the API.
    let redis_broker = RedisBroker::new(&config.redis_url)?;
    if let Err(e) = redis_broker.ping().await {
        warn!("Job broker unreachable at startup, queued operations will fail until it returns: {}", e);
    }
    let broker: Arc<dyn JobBroker> = Arc::new(redis_broker);
    let store = Arc::new(SupabaseAppointmentStore::new(Arc::new(SupabaseClient::new(&config))));

    let booking = Arc::new(
        BookingService::new(store, cache.clone(), Duration::from_secs(config.slot_lock_ttl_seconds))
            .with_producer(JobProducer::new(broker.clone(), config.queue_max_retry)),
    );

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router::create_router(config.clone(), booking, broker, cache)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
