use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::{create_appointment_router, BookingService};
use booking_queue_cell::{create_booking_queue_router, JobBroker, APPOINTMENTS_QUEUE, EMAILS_QUEUE};
use performance_cell::{create_performance_router, CacheService};
use shared_config::AppConfig;

pub fn create_router(
    config: Arc<AppConfig>,
    booking: Arc<BookingService>,
    broker: Arc<dyn JobBroker>,
    cache: Arc<CacheService>,
) -> Router {
    let queues = vec![APPOINTMENTS_QUEUE.to_string(), EMAILS_QUEUE.to_string()];

    Router::new()
        .route("/", get(|| async { "Booking core API is running!" }))
        .nest("/appointments", create_appointment_router(config.clone(), booking))
        .nest("/queue", create_booking_queue_router(config.clone(), broker, queues))
        .nest("/performance", create_performance_router(config, cache))
}
