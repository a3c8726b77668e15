use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{get_job, get_queue_stats, list_dead_jobs, retry_dead_job, QueueAdminState};
use crate::services::broker::JobBroker;

pub fn create_booking_queue_router(
    config: Arc<AppConfig>,
    broker: Arc<dyn JobBroker>,
    queues: Vec<String>,
) -> Router {
    let state = QueueAdminState { broker, queues };

    Router::new()
        .route("/stats", get(get_queue_stats))
        .route("/jobs/{job_id}", get(get_job))
        .route("/{queue}/dead", get(list_dead_jobs))
        .route("/{queue}/dead/{job_id}/retry", post(retry_dead_job))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(state)
}
