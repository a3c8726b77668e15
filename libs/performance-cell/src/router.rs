use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::get_performance_stats;
use crate::services::CacheService;

pub fn create_performance_router(config: Arc<AppConfig>, cache: Arc<CacheService>) -> Router {
    // Authenticated here; the handler admits administrators only
    Router::new()
        .route("/stats", get(get_performance_stats))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(cache)
}
