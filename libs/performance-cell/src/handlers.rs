use axum::{extract::State, Extension, Json};
use chrono::Utc;
use std::sync::Arc;

use shared_models::{auth::User, error::AppError};

use crate::models::PerformanceStats;
use crate::services::CacheService;

pub async fn get_performance_stats(
    State(cache): State<Arc<CacheService>>,
    Extension(user): Extension<User>,
) -> Result<Json<PerformanceStats>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden(
            "Only administrators can view performance statistics".to_string(),
        ));
    }

    Ok(Json(PerformanceStats {
        cache_stats: cache.stats(),
        generated_at: Utc::now(),
    }))
}
