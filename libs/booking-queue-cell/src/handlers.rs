use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Json,
    Extension,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use shared_models::{auth::User, error::AppError};

use crate::{services::broker::JobBroker, BookingQueueError};

const DEFAULT_DEAD_LIMIT: usize = 50;
const MAX_DEAD_LIMIT: usize = 500;

#[derive(Clone)]
pub struct QueueAdminState {
    pub broker: Arc<dyn JobBroker>,
    pub queues: Vec<String>,
}

impl QueueAdminState {
    fn known_queue(&self, queue: &str) -> Result<(), AppError> {
        if self.queues.iter().any(|q| q == queue) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Unknown queue: {}", queue)))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeadJobsQuery {
    pub limit: Option<usize>,
}

fn require_admin(user: &User) -> Result<(), AppError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Only administrators can inspect queues".to_string()))
    }
}

fn map_queue_error(e: BookingQueueError) -> AppError {
    match e {
        BookingQueueError::JobNotFound(id) => AppError::NotFound(format!("Job not found: {}", id)),
        BookingQueueError::NotDead(id) => AppError::Conflict(format!("Job {} is not in the dead list", id)),
        BookingQueueError::UnknownQueue(q) => AppError::NotFound(format!("Unknown queue: {}", q)),
        other => {
            error!("Queue operation failed: {}", other);
            AppError::Internal(other.to_string())
        }
    }
}

/// Depth of every queue this deployment drains.
pub async fn get_queue_stats(
    State(state): State<QueueAdminState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;

    let mut queues = Vec::with_capacity(state.queues.len());
    for queue in &state.queues {
        queues.push(state.broker.depth(queue).await.map_err(map_queue_error)?);
    }

    Ok(Json(json!({ "queues": queues })))
}

pub async fn get_job(
    State(state): State<QueueAdminState>,
    Extension(user): Extension<User>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;

    let job = state
        .broker
        .get_job(job_id)
        .await
        .map_err(map_queue_error)?
        .ok_or_else(|| AppError::NotFound(format!("Job not found: {}", job_id)))?;

    Ok(Json(json!(job)))
}

pub async fn list_dead_jobs(
    State(state): State<QueueAdminState>,
    Extension(user): Extension<User>,
    Path(queue): Path<String>,
    Query(query): Query<DeadJobsQuery>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;
    state.known_queue(&queue)?;

    let limit = query.limit.unwrap_or(DEFAULT_DEAD_LIMIT).min(MAX_DEAD_LIMIT);
    let jobs = state
        .broker
        .dead_jobs(&queue, limit)
        .await
        .map_err(map_queue_error)?;

    Ok(Json(json!({
        "queue": queue,
        "jobs": jobs,
        "count": jobs.len(),
    })))
}

pub async fn retry_dead_job(
    State(state): State<QueueAdminState>,
    Extension(user): Extension<User>,
    Path((queue, job_id)): Path<(String, Uuid)>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;
    state.known_queue(&queue)?;

    let envelope = state
        .broker
        .requeue_dead(&queue, job_id)
        .await
        .map_err(map_queue_error)?;

    info!("Operator {} requeued dead job {} on {}", user.id, job_id, queue);

    Ok(Json(json!({
        "job_id": envelope.id,
        "queue": envelope.queue,
        "status": envelope.status,
    })))
}
