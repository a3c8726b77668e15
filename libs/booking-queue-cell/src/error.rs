use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum BookingQueueError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job {0} is not in the dead list")]
    NotDead(Uuid),

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Invalid job status transition from {from:?} to {to:?}")]
    InvalidStatusTransition {
        from: crate::JobStatus,
        to: crate::JobStatus,
    },

    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    PoolError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Worker pool did not drain within {timeout_seconds} seconds")]
    ShutdownTimeout { timeout_seconds: u64 },
}

impl From<deadpool_redis::PoolError> for BookingQueueError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        BookingQueueError::PoolError(err.to_string())
    }
}

/// Failure reported by a job handler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// Worth another attempt after backoff.
    #[error("{0}")]
    Transient(String),

    /// Retrying cannot help; the job goes straight to the dead list.
    #[error("{0}")]
    Permanent(String),
}
