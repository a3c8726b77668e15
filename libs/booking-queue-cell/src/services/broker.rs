use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{BookingQueueError, JobEnvelope, QueueDepth};

/// Durable named-queue transport.
///
/// Delivery is at-least-once: `pop` moves a job into the queue's processing set
/// and only `ack`, `schedule_retry` or `bury` take it out again. A job left in
/// processing by a crashed worker comes back through `recover_stalled`.
#[async_trait]
pub trait JobBroker: Send + Sync {
    async fn push(&self, envelope: &JobEnvelope) -> Result<(), BookingQueueError>;

    /// Claims the next runnable job for `worker_id`, skipping records that are
    /// already terminal or have expired.
    async fn pop(&self, queue: &str, worker_id: &str) -> Result<Option<JobEnvelope>, BookingQueueError>;

    async fn ack(&self, envelope: &JobEnvelope) -> Result<(), BookingQueueError>;

    /// Parks the job until `envelope.next_attempt_at`.
    async fn schedule_retry(&self, envelope: &JobEnvelope) -> Result<(), BookingQueueError>;

    async fn bury(&self, envelope: &JobEnvelope) -> Result<(), BookingQueueError>;

    /// Moves delayed jobs whose retry time has passed back to pending.
    async fn promote_due(&self, queue: &str, now: DateTime<Utc>) -> Result<u64, BookingQueueError>;

    /// Returns jobs untouched since `older_than` from processing to pending.
    async fn recover_stalled(&self, queue: &str, older_than: DateTime<Utc>) -> Result<u64, BookingQueueError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<JobEnvelope>, BookingQueueError>;

    /// Most recently buried first.
    async fn dead_jobs(&self, queue: &str, limit: usize) -> Result<Vec<JobEnvelope>, BookingQueueError>;

    async fn requeue_dead(&self, queue: &str, id: Uuid) -> Result<JobEnvelope, BookingQueueError>;

    async fn depth(&self, queue: &str) -> Result<QueueDepth, BookingQueueError>;
}
