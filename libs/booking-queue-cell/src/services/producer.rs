use std::sync::Arc;
use tracing::{info, instrument};

use crate::services::broker::JobBroker;
use crate::{BookingQueueError, Job, JobEnvelope};

/// Enqueues jobs; never waits for execution.
#[derive(Clone)]
pub struct JobProducer {
    broker: Arc<dyn JobBroker>,
    max_retry: u32,
}

impl JobProducer {
    pub fn new(broker: Arc<dyn JobBroker>, max_retry: u32) -> Self {
        Self { broker, max_retry }
    }

    /// Enqueues onto the job type's default queue.
    pub async fn enqueue(&self, job: Job) -> Result<JobEnvelope, BookingQueueError> {
        let queue = job.default_queue();
        self.enqueue_on(queue, job).await
    }

    #[instrument(skip(self, job), fields(job_type = job.kind()))]
    pub async fn enqueue_on(&self, queue: &str, job: Job) -> Result<JobEnvelope, BookingQueueError> {
        let envelope = JobEnvelope::new(job, queue, self.max_retry);
        self.broker.push(&envelope).await?;

        info!("Job {} ({}) queued on {}", envelope.id, envelope.job.kind(), queue);
        Ok(envelope)
    }

    pub fn broker(&self) -> &Arc<dyn JobBroker> {
        &self.broker
    }
}
