use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, instrument, warn};

use crate::services::broker::JobBroker;
use crate::{BookingQueueError, FailureOutcome, Job, JobEnvelope, JobError, WorkerConfig};

/// Runs a job. Implementations must tolerate running the same job more than once.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<(), JobError>;
}

struct WorkerContext {
    broker: Arc<dyn JobBroker>,
    executor: Arc<dyn JobExecutor>,
    config: WorkerConfig,
}

/// Drains the configured queues, each with its own number of concurrent loops.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
}

impl WorkerPool {
    pub fn new(broker: Arc<dyn JobBroker>, executor: Arc<dyn JobExecutor>, config: WorkerConfig) -> Self {
        Self {
            ctx: Arc::new(WorkerContext {
                broker,
                executor,
                config,
            }),
        }
    }

    #[instrument(skip(self), fields(worker_id = %self.ctx.config.worker_id))]
    pub fn start(self) -> WorkerPoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        for queue in &self.ctx.config.queues {
            info!("Starting {} workers on queue {}", queue.concurrency, queue.name);

            for i in 0..queue.concurrency {
                let ctx = self.ctx.clone();
                let queue_name = queue.name.clone();
                let worker_name = format!("{}-{}-{}", self.ctx.config.worker_id, queue.name, i);
                let rx = shutdown_rx.clone();

                handles.push(tokio::spawn(async move {
                    ctx.worker_loop(queue_name, worker_name, rx).await
                }));
            }
        }

        let ctx = self.ctx.clone();
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { ctx.maintenance_loop(rx).await }));

        WorkerPoolHandle {
            shutdown_tx,
            handles,
            shutdown_timeout: self.ctx.config.shutdown_timeout,
        }
    }
}

pub struct WorkerPoolHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl WorkerPoolHandle {
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops claiming new jobs and waits for in-flight ones to finish. Jobs still
    /// running when the timeout expires stay in their processing list and are
    /// recovered by the next worker that starts.
    pub async fn shutdown(self) -> Result<(), BookingQueueError> {
        info!("Initiating graceful shutdown of worker pool");
        self.trigger_shutdown();

        match timeout(self.shutdown_timeout, futures::future::join_all(self.handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("Worker task ended abnormally: {}", e);
                    }
                }
                info!("Worker pool drained");
                Ok(())
            }
            Err(_) => {
                warn!("Worker pool did not drain within {:?}", self.shutdown_timeout);
                Err(BookingQueueError::ShutdownTimeout {
                    timeout_seconds: self.shutdown_timeout.as_secs(),
                })
            }
        }
    }
}

impl WorkerContext {
    async fn worker_loop(&self, queue: String, worker_name: String, mut shutdown: watch::Receiver<bool>) {
        debug!("Worker loop started: {}", worker_name);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.broker.pop(&queue, &worker_name).await {
                Ok(Some(envelope)) => {
                    // Not raced against shutdown: a claimed job always runs to an outcome.
                    self.process(envelope, &worker_name).await;
                }
                Ok(None) => {
                    if idle(self.config.poll_interval, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    error!("Worker {} failed to dequeue from {}: {}", worker_name, queue, e);
                    if idle(self.config.error_backoff, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        debug!("Worker loop ended: {}", worker_name);
    }

    #[instrument(skip(self, envelope), fields(job_id = %envelope.id, job_type = envelope.job.kind(), attempt = envelope.retry_count + 1))]
    async fn process(&self, mut envelope: JobEnvelope, worker_name: &str) {
        let started = Instant::now();

        let outcome = match timeout(self.config.job_timeout, self.executor.execute(&envelope.job)).await {
            Ok(result) => result,
            Err(_) => Err(JobError::Transient(format!(
                "timed out after {}s",
                self.config.job_timeout.as_secs()
            ))),
        };

        let now = Utc::now();
        let persisted = match outcome {
            Ok(()) => {
                envelope.mark_completed(now);
                info!(
                    "Job {} completed by {} in {}ms",
                    envelope.id,
                    worker_name,
                    started.elapsed().as_millis()
                );
                self.broker.ack(&envelope).await
            }
            Err(JobError::Permanent(msg)) => {
                error!("Job {} failed permanently: {}", envelope.id, msg);
                envelope.mark_dead(msg, now);
                self.broker.bury(&envelope).await
            }
            Err(JobError::Transient(msg)) => match envelope.record_failure(msg.clone(), now) {
                FailureOutcome::Retry { ready_at } => {
                    warn!(
                        "Job {} failed (attempt {}/{}), retrying at {}: {}",
                        envelope.id, envelope.retry_count, envelope.max_retry, ready_at, msg
                    );
                    self.broker.schedule_retry(&envelope).await
                }
                FailureOutcome::Dead => {
                    error!(
                        "Job {} exhausted {} attempts, moving to dead list: {}",
                        envelope.id, envelope.max_retry, msg
                    );
                    self.broker.bury(&envelope).await
                }
            },
        };

        // The job stays in processing and is redelivered after stalled recovery.
        if let Err(e) = persisted {
            error!("Failed to record outcome of job {}: {}", envelope.id, e);
        }
    }

    async fn maintenance_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let stall_threshold = chrono::Duration::from_std(self.config.stall_threshold())
            .unwrap_or_else(|_| chrono::Duration::seconds(240));

        loop {
            let now = Utc::now();
            for queue in &self.config.queues {
                if let Err(e) = self.broker.promote_due(&queue.name, now).await {
                    warn!("Failed to promote delayed jobs on {}: {}", queue.name, e);
                }
                match self.broker.recover_stalled(&queue.name, now - stall_threshold).await {
                    Ok(0) => {}
                    Ok(n) => warn!("Recovered {} stalled jobs on {}", n, queue.name),
                    Err(e) => warn!("Failed to recover stalled jobs on {}: {}", queue.name, e),
                }
            }

            if idle(self.config.maintenance_interval, &mut shutdown).await {
                break;
            }
        }
    }
}

/// Sleeps for `duration` unless shutdown is signalled first; returns true on shutdown.
async fn idle(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
