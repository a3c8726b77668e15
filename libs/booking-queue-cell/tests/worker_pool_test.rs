use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use booking_queue_cell::{
    InMemoryBroker, Job, JobBroker, JobEnvelope, JobError, JobExecutor, JobProducer, JobStatus,
    OtpEmailPayload, QueueConfig, WorkerConfig, WorkerPool, EMAILS_QUEUE,
};

/// Fails the first `fail_times` attempts of every job, then succeeds.
struct ScriptedExecutor {
    fail_times: u32,
    permanent: bool,
    delay: Duration,
    attempts: Mutex<HashMap<String, u32>>,
    finished: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new(fail_times: u32) -> Self {
        Self {
            fail_times,
            permanent: false,
            delay: Duration::ZERO,
            attempts: Mutex::new(HashMap::new()),
            finished: Mutex::new(Vec::new()),
        }
    }

    fn attempts_for(&self, email: &str) -> u32 {
        self.attempts.lock().unwrap().get(email).copied().unwrap_or(0)
    }

    fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobExecutor for ScriptedExecutor {
    async fn execute(&self, job: &Job) -> Result<(), JobError> {
        let Job::OtpEmail(payload) = job else {
            return Err(JobError::Permanent("unexpected job".into()));
        };

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(payload.email.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if attempt <= self.fail_times {
            return if self.permanent {
                Err(JobError::Permanent("mailbox does not exist".into()))
            } else {
                Err(JobError::Transient("smtp unavailable".into()))
            };
        }

        self.finished.lock().unwrap().push(payload.email.clone());
        Ok(())
    }
}

fn otp(email: &str) -> Job {
    Job::OtpEmail(OtpEmailPayload {
        email: email.to_string(),
        otp: "424242".to_string(),
    })
}

fn test_config() -> WorkerConfig {
    WorkerConfig {
        worker_id: "test-worker".to_string(),
        queues: vec![QueueConfig {
            name: EMAILS_QUEUE.to_string(),
            concurrency: 2,
        }],
        poll_interval: Duration::from_millis(10),
        error_backoff: Duration::from_millis(10),
        job_timeout: Duration::from_secs(2),
        shutdown_timeout: Duration::from_secs(5),
        maintenance_interval: Duration::from_secs(3600),
    }
}

async fn wait_for_status(broker: &InMemoryBroker, envelope: &JobEnvelope, status: JobStatus) -> JobEnvelope {
    for _ in 0..300 {
        if let Some(current) = broker.get_job(envelope.id).await.unwrap() {
            if current.status == status {
                return current;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached {:?}", envelope.id, status);
}

#[tokio::test]
async fn test_successful_job_is_acknowledged() {
    let broker = Arc::new(InMemoryBroker::new());
    let executor = Arc::new(ScriptedExecutor::new(0));
    let producer = JobProducer::new(broker.clone(), 5);

    let envelope = producer.enqueue(otp("ok@example.com")).await.unwrap();
    assert_eq!(envelope.queue, EMAILS_QUEUE);

    let pool = WorkerPool::new(broker.clone(), executor.clone(), test_config()).start();
    let done = wait_for_status(&broker, &envelope, JobStatus::Completed).await;
    pool.shutdown().await.unwrap();

    assert_eq!(done.retry_count, 0);
    assert_eq!(executor.attempts_for("ok@example.com"), 1);
    let depth = broker.depth(EMAILS_QUEUE).await.unwrap();
    assert_eq!((depth.pending, depth.processing, depth.delayed, depth.dead), (0, 0, 0, 0));
}

#[tokio::test]
async fn test_transient_failure_is_retried_after_backoff() {
    let broker = Arc::new(InMemoryBroker::new());
    let executor = Arc::new(ScriptedExecutor::new(1));
    let producer = JobProducer::new(broker.clone(), 5);
    let envelope = producer.enqueue(otp("flaky@example.com")).await.unwrap();

    let before = Utc::now();
    let pool = WorkerPool::new(broker.clone(), executor.clone(), test_config()).start();

    let retrying = wait_for_status(&broker, &envelope, JobStatus::Retrying).await;
    assert_eq!(retrying.retry_count, 1);
    assert_eq!(retrying.last_error.as_deref(), Some("smtp unavailable"));
    let ready_at = retrying.next_attempt_at.unwrap();
    assert!(ready_at >= before + chrono::Duration::seconds(2));
    assert_eq!(broker.depth(EMAILS_QUEUE).await.unwrap().delayed, 1);

    // Not due yet.
    assert_eq!(broker.promote_due(EMAILS_QUEUE, Utc::now()).await.unwrap(), 0);
    assert_eq!(broker.promote_due(EMAILS_QUEUE, ready_at).await.unwrap(), 1);

    wait_for_status(&broker, &envelope, JobStatus::Completed).await;
    pool.shutdown().await.unwrap();
    assert_eq!(executor.attempts_for("flaky@example.com"), 2);
}

#[tokio::test]
async fn test_exhausted_job_is_buried_and_never_attempted_again() {
    let broker = Arc::new(InMemoryBroker::new());
    let executor = Arc::new(ScriptedExecutor::new(1));
    let producer = JobProducer::new(broker.clone(), 1);
    let envelope = producer.enqueue(otp("dead@example.com")).await.unwrap();

    let pool = WorkerPool::new(broker.clone(), executor.clone(), test_config()).start();
    let dead = wait_for_status(&broker, &envelope, JobStatus::Dead).await;
    assert_eq!(dead.retry_count, 1);

    // Nothing is waiting for a retry.
    let far_future = Utc::now() + chrono::Duration::hours(1);
    assert_eq!(broker.promote_due(EMAILS_QUEUE, far_future).await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executor.attempts_for("dead@example.com"), 1);

    let dead_jobs = broker.dead_jobs(EMAILS_QUEUE, 10).await.unwrap();
    assert_eq!(dead_jobs.len(), 1);
    assert_eq!(dead_jobs[0].id, envelope.id);

    // Operator re-drive runs it again; the scripted failure is spent.
    broker.requeue_dead(EMAILS_QUEUE, envelope.id).await.unwrap();
    wait_for_status(&broker, &envelope, JobStatus::Completed).await;
    pool.shutdown().await.unwrap();

    assert_eq!(executor.attempts_for("dead@example.com"), 2);
    assert_eq!(broker.depth(EMAILS_QUEUE).await.unwrap().dead, 0);
}

#[tokio::test]
async fn test_permanent_failure_skips_retries() {
    let broker = Arc::new(InMemoryBroker::new());
    let executor = Arc::new(ScriptedExecutor {
        permanent: true,
        ..ScriptedExecutor::new(10)
    });
    let producer = JobProducer::new(broker.clone(), 5);
    let envelope = producer.enqueue(otp("bounce@example.com")).await.unwrap();

    let pool = WorkerPool::new(broker.clone(), executor.clone(), test_config()).start();
    let dead = wait_for_status(&broker, &envelope, JobStatus::Dead).await;
    pool.shutdown().await.unwrap();

    assert_eq!(dead.last_error.as_deref(), Some("mailbox does not exist"));
    assert_eq!(executor.attempts_for("bounce@example.com"), 1);
}

#[tokio::test]
async fn test_job_exceeding_timeout_counts_as_failure() {
    let broker = Arc::new(InMemoryBroker::new());
    let executor = Arc::new(ScriptedExecutor {
        delay: Duration::from_millis(500),
        ..ScriptedExecutor::new(0)
    });
    let producer = JobProducer::new(broker.clone(), 5);
    let envelope = producer.enqueue(otp("slow@example.com")).await.unwrap();

    let config = WorkerConfig {
        job_timeout: Duration::from_millis(50),
        ..test_config()
    };
    let pool = WorkerPool::new(broker.clone(), executor.clone(), config).start();
    let retrying = wait_for_status(&broker, &envelope, JobStatus::Retrying).await;
    pool.shutdown().await.unwrap();

    assert!(retrying.last_error.unwrap().contains("timed out"));
    assert!(executor.finished().is_empty());
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_jobs() {
    let broker = Arc::new(InMemoryBroker::new());
    let executor = Arc::new(ScriptedExecutor {
        delay: Duration::from_millis(300),
        ..ScriptedExecutor::new(0)
    });
    let producer = JobProducer::new(broker.clone(), 5);
    let envelope = producer.enqueue(otp("inflight@example.com")).await.unwrap();

    let pool = WorkerPool::new(broker.clone(), executor.clone(), test_config()).start();
    for _ in 0..300 {
        if !broker.in_flight(EMAILS_QUEUE).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(broker.in_flight(EMAILS_QUEUE), vec![envelope.id]);

    pool.shutdown().await.unwrap();

    let finished = broker.get_job(envelope.id).await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(executor.finished(), vec!["inflight@example.com".to_string()]);
}

#[tokio::test]
async fn test_jobs_not_started_before_shutdown_stay_queued() {
    let broker = Arc::new(InMemoryBroker::new());
    let executor = Arc::new(ScriptedExecutor::new(0));
    let pool = WorkerPool::new(broker.clone(), executor.clone(), test_config()).start();
    pool.shutdown().await.unwrap();

    let producer = JobProducer::new(broker.clone(), 5);
    producer.enqueue(otp("later@example.com")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(broker.depth(EMAILS_QUEUE).await.unwrap().pending, 1);
    assert_eq!(executor.attempts_for("later@example.com"), 0);
}

#[tokio::test]
async fn test_stalled_job_is_recovered_on_startup() {
    let broker = Arc::new(InMemoryBroker::new());
    let producer = JobProducer::new(broker.clone(), 5);
    let envelope = producer.enqueue(otp("crashed@example.com")).await.unwrap();

    // A previous worker claimed the job and died an hour ago.
    let mut claimed = broker.pop(EMAILS_QUEUE, "dead-worker").await.unwrap().unwrap();
    claimed.updated_at = Utc::now() - chrono::Duration::hours(1);
    broker.overwrite(claimed);

    let executor = Arc::new(ScriptedExecutor::new(0));
    let pool = WorkerPool::new(broker.clone(), executor.clone(), test_config()).start();
    wait_for_status(&broker, &envelope, JobStatus::Completed).await;
    pool.shutdown().await.unwrap();

    assert_eq!(executor.attempts_for("crashed@example.com"), 1);
}
