use assert_matches::assert_matches;
use chrono::Utc;
use uuid::Uuid;

use booking_queue_cell::{
    BookingQueueError, InMemoryBroker, Job, JobBroker, JobEnvelope, JobStatus, WelcomeEmailPayload,
    EMAILS_QUEUE,
};

fn welcome(name: &str) -> JobEnvelope {
    JobEnvelope::new(
        Job::WelcomeEmail(WelcomeEmailPayload {
            email: format!("{}@example.com", name),
            name: name.to_string(),
        }),
        EMAILS_QUEUE,
        5,
    )
}

#[tokio::test]
async fn test_pop_is_fifo_and_claims_job() {
    let broker = InMemoryBroker::new();
    let first = welcome("first");
    let second = welcome("second");
    broker.push(&first).await.unwrap();
    broker.push(&second).await.unwrap();

    let claimed = broker.pop(EMAILS_QUEUE, "w-1").await.unwrap().unwrap();
    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.status, JobStatus::Processing);
    assert_eq!(claimed.worker_id.as_deref(), Some("w-1"));
    assert_eq!(broker.in_flight(EMAILS_QUEUE), vec![first.id]);

    let depth = broker.depth(EMAILS_QUEUE).await.unwrap();
    assert_eq!((depth.pending, depth.processing), (1, 1));
}

#[tokio::test]
async fn test_completed_record_is_not_redelivered() {
    let broker = InMemoryBroker::new();
    let mut done = welcome("done");
    done.mark_completed(Utc::now());
    broker.push(&done).await.unwrap();

    assert!(broker.pop(EMAILS_QUEUE, "w-1").await.unwrap().is_none());
    assert!(broker.in_flight(EMAILS_QUEUE).is_empty());
}

#[tokio::test]
async fn test_recent_in_flight_job_is_not_recovered() {
    let broker = InMemoryBroker::new();
    broker.push(&welcome("busy")).await.unwrap();
    broker.pop(EMAILS_QUEUE, "w-1").await.unwrap().unwrap();

    let cutoff = Utc::now() - chrono::Duration::minutes(4);
    assert_eq!(broker.recover_stalled(EMAILS_QUEUE, cutoff).await.unwrap(), 0);
    assert_eq!(broker.in_flight(EMAILS_QUEUE).len(), 1);
}

#[tokio::test]
async fn test_requeue_rejects_jobs_that_are_not_dead() {
    let broker = InMemoryBroker::new();
    let queued = welcome("queued");
    broker.push(&queued).await.unwrap();

    assert_matches!(
        broker.requeue_dead(EMAILS_QUEUE, queued.id).await,
        Err(BookingQueueError::NotDead(id)) if id == queued.id
    );
    assert_matches!(
        broker.requeue_dead(EMAILS_QUEUE, Uuid::new_v4()).await,
        Err(BookingQueueError::JobNotFound(_))
    );
}

#[tokio::test]
async fn test_dead_list_is_newest_first_and_limited() {
    let broker = InMemoryBroker::new();
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        let envelope = welcome(name);
        broker.push(&envelope).await.unwrap();
        let mut claimed = broker.pop(EMAILS_QUEUE, "w").await.unwrap().unwrap();
        claimed.mark_dead("boom".into(), Utc::now());
        broker.bury(&claimed).await.unwrap();
        ids.push(envelope.id);
    }

    let dead = broker.dead_jobs(EMAILS_QUEUE, 2).await.unwrap();
    assert_eq!(dead.iter().map(|j| j.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
    assert!(dead.iter().all(|j| j.status == JobStatus::Dead));
}
