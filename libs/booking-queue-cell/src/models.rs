use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::scheduling::{AppointmentType, ConsultationMode};

pub const APPOINTMENTS_QUEUE: &str = "appointments";
pub const EMAILS_QUEUE: &str = "emails";

/// Retry delays never exceed ten minutes.
pub const MAX_RETRY_DELAY_SECS: u64 = 600;

// ==============================================================================
// JOB PAYLOADS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateAppointmentPayload {
    /// Assigned by the producer so that redelivery cannot create a second row.
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub mode: ConsultationMode,
    #[serde(default)]
    pub appointment_type: AppointmentType,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WelcomeEmailPayload {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtpEmailPayload {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResetPasswordPayload {
    pub email: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentEvent {
    Created,
    Updated,
    Rescheduled,
    Cancelled,
    StatusChanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentNoticePayload {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub event: AppointmentEvent,
    pub status: String,
    pub date: NaiveDate,
    pub start_time: String,
}

/// Every kind of deferred work, tagged on the wire by its job type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Job {
    #[serde(rename = "appointment:create")]
    CreateAppointment(CreateAppointmentPayload),
    #[serde(rename = "appointment:notice")]
    AppointmentNotice(AppointmentNoticePayload),
    #[serde(rename = "email:welcome")]
    WelcomeEmail(WelcomeEmailPayload),
    #[serde(rename = "email:otp")]
    OtpEmail(OtpEmailPayload),
    #[serde(rename = "email:reset_password")]
    ResetPasswordNotice(ResetPasswordPayload),
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::CreateAppointment(_) => "appointment:create",
            Job::AppointmentNotice(_) => "appointment:notice",
            Job::WelcomeEmail(_) => "email:welcome",
            Job::OtpEmail(_) => "email:otp",
            Job::ResetPasswordNotice(_) => "email:reset_password",
        }
    }

    pub fn default_queue(&self) -> &'static str {
        match self {
            Job::CreateAppointment(_) | Job::AppointmentNotice(_) => APPOINTMENTS_QUEUE,
            Job::WelcomeEmail(_) | Job::OtpEmail(_) | Job::ResetPasswordNotice(_) => EMAILS_QUEUE,
        }
    }
}

// ==============================================================================
// JOB ENVELOPE & STATUS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Retrying,
    Completed,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Dead)
    }

    pub fn can_transition_to(&self, target: &JobStatus) -> bool {
        use JobStatus::*;
        match (self, target) {
            (Queued, Processing) => true,
            (Retrying, Processing) => true,
            (Processing, Completed) => true,
            (Processing, Retrying) => true,
            (Processing, Dead) => true,
            // Stalled recovery puts an abandoned job back in line.
            (Processing, Queued) => true,
            // Operator re-drive.
            (Dead, Queued) => true,
            _ => false,
        }
    }
}

/// Outcome of recording a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    Retry { ready_at: DateTime<Utc> },
    Dead,
}

/// A job plus its delivery bookkeeping, as persisted by the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub queue: String,
    pub job: Job,
    pub status: JobStatus,
    /// Failed attempts so far.
    pub retry_count: u32,
    pub max_retry: u32,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub worker_id: Option<String>,
}

impl JobEnvelope {
    pub fn new(job: Job, queue: impl Into<String>, max_retry: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            job,
            status: JobStatus::Queued,
            retry_count: 0,
            max_retry,
            enqueued_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            next_attempt_at: None,
            last_error: None,
            worker_id: None,
        }
    }

    pub fn mark_processing(&mut self, worker_id: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.worker_id = Some(worker_id.to_string());
        self.started_at = Some(now);
        self.next_attempt_at = None;
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.last_error = None;
        self.updated_at = now;
    }

    /// Counts a failed attempt and decides between another attempt and the dead list.
    /// A job is attempted at most `max_retry` times.
    pub fn record_failure(&mut self, error: String, now: DateTime<Utc>) -> FailureOutcome {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error);
        self.updated_at = now;

        if self.retry_count >= self.max_retry {
            self.status = JobStatus::Dead;
            self.completed_at = Some(now);
            self.next_attempt_at = None;
            return FailureOutcome::Dead;
        }

        let delay = retry_delay(self.retry_count);
        let ready_at = now
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(MAX_RETRY_DELAY_SECS as i64));
        self.status = JobStatus::Retrying;
        self.next_attempt_at = Some(ready_at);
        FailureOutcome::Retry { ready_at }
    }

    /// Non-retryable failure: straight to the dead list.
    pub fn mark_dead(&mut self, error: String, now: DateTime<Utc>) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.status = JobStatus::Dead;
        self.last_error = Some(error);
        self.completed_at = Some(now);
        self.next_attempt_at = None;
        self.updated_at = now;
    }

    /// Resets bookkeeping for an operator re-drive; the last error is kept for reference.
    pub fn reset_for_requeue(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.retry_count = 0;
        self.started_at = None;
        self.completed_at = None;
        self.next_attempt_at = None;
        self.worker_id = None;
        self.updated_at = now;
    }
}

/// Delay before the next attempt after `failures` failed attempts: `min(2^failures s, 10 min)`.
pub fn retry_delay(failures: u32) -> Duration {
    let secs = 2u64
        .checked_pow(failures)
        .unwrap_or(MAX_RETRY_DELAY_SECS)
        .min(MAX_RETRY_DELAY_SECS);
    Duration::from_secs(secs)
}

// ==============================================================================
// RESPONSES & CONFIGURATION
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueuedJob {
    pub job_id: Uuid,
    pub queue: String,
    pub job_type: String,
    pub status: JobStatus,
}

impl From<&JobEnvelope> for EnqueuedJob {
    fn from(envelope: &JobEnvelope) -> Self {
        Self {
            job_id: envelope.id,
            queue: envelope.queue.clone(),
            job_type: envelope.job.kind().to_string(),
            status: envelope.status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct QueueDepth {
    pub queue: String,
    pub pending: u64,
    pub processing: u64,
    pub delayed: u64,
    pub dead: u64,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub queues: Vec<QueueConfig>,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub job_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub maintenance_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

impl WorkerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            queues: vec![
                QueueConfig {
                    name: APPOINTMENTS_QUEUE.to_string(),
                    concurrency: config.appointment_queue_concurrency,
                },
                QueueConfig {
                    name: EMAILS_QUEUE.to_string(),
                    concurrency: config.email_queue_concurrency,
                },
            ],
            poll_interval: Duration::from_millis(config.worker_poll_interval_ms),
            error_backoff: Duration::from_millis(config.worker_error_backoff_ms),
            job_timeout: Duration::from_secs(config.job_timeout_seconds),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_seconds),
            maintenance_interval: Duration::from_secs(1),
        }
    }

    /// Jobs in processing longer than this are presumed abandoned by a crashed worker.
    pub fn stall_threshold(&self) -> Duration {
        self.job_timeout * 2
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|q| q.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn email_job() -> Job {
        Job::OtpEmail(OtpEmailPayload {
            email: "a@example.com".into(),
            otp: "123456".into(),
        })
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay(0), Duration::from_secs(1));
        assert_eq!(retry_delay(1), Duration::from_secs(2));
        assert_eq!(retry_delay(5), Duration::from_secs(32));
        assert_eq!(retry_delay(9), Duration::from_secs(512));
        assert_eq!(retry_delay(10), Duration::from_secs(600));
        assert_eq!(retry_delay(64), Duration::from_secs(600));
    }

    #[test]
    fn test_job_wire_format_uses_type_tags() {
        let value = serde_json::to_value(email_job()).unwrap();
        assert_eq!(value, json!({"type": "email:otp", "data": {"email": "a@example.com", "otp": "123456"}}));

        let parsed: Job = serde_json::from_value(json!({
            "type": "email:welcome",
            "data": {"email": "b@example.com", "name": "Bo"}
        }))
        .unwrap();
        assert_eq!(parsed.kind(), "email:welcome");
        assert_eq!(parsed.default_queue(), EMAILS_QUEUE);
    }

    #[test]
    fn test_failures_exhaust_after_max_retry_attempts() {
        let mut envelope = JobEnvelope::new(email_job(), EMAILS_QUEUE, 3);
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();

        assert_eq!(
            envelope.record_failure("smtp down".into(), now),
            FailureOutcome::Retry { ready_at: now + chrono::Duration::seconds(2) }
        );
        assert_eq!(
            envelope.record_failure("smtp down".into(), now),
            FailureOutcome::Retry { ready_at: now + chrono::Duration::seconds(4) }
        );
        assert_eq!(envelope.record_failure("smtp down".into(), now), FailureOutcome::Dead);
        assert_eq!(envelope.status, JobStatus::Dead);
        assert_eq!(envelope.retry_count, 3);
        assert_eq!(envelope.last_error.as_deref(), Some("smtp down"));
    }

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Queued.can_transition_to(&JobStatus::Processing));
        assert!(JobStatus::Dead.can_transition_to(&JobStatus::Queued));
        assert!(!JobStatus::Completed.can_transition_to(&JobStatus::Processing));
        assert!(!JobStatus::Queued.can_transition_to(&JobStatus::Completed));
    }
}
