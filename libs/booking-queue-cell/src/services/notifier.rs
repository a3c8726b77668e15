use async_trait::async_trait;
use tracing::info;

use crate::{AppointmentNoticePayload, JobError};

/// Outbound delivery seam for notification jobs.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), JobError>;

    async fn notify_appointment(&self, notice: &AppointmentNoticePayload) -> Result<(), JobError>;
}

/// Records deliveries in the log instead of sending them.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send_email(&self, to: &str, subject: &str, _body: &str) -> Result<(), JobError> {
        info!(recipient = %to, subject = %subject, "email dispatched");
        Ok(())
    }

    async fn notify_appointment(&self, notice: &AppointmentNoticePayload) -> Result<(), JobError> {
        info!(
            appointment_id = %notice.appointment_id,
            event = ?notice.event,
            status = %notice.status,
            "appointment notice dispatched"
        );
        Ok(())
    }
}
