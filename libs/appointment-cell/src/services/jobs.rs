// libs/appointment-cell/src/services/jobs.rs
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use booking_queue_cell::{Job, JobError, JobExecutor, Notifier};

use crate::services::booking::BookingService;

/// Dispatches every job type the worker drains to its handler.
pub struct AppointmentJobExecutor {
    booking: Arc<BookingService>,
    notifier: Arc<dyn Notifier>,
}

impl AppointmentJobExecutor {
    pub fn new(booking: Arc<BookingService>, notifier: Arc<dyn Notifier>) -> Self {
        Self { booking, notifier }
    }
}

#[async_trait]
impl JobExecutor for AppointmentJobExecutor {
    async fn execute(&self, job: &Job) -> Result<(), JobError> {
        match job {
            Job::CreateAppointment(payload) => match self.booking.execute_create_job(payload).await {
                Ok(appointment) => {
                    info!("Appointment job for {} settled", appointment.id);
                    Ok(())
                }
                Err(e) if e.is_permanent() => {
                    warn!("Appointment {} rejected: {}", payload.appointment_id, e);
                    Err(JobError::Permanent(e.to_string()))
                }
                Err(e) => Err(JobError::Transient(e.to_string())),
            },
            Job::AppointmentNotice(notice) => self.notifier.notify_appointment(notice).await,
            Job::WelcomeEmail(payload) => {
                let body = format!("Hello {}, welcome aboard.", payload.name);
                self.notifier.send_email(&payload.email, "Welcome", &body).await
            }
            Job::OtpEmail(payload) => {
                let body = format!("Your verification code is {}", payload.otp);
                self.notifier.send_email(&payload.email, "Your verification code", &body).await
            }
            Job::ResetPasswordNotice(payload) => {
                self.notifier
                    .send_email(&payload.email, &payload.subject, &payload.body)
                    .await
            }
        }
    }
}
