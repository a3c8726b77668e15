// libs/appointment-cell/src/models.rs
use std::fmt;

use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use booking_queue_cell::BookingQueueError;
use shared_database::DatabaseError;
use shared_models::error::AppError;

pub use shared_models::scheduling::{AppointmentType, ConsultationMode};

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppointmentStatus {
    #[serde(alias = "SCHEDULED")]
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    /// No transitions are defined out of a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::Completed)
    }

    /// Whether the reservation still occupies its time slot.
    pub fn holds_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "PENDING"),
            AppointmentStatus::Confirmed => write!(f, "CONFIRMED"),
            AppointmentStatus::Cancelled => write!(f, "CANCELLED"),
            AppointmentStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    #[serde(with = "time_of_day")]
    pub start_time: NaiveTime,
    #[serde(with = "time_of_day")]
    pub end_time: NaiveTime,
    pub mode: ConsultationMode,
    #[serde(default)]
    pub appointment_type: AppointmentType,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One side of a reservation. Conflict scopes, list selectors, lock keys and
/// cache selectors are all keyed by participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participant {
    Patient(Uuid),
    Doctor(Uuid),
}

impl Participant {
    pub fn kind(&self) -> &'static str {
        match self {
            Participant::Patient(_) => "patient",
            Participant::Doctor(_) => "doctor",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Participant::Patient(id) | Participant::Doctor(id) => *id,
        }
    }

    /// PostgREST column holding this participant's id.
    pub fn column(&self) -> &'static str {
        match self {
            Participant::Patient(_) => "patient_id",
            Participant::Doctor(_) => "doctor_id",
        }
    }
}

/// Times travel as `HH:MM`; the store may hand back `HH:MM:SS`.
pub mod time_of_day {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(raw.trim(), FORMAT).ok()
    }

    pub fn format(time: &NaiveTime) -> String {
        time.format(FORMAT).to_string()
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&raw, FORMAT))
            .map_err(|_| de::Error::custom(format!("invalid time of day: {}", raw)))
    }
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppointmentRequest {
    /// Defaults to the caller; only administrators may book for someone else.
    #[serde(default, alias = "patientId", alias = "userId")]
    pub patient_id: Option<Uuid>,
    #[serde(alias = "doctorId")]
    pub doctor_id: Uuid,
    #[serde(alias = "appointmentDate", alias = "date")]
    pub appointment_date: NaiveDate,
    #[serde(alias = "startTime")]
    pub start_time: String,
    #[serde(alias = "endTime")]
    pub end_time: String,
    pub mode: ConsultationMode,
    #[serde(default, alias = "appointmentType")]
    pub appointment_type: AppointmentType,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAppointmentRequest {
    #[serde(alias = "appointment_time", alias = "startTime")]
    pub start_time: Option<String>,
    #[serde(alias = "endTime")]
    pub end_time: Option<String>,
    pub mode: Option<ConsultationMode>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

impl UpdateAppointmentRequest {
    pub fn touches_time(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleAppointmentRequest {
    #[serde(alias = "appointment_date")]
    pub date: NaiveDate,
    #[serde(alias = "startTime")]
    pub start_time: String,
    #[serde(alias = "endTime")]
    pub end_time: String,
    pub mode: ConsultationMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentPage {
    pub appointments: Vec<Appointment>,
    pub limit: u32,
    pub offset: u32,
}

/// Free slot start times (`HH:MM`) for one doctor on one day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailableSlots {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub slots: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedBooking {
    pub job_id: Uuid,
    pub appointment_id: Uuid,
    pub queue: String,
}

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Pagination {
    /// Lenient parsing: an unusable limit is clamped to the maximum page size and an
    /// unusable offset falls back to the first page.
    pub fn from_raw(limit: Option<&str>, offset: Option<&str>) -> Self {
        let limit = match limit.map(str::trim) {
            None | Some("") => DEFAULT_PAGE_LIMIT,
            Some(raw) => match raw.parse::<i64>() {
                Ok(n) if (1..=MAX_PAGE_LIMIT as i64).contains(&n) => n as u32,
                _ => MAX_PAGE_LIMIT,
            },
        };

        let offset = offset
            .map(str::trim)
            .and_then(|raw| raw.parse::<i64>().ok())
            .filter(|n| *n >= 0)
            .map(|n| n.min(u32::MAX as i64) as u32)
            .unwrap_or(0);

        Self { limit, offset }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(DatabaseError),

    #[error("Unexpected store response: {0}")]
    Decode(String),
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(body) => StoreError::Duplicate(body),
            other => StoreError::Database(other),
        }
    }
}

/// Why a proposed slot was rejected.
#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Invalid time format, expected HH:MM: {0}")]
    InvalidTimeFormat(String),

    #[error("End time must be after start time")]
    EndBeforeStart,

    #[error("Patient already has an appointment in this time slot")]
    PatientSlotConflict,

    #[error("Doctor already has an appointment in this time slot")]
    DoctorSlotConflict,

    #[error("Conflict check failed: {0}")]
    StoreError(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error("Cannot move appointment from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Only pending appointments can be rescheduled (current status: {0})")]
    NotReschedulable(AppointmentStatus),

    #[error("{0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Time slot is busy, try again")]
    SlotBusy,

    #[error("Booking queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<BookingQueueError> for AppointmentError {
    fn from(err: BookingQueueError) -> Self {
        AppointmentError::QueueUnavailable(err.to_string())
    }
}

impl AppointmentError {
    /// Rejections that no amount of retrying will fix.
    pub fn is_permanent(&self) -> bool {
        match self {
            AppointmentError::Scheduling(SchedulingError::StoreError(_)) => false,
            AppointmentError::Scheduling(_)
            | AppointmentError::InvalidStatusTransition { .. }
            | AppointmentError::NotReschedulable(_)
            | AppointmentError::Forbidden(_)
            | AppointmentError::Validation(_) => true,
            AppointmentError::NotFound
            | AppointmentError::SlotBusy
            | AppointmentError::QueueUnavailable(_)
            | AppointmentError::Store(_) => false,
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        let message = err.to_string();
        match err {
            AppointmentError::NotFound => AppError::NotFound(message),
            AppointmentError::Scheduling(SchedulingError::InvalidTimeFormat(_)) => {
                AppError::rejected(StatusCode::BAD_REQUEST, "invalid_time_format", message)
            }
            AppointmentError::Scheduling(SchedulingError::EndBeforeStart) => {
                AppError::rejected(StatusCode::BAD_REQUEST, "end_before_start", message)
            }
            AppointmentError::Scheduling(SchedulingError::PatientSlotConflict) => {
                AppError::rejected(StatusCode::CONFLICT, "patient_slot_conflict", message)
            }
            AppointmentError::Scheduling(SchedulingError::DoctorSlotConflict) => {
                AppError::rejected(StatusCode::CONFLICT, "doctor_slot_conflict", message)
            }
            AppointmentError::Scheduling(SchedulingError::StoreError(_)) | AppointmentError::Store(_) => {
                AppError::Internal(message)
            }
            AppointmentError::InvalidStatusTransition { .. } | AppointmentError::NotReschedulable(_) => {
                AppError::rejected(StatusCode::CONFLICT, "invalid_status_transition", message)
            }
            AppointmentError::Forbidden(_) => AppError::Forbidden(message),
            AppointmentError::Validation(_) => AppError::BadRequest(message),
            AppointmentError::SlotBusy => {
                AppError::rejected(StatusCode::SERVICE_UNAVAILABLE, "slot_busy", message)
            }
            AppointmentError::QueueUnavailable(_) => {
                AppError::rejected(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", message)
            }
        }
    }
}
