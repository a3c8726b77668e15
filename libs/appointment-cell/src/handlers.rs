// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Appointment, AppointmentPage, AvailableSlots, CreateAppointmentRequest, Pagination, Participant, QueuedBooking, RescheduleAppointmentRequest,
    UpdateAppointmentRequest, UpdateStatusRequest,
};
use crate::services::booking::BookingService;

#[derive(Clone)]
pub struct AppointmentState {
    pub booking: Arc<BookingService>,
}

/// `limit` and `offset` stay raw so malformed values are clamped instead of rejected.
#[derive(Debug, Deserialize)]
pub struct ListAppointmentsQuery {
    #[serde(alias = "doctor_id")]
    pub doctor: Option<Uuid>,
    #[serde(alias = "patient_id")]
    pub patient: Option<Uuid>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    #[serde(alias = "doctorId")]
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

fn page_body(page: AppointmentPage) -> Value {
    let count = page.appointments.len();
    json!({
        "appointments": page.appointments,
        "limit": page.limit,
        "offset": page.offset,
        "count": count
    })
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Appointment>), AppError> {
    let appointment = state.booking.create(&user, request).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

pub async fn create_appointment_async(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<QueuedBooking>), AppError> {
    let queued = state.booking.enqueue_create(&user, request).await?;
    Ok((StatusCode::ACCEPTED, Json(queued)))
}

// ==============================================================================
// READ HANDLERS
// ==============================================================================

pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    Ok(Json(state.booking.get(&user, appointment_id).await?))
}

pub async fn list_appointments(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListAppointmentsQuery>,
) -> Result<Json<Value>, AppError> {
    let who = match (query.doctor, query.patient) {
        (Some(doctor), None) => Participant::Doctor(doctor),
        (None, Some(patient)) => Participant::Patient(patient),
        (Some(_), Some(_)) => {
            return Err(AppError::BadRequest(
                "Filter by either doctor or patient, not both".to_string(),
            ))
        }
        (None, None) => return Err(AppError::BadRequest("doctor or patient is required".to_string())),
    };
    let page = Pagination::from_raw(query.limit.as_deref(), query.offset.as_deref());

    let result = state.booking.list(&user, who, page).await?;
    Ok(Json(page_body(result)))
}

pub async fn list_all_appointments(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, AppError> {
    let page = Pagination::from_raw(query.limit.as_deref(), query.offset.as_deref());
    let result = state.booking.list_all(&user, page).await?;
    Ok(Json(page_body(result)))
}

pub async fn get_available_slots(
    State(state): State<AppointmentState>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<AvailableSlots>, AppError> {
    Ok(Json(
        state
            .booking
            .available_slots(query.doctor_id, query.date)
            .await?,
    ))
}

// ==============================================================================
// MUTATION HANDLERS
// ==============================================================================

pub async fn update_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Appointment>, AppError> {
    Ok(Json(state.booking.update(&user, appointment_id, request).await?))
}

pub async fn reschedule_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Appointment>, AppError> {
    Ok(Json(state.booking.reschedule(&user, appointment_id, request).await?))
}

pub async fn update_appointment_status(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Appointment>, AppError> {
    Ok(Json(
        state
            .booking
            .change_status(&user, appointment_id, request.status)
            .await?,
    ))
}

pub async fn cancel_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    Ok(Json(state.booking.cancel(&user, appointment_id).await?))
}

pub async fn delete_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state.booking.delete(&user, appointment_id).await?;
    Ok(Json(json!({
        "deleted": true,
        "appointment_id": appointment_id
    })))
}
