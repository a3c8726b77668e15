use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use appointment_cell::services::{ProposedSlot, SchedulingEngine};
use appointment_cell::{
    time_of_day, Appointment, AppointmentStatus, AppointmentStore, AppointmentType, ConsultationMode,
    InMemoryAppointmentStore, SchedulingError,
};

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
}

fn booked(patient_id: Uuid, doctor_id: Uuid, start: &str, end: &str, status: AppointmentStatus) -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        patient_id,
        doctor_id,
        appointment_date: date(),
        start_time: time_of_day::parse(start).unwrap(),
        end_time: time_of_day::parse(end).unwrap(),
        mode: ConsultationMode::Online,
        appointment_type: AppointmentType::Consultation,
        status,
        notes: None,
        location: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn slot(patient_id: Uuid, doctor_id: Uuid, start: &str, end: &str) -> ProposedSlot {
    ProposedSlot {
        patient_id,
        doctor_id,
        date: date(),
        start_time: start.to_string(),
        end_time: end.to_string(),
        exclude: None,
    }
}

async fn engine_with(rows: Vec<Appointment>) -> SchedulingEngine {
    let store = Arc::new(InMemoryAppointmentStore::new());
    for row in &rows {
        store.insert(row).await.unwrap();
    }
    SchedulingEngine::new(store)
}

#[tokio::test]
async fn test_doctor_overlap_is_rejected_and_adjacent_slot_accepted() {
    let doctor = Uuid::new_v4();
    let engine = engine_with(vec![booked(Uuid::new_v4(), doctor, "10:00", "10:30", AppointmentStatus::Pending)]).await;

    assert_matches!(
        engine.check(&slot(Uuid::new_v4(), doctor, "10:15", "10:45")).await,
        Err(SchedulingError::DoctorSlotConflict)
    );

    let window = engine.check(&slot(Uuid::new_v4(), doctor, "10:30", "11:00")).await.unwrap();
    assert_eq!(time_of_day::format(&window.start), "10:30");
}

#[tokio::test]
async fn test_slot_ending_where_existing_starts_is_accepted() {
    let doctor = Uuid::new_v4();
    let engine = engine_with(vec![booked(Uuid::new_v4(), doctor, "10:00", "10:30", AppointmentStatus::Confirmed)]).await;

    assert!(engine.check(&slot(Uuid::new_v4(), doctor, "09:30", "10:00")).await.is_ok());
}

#[tokio::test]
async fn test_patient_scope_is_checked_before_doctor_scope() {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let engine = engine_with(vec![
        booked(patient, Uuid::new_v4(), "14:00", "15:00", AppointmentStatus::Pending),
        booked(Uuid::new_v4(), doctor, "14:00", "15:00", AppointmentStatus::Pending),
    ])
    .await;

    assert_matches!(
        engine.check(&slot(patient, doctor, "14:30", "15:30")).await,
        Err(SchedulingError::PatientSlotConflict)
    );

    // Same patient with a different doctor still collides.
    assert_matches!(
        engine.check(&slot(patient, Uuid::new_v4(), "14:59", "16:00")).await,
        Err(SchedulingError::PatientSlotConflict)
    );
}

#[tokio::test]
async fn test_cancelled_reservations_do_not_block() {
    let doctor = Uuid::new_v4();
    let engine = engine_with(vec![booked(Uuid::new_v4(), doctor, "10:00", "10:30", AppointmentStatus::Cancelled)]).await;

    assert!(engine.check(&slot(Uuid::new_v4(), doctor, "10:15", "10:45")).await.is_ok());
}

#[tokio::test]
async fn test_reservation_does_not_conflict_with_itself() {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let existing = booked(patient, doctor, "10:00", "10:30", AppointmentStatus::Pending);
    let engine = engine_with(vec![existing.clone()]).await;

    let mut unchanged = slot(patient, doctor, "10:00", "10:30");
    assert_matches!(engine.check(&unchanged).await, Err(SchedulingError::PatientSlotConflict));

    unchanged.exclude = Some(existing.id);
    assert!(engine.check(&unchanged).await.is_ok());

    let extended = ProposedSlot {
        end_time: "11:00".to_string(),
        ..unchanged
    };
    assert!(engine.check(&extended).await.is_ok());
}

#[tokio::test]
async fn test_format_and_ordering_are_validated_before_any_lookup() {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let engine = engine_with(vec![booked(patient, doctor, "10:00", "11:00", AppointmentStatus::Pending)]).await;

    assert_matches!(
        engine.check(&slot(patient, doctor, "10:00", "10.30")).await,
        Err(SchedulingError::InvalidTimeFormat(raw)) if raw == "10.30"
    );
    assert_matches!(
        engine.check(&slot(patient, doctor, "10:30", "10:15")).await,
        Err(SchedulingError::EndBeforeStart)
    );
}
