use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::{
    time_of_day, Appointment, AppointmentStatus, AppointmentStore, AppointmentType, ConsultationMode, Participant,
    StoreError, SupabaseAppointmentStore,
};
use shared_database::SupabaseClient;
use shared_utils::test_utils::TestConfig;

fn store_for(server: &MockServer) -> SupabaseAppointmentStore {
    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    SupabaseAppointmentStore::new(Arc::new(SupabaseClient::new(&config)))
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
}

fn sample() -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        doctor_id: Uuid::new_v4(),
        appointment_date: date(),
        start_time: time_of_day::parse("10:00").unwrap(),
        end_time: time_of_day::parse("10:30").unwrap(),
        mode: ConsultationMode::Online,
        appointment_type: AppointmentType::Checkup,
        status: AppointmentStatus::Pending,
        notes: None,
        location: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_overlap_query_uses_half_open_bounds() {
    let server = MockServer::start().await;
    let doctor = Uuid::new_v4();
    let excluded = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor)))
        .and(query_param("appointment_date", "eq.2025-01-10"))
        .and(query_param("status", "neq.CANCELLED"))
        .and(query_param("start_time", "lt.10:45"))
        .and(query_param("end_time", "gt.10:15"))
        .and(query_param("id", format!("neq.{}", excluded)))
        .and(header("apikey", "test-service-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": Uuid::new_v4() }])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let hits = store
        .find_overlapping(
            Participant::Doctor(doctor),
            date(),
            time_of_day::parse("10:15").unwrap(),
            time_of_day::parse("10:45").unwrap(),
            Some(excluded),
        )
        .await
        .unwrap();

    assert_eq!(hits, 1);
}

#[tokio::test]
async fn test_insert_round_trips_row() {
    let server = MockServer::start().await;
    let appointment = sample();
    let mut row = serde_json::to_value(&appointment).unwrap();
    row["start_time"] = json!("10:00:00");
    row["end_time"] = json!("10:30:00");

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({ "start_time": "10:00", "status": "PENDING" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([row])))
        .mount(&server)
        .await;

    let stored = store_for(&server).insert(&appointment).await.unwrap();
    assert_eq!(stored, appointment);
}

#[tokio::test]
async fn test_duplicate_insert_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate key value violates unique constraint"))
        .mount(&server)
        .await;

    let result = store_for(&server).insert(&sample()).await;
    assert_matches!(result, Err(StoreError::Duplicate(_)));
}

#[tokio::test]
async fn test_held_lock_is_not_stolen() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(409).set_body_string("lock held"))
        .expect(1)
        .mount(&server)
        .await;
    // Nothing has expired, so nothing is cleared.
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let acquired = store_for(&server)
        .try_acquire_lock("doctor:abc:2025-01-10", "owner-1", Duration::from_secs(30))
        .await
        .unwrap();
    assert!(!acquired);
}

#[tokio::test]
async fn test_expired_lock_is_taken_over() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(409).set_body_string("lock held"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .and(query_param("lock_key", "eq.doctor:abc:2025-01-10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "lock_key": "doctor:abc:2025-01-10" }])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .and(body_partial_json(json!({ "owner": "owner-2" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "lock_key": "doctor:abc:2025-01-10" }])))
        .mount(&server)
        .await;

    let acquired = store_for(&server)
        .try_acquire_lock("doctor:abc:2025-01-10", "owner-2", Duration::from_secs(30))
        .await
        .unwrap();
    assert!(acquired);
}

#[tokio::test]
async fn test_list_orders_newest_first_with_paging() {
    let server = MockServer::start().await;
    let patient = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", patient)))
        .and(query_param("order", "appointment_date.desc,start_time.desc"))
        .and(query_param("limit", "10"))
        .and(query_param("offset", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let rows = store_for(&server)
        .list(Participant::Patient(patient), 10, 20)
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_working_hours_reads_active_row_for_weekday() {
    let server = MockServer::start().await;
    let doctor = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_working_hours"))
        .and(query_param("doctor_id", format!("eq.{}", doctor)))
        .and(query_param("weekday", "eq.5"))
        .and(query_param("is_active", "eq.true"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "start_time": "09:00:00", "end_time": "17:00:00" }])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_working_hours"))
        .and(query_param("weekday", "eq.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let hours = store.working_hours(doctor, 5).await.unwrap();
    assert_eq!(
        hours,
        Some((time_of_day::parse("09:00").unwrap(), time_of_day::parse("17:00").unwrap()))
    );
    assert_eq!(store.working_hours(doctor, 0).await.unwrap(), None);
}

#[tokio::test]
async fn test_day_listing_skips_cancelled_reservations() {
    let server = MockServer::start().await;
    let booked = sample();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", booked.doctor_id)))
        .and(query_param("appointment_date", "eq.2025-01-10"))
        .and(query_param("status", "neq.CANCELLED"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([booked])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let rows = store.list_for_doctor_on(booked.doctor_id, date()).await.unwrap();
    assert_eq!(rows, vec![booked]);
}
