// libs/appointment-cell/src/services/store.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::{DatabaseError, SupabaseClient};

use crate::models::{time_of_day, Appointment, Participant, StoreError};

const APPOINTMENTS: &str = "/rest/v1/appointments";
const SCHEDULING_LOCKS: &str = "/rest/v1/scheduling_locks";
const WORKING_HOURS: &str = "/rest/v1/doctor_working_hours";

#[derive(Debug, Deserialize)]
struct WorkingHoursRow {
    #[serde(with = "time_of_day")]
    start_time: NaiveTime,
    #[serde(with = "time_of_day")]
    end_time: NaiveTime,
}

/// The relational source of truth for reservations, plus the lock rows that
/// serialize check-then-write sequences.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Counts non-cancelled reservations of `who` on `date` overlapping `[start, end)`.
    async fn find_overlapping(
        &self,
        who: Participant,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        exclude: Option<Uuid>,
    ) -> Result<u64, StoreError>;

    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, StoreError>;

    async fn update(&self, appointment: &Appointment) -> Result<Option<Appointment>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Newest first: date descending, then start time descending.
    async fn list(&self, who: Participant, limit: u32, offset: u32) -> Result<Vec<Appointment>, StoreError>;

    /// Every reservation, same order as [`list`](Self::list).
    async fn list_all(&self, limit: u32, offset: u32) -> Result<Vec<Appointment>, StoreError>;

    /// Non-cancelled reservations of the doctor on `date`.
    async fn list_for_doctor_on(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, StoreError>;

    /// Active opening window of the doctor on `weekday` (0 = Sunday).
    async fn working_hours(&self, doctor_id: Uuid, weekday: u32) -> Result<Option<(NaiveTime, NaiveTime)>, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Claims `key` for `owner` until `ttl` elapses. Returns false while someone else holds it.
    async fn try_acquire_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn release_lock(&self, key: &str, owner: &str) -> Result<(), StoreError>;
}

// ==============================================================================
// SUPABASE (POSTGREST) STORE
// ==============================================================================

pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn single(mut rows: Vec<Appointment>) -> Option<Appointment> {
        if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        }
    }

    async fn insert_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(30));
        let body = json!({
            "lock_key": key,
            "owner": owner,
            "acquired_at": now.to_rfc3339(),
            "expires_at": expires_at.to_rfc3339(),
        });

        match self
            .supabase
            .request::<Value>(Method::POST, SCHEDULING_LOCKS, Some(body))
            .await
        {
            Ok(_) => Ok(true),
            Err(DatabaseError::Conflict(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn find_overlapping(
        &self,
        who: Participant,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        exclude: Option<Uuid>,
    ) -> Result<u64, StoreError> {
        let mut path = format!(
            "{}?select=id&{}=eq.{}&appointment_date=eq.{}&status=neq.CANCELLED&start_time=lt.{}&end_time=gt.{}",
            APPOINTMENTS,
            who.column(),
            who.id(),
            date,
            time_of_day::format(&end),
            time_of_day::format(&start),
        );
        if let Some(id) = exclude {
            path.push_str(&format!("&id=neq.{}", id));
        }

        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None).await?;
        debug!("{} overlapping reservations for {} {}", rows.len(), who.kind(), who.id());
        Ok(rows.len() as u64)
    }

    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, StoreError> {
        let body = serde_json::to_value(appointment).map_err(|e| StoreError::Decode(e.to_string()))?;
        let rows: Vec<Appointment> = self
            .supabase
            .request(Method::POST, APPOINTMENTS, Some(body))
            .await?;

        Self::single(rows).ok_or_else(|| StoreError::Decode("insert returned no rows".to_string()))
    }

    async fn update(&self, appointment: &Appointment) -> Result<Option<Appointment>, StoreError> {
        let body = json!({
            "appointment_date": appointment.appointment_date,
            "start_time": time_of_day::format(&appointment.start_time),
            "end_time": time_of_day::format(&appointment.end_time),
            "mode": appointment.mode,
            "status": appointment.status,
            "notes": appointment.notes,
            "location": appointment.location,
            "updated_at": appointment.updated_at.to_rfc3339(),
        });

        let path = format!("{}?id=eq.{}", APPOINTMENTS, appointment.id);
        let rows: Vec<Appointment> = self.supabase.request(Method::PATCH, &path, Some(body)).await?;
        Ok(Self::single(rows))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let path = format!("{}?id=eq.{}&select=*", APPOINTMENTS, id);
        let rows: Vec<Appointment> = self.supabase.request(Method::GET, &path, None).await?;
        Ok(Self::single(rows))
    }

    async fn list(&self, who: Participant, limit: u32, offset: u32) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "{}?{}=eq.{}&select=*&order=appointment_date.desc,start_time.desc&limit={}&offset={}",
            APPOINTMENTS,
            who.column(),
            who.id(),
            limit,
            offset
        );
        Ok(self.supabase.request(Method::GET, &path, None).await?)
    }

    async fn list_all(&self, limit: u32, offset: u32) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "{}?select=*&order=appointment_date.desc,start_time.desc&limit={}&offset={}",
            APPOINTMENTS, limit, offset
        );
        Ok(self.supabase.request(Method::GET, &path, None).await?)
    }

    async fn list_for_doctor_on(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "{}?doctor_id=eq.{}&appointment_date=eq.{}&status=neq.CANCELLED&select=*&order=start_time.asc",
            APPOINTMENTS, doctor_id, date
        );
        Ok(self.supabase.request(Method::GET, &path, None).await?)
    }

    async fn working_hours(&self, doctor_id: Uuid, weekday: u32) -> Result<Option<(NaiveTime, NaiveTime)>, StoreError> {
        let path = format!(
            "{}?doctor_id=eq.{}&weekday=eq.{}&is_active=eq.true&select=start_time,end_time&limit=1",
            WORKING_HOURS, doctor_id, weekday
        );
        let rows: Vec<WorkingHoursRow> = self.supabase.request(Method::GET, &path, None).await?;
        Ok(rows.into_iter().next().map(|row| (row.start_time, row.end_time)))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS, id);
        let rows: Option<Vec<Value>> = self.supabase.request(Method::DELETE, &path, None).await?;
        Ok(rows.map(|r| !r.is_empty()).unwrap_or(false))
    }

    async fn try_acquire_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        if self.insert_lock(key, owner, ttl).await? {
            debug!("Scheduling lock acquired: {}", key);
            return Ok(true);
        }

        // Held. Clear it only if it has expired, then try exactly once more.
        let path = format!(
            "{}?lock_key=eq.{}&expires_at=lt.{}",
            SCHEDULING_LOCKS,
            key,
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
        );
        let cleared: Option<Vec<Value>> = self.supabase.request(Method::DELETE, &path, None).await?;
        if cleared.map(|rows| rows.is_empty()).unwrap_or(true) {
            return Ok(false);
        }

        warn!("Cleared expired scheduling lock {}", key);
        self.insert_lock(key, owner, ttl).await
    }

    async fn release_lock(&self, key: &str, owner: &str) -> Result<(), StoreError> {
        let path = format!("{}?lock_key=eq.{}&owner=eq.{}", SCHEDULING_LOCKS, key, owner);
        let _: Option<Vec<Value>> = self.supabase.request(Method::DELETE, &path, None).await?;
        debug!("Scheduling lock released: {}", key);
        Ok(())
    }
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

/// Process-local store. `latency` is slept inside the overlap query, widening
/// the gap between a conflict check and the write that follows it.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: Mutex<Vec<Appointment>>,
    locks: Mutex<HashMap<String, (String, Instant)>>,
    hours: Mutex<HashMap<(Uuid, u32), (NaiveTime, NaiveTime)>>,
    latency: Duration,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, Vec<Appointment>> {
        match self.appointments.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>> {
        match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_working_hours(&self, doctor_id: Uuid, weekday: u32, open: NaiveTime, close: NaiveTime) {
        let mut hours = match self.hours.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        hours.insert((doctor_id, weekday), (open, close));
    }

    pub fn snapshot(&self) -> Vec<Appointment> {
        self.rows().clone()
    }

    pub fn held_locks(&self) -> Vec<String> {
        let now = Instant::now();
        self.lock_table()
            .iter()
            .filter(|(_, (_, expires))| *expires > now)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

fn newest_first(rows: &mut [Appointment]) {
    rows.sort_by(|a, b| {
        b.appointment_date
            .cmp(&a.appointment_date)
            .then(b.start_time.cmp(&a.start_time))
    });
}

fn belongs_to(appointment: &Appointment, who: Participant) -> bool {
    match who {
        Participant::Patient(id) => appointment.patient_id == id,
        Participant::Doctor(id) => appointment.doctor_id == id,
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn find_overlapping(
        &self,
        who: Participant,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        exclude: Option<Uuid>,
    ) -> Result<u64, StoreError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let count = self
            .rows()
            .iter()
            .filter(|a| belongs_to(a, who))
            .filter(|a| a.appointment_date == date)
            .filter(|a| a.status.holds_slot())
            .filter(|a| Some(a.id) != exclude)
            .filter(|a| a.start_time < end && a.end_time > start)
            .count();
        Ok(count as u64)
    }

    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, StoreError> {
        let mut rows = self.rows();
        if rows.iter().any(|a| a.id == appointment.id) {
            return Err(StoreError::Duplicate(format!("appointment {} exists", appointment.id)));
        }
        rows.push(appointment.clone());
        Ok(appointment.clone())
    }

    async fn update(&self, appointment: &Appointment) -> Result<Option<Appointment>, StoreError> {
        let mut rows = self.rows();
        match rows.iter_mut().find(|a| a.id == appointment.id) {
            Some(existing) => {
                *existing = appointment.clone();
                Ok(Some(appointment.clone()))
            }
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.rows().iter().find(|a| a.id == id).cloned())
    }

    async fn list(&self, who: Participant, limit: u32, offset: u32) -> Result<Vec<Appointment>, StoreError> {
        let mut matching: Vec<Appointment> = self
            .rows()
            .iter()
            .filter(|a| belongs_to(a, who))
            .cloned()
            .collect();
        newest_first(&mut matching);

        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn list_all(&self, limit: u32, offset: u32) -> Result<Vec<Appointment>, StoreError> {
        let mut rows = self.snapshot();
        newest_first(&mut rows);
        Ok(rows.into_iter().skip(offset as usize).take(limit as usize).collect())
    }

    async fn list_for_doctor_on(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        let mut rows: Vec<Appointment> = self
            .rows()
            .iter()
            .filter(|a| a.doctor_id == doctor_id && a.appointment_date == date && a.status.holds_slot())
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.start_time);
        Ok(rows)
    }

    async fn working_hours(&self, doctor_id: Uuid, weekday: u32) -> Result<Option<(NaiveTime, NaiveTime)>, StoreError> {
        let hours = match self.hours.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(hours.get(&(doctor_id, weekday)).copied())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut rows = self.rows();
        let before = rows.len();
        rows.retain(|a| a.id != id);
        Ok(rows.len() != before)
    }

    async fn try_acquire_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut locks = self.lock_table();
        match locks.get(key) {
            Some((_, expires)) if *expires > now => Ok(false),
            _ => {
                locks.insert(key.to_string(), (owner.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &str, owner: &str) -> Result<(), StoreError> {
        let mut locks = self.lock_table();
        if locks.get(key).map(|(holder, _)| holder == owner).unwrap_or(false) {
            locks.remove(key);
        }
        Ok(())
    }
}
