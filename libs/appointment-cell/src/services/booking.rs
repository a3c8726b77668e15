// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use booking_queue_cell::{
    AppointmentEvent, AppointmentNoticePayload, CreateAppointmentPayload, Job, JobProducer, APPOINTMENTS_QUEUE,
};
use performance_cell::{CacheKey, CacheService};
use shared_models::auth::{Role, User};

use crate::models::{
    time_of_day, Appointment, AppointmentError, AppointmentPage, AppointmentStatus, AvailableSlots,
    CreateAppointmentRequest, Pagination, Participant, QueuedBooking, RescheduleAppointmentRequest, StoreError,
    UpdateAppointmentRequest,
};
use crate::services::lifecycle::{ensure_cancellable, ensure_editable, ensure_reschedulable, validate_status_change};
use crate::services::scheduling::{free_slots, parse_window, ProposedSlot, SchedulingEngine, SLOT_MINUTES};
use crate::services::store::AppointmentStore;

const ENTITY: &str = "appointment";
const SCHEDULE_ENTITY: &str = "doctorSchedule";
/// Selector and selector id of the unfiltered administrative listing.
const ALL: &str = "all";
const LOCK_ATTEMPTS: u32 = 3;
const LOCK_BACKOFF: Duration = Duration::from_millis(100);

/// Scheduling locks held for one check-then-write sequence.
///
/// Dropped without [`release`](Self::release), for example when a client
/// disconnects or a job times out mid-write, the guard hands whatever it still
/// holds to a background task instead of leaving it for the TTL.
struct SlotLocks {
    store: Arc<dyn AppointmentStore>,
    keys: Vec<String>,
    owner: String,
}

impl SlotLocks {
    fn new(store: Arc<dyn AppointmentStore>, owner: String) -> Self {
        Self {
            store,
            keys: Vec::new(),
            owner,
        }
    }

    /// Releases in reverse acquisition order. A key leaves the guard only once
    /// its release has completed.
    async fn release(mut self) {
        while let Some(key) = self.keys.last() {
            if let Err(e) = self.store.release_lock(key, &self.owner).await {
                warn!("Failed to release slot lock {}, it will expire: {}", key, e);
            }
            self.keys.pop();
        }
    }
}

impl Drop for SlotLocks {
    fn drop(&mut self) {
        if self.keys.is_empty() {
            return;
        }

        let store = self.store.clone();
        let keys = std::mem::take(&mut self.keys);
        let owner = std::mem::take(&mut self.owner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Slot locks {:?} abandoned mid-operation, releasing in background", keys);
                handle.spawn(async move {
                    for key in keys.iter().rev() {
                        if let Err(e) = store.release_lock(key, &owner).await {
                            warn!("Failed to release abandoned slot lock {}, it will expire: {}", key, e);
                        }
                    }
                });
            }
            Err(_) => warn!("No runtime to release slot locks {:?}, they will expire", keys),
        }
    }
}

fn schedule_key(doctor_id: Uuid, date: NaiveDate) -> String {
    CacheKey::entity(SCHEDULE_ENTITY, &format!("{}:{}", doctor_id, date))
}

/// Lock keys for both participants on `date`, sorted so every caller acquires
/// them in the same order.
fn slot_lock_keys(patient_id: Uuid, doctor_id: Uuid, date: NaiveDate) -> Vec<String> {
    let mut keys = vec![
        format!("doctor:{}:{}", doctor_id, date),
        format!("patient:{}:{}", patient_id, date),
    ];
    keys.sort();
    keys.dedup();
    keys
}

fn can_view(actor: &User, appointment: &Appointment) -> bool {
    actor.is_admin() || actor.is(appointment.patient_id) || actor.is(appointment.doctor_id)
}

/// Orchestrates conflict check, store write, cache invalidation and job dispatch
/// for every appointment operation.
pub struct BookingService {
    store: Arc<dyn AppointmentStore>,
    engine: SchedulingEngine,
    cache: Arc<CacheService>,
    producer: Option<JobProducer>,
    lock_ttl: Duration,
}

impl BookingService {
    pub fn new(store: Arc<dyn AppointmentStore>, cache: Arc<CacheService>, lock_ttl: Duration) -> Self {
        Self {
            engine: SchedulingEngine::new(store.clone()),
            store,
            cache,
            producer: None,
            lock_ttl,
        }
    }

    /// Without a producer, asynchronous booking is unavailable and notices are skipped.
    pub fn with_producer(mut self, producer: JobProducer) -> Self {
        self.producer = Some(producer);
        self
    }

    // ==========================================================================
    // CREATE
    // ==========================================================================

    #[instrument(skip(self, actor, request), fields(actor = %actor.id))]
    pub async fn create(&self, actor: &User, request: CreateAppointmentRequest) -> Result<Appointment, AppointmentError> {
        let patient_id = self.resolve_patient(actor, request.patient_id)?;
        let (start_time, end_time) = parse_window(&request.start_time, &request.end_time)?;

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id: request.doctor_id,
            appointment_date: request.appointment_date,
            start_time,
            end_time,
            mode: request.mode,
            appointment_type: request.appointment_type,
            status: AppointmentStatus::Pending,
            notes: request.notes,
            location: None,
            created_at: now,
            updated_at: now,
        };

        let created = self.insert_checked(appointment).await?;
        info!("Appointment {} booked for patient {} with doctor {}", created.id, created.patient_id, created.doctor_id);

        self.invalidate(&created, None).await;
        self.notify(&created, AppointmentEvent::Created).await;
        Ok(created)
    }

    /// Validates and hands the booking to the appointments queue. The id is fixed
    /// here so a redelivered job cannot insert a second row.
    #[instrument(skip(self, actor, request), fields(actor = %actor.id))]
    pub async fn enqueue_create(
        &self,
        actor: &User,
        request: CreateAppointmentRequest,
    ) -> Result<QueuedBooking, AppointmentError> {
        let patient_id = self.resolve_patient(actor, request.patient_id)?;
        parse_window(&request.start_time, &request.end_time)?;

        let producer = self
            .producer
            .as_ref()
            .ok_or_else(|| AppointmentError::QueueUnavailable("no job producer configured".to_string()))?;

        let payload = CreateAppointmentPayload {
            appointment_id: Uuid::new_v4(),
            patient_id,
            doctor_id: request.doctor_id,
            date: request.appointment_date,
            start_time: request.start_time,
            end_time: request.end_time,
            mode: request.mode,
            appointment_type: request.appointment_type,
            notes: request.notes,
        };
        let appointment_id = payload.appointment_id;

        let envelope = producer
            .enqueue_on(APPOINTMENTS_QUEUE, Job::CreateAppointment(payload))
            .await?;

        Ok(QueuedBooking {
            job_id: envelope.id,
            appointment_id,
            queue: envelope.queue,
        })
    }

    /// Job side of [`enqueue_create`](Self::enqueue_create). Safe to run repeatedly,
    /// including two deliveries at once: an appointment that already exists under
    /// the payload's id counts as done, and the conflict check never counts that
    /// appointment against itself.
    pub async fn execute_create_job(&self, payload: &CreateAppointmentPayload) -> Result<Appointment, AppointmentError> {
        if let Some(existing) = self.store.find_by_id(payload.appointment_id).await? {
            debug!("Appointment {} already created, skipping", existing.id);
            return Ok(existing);
        }

        let (start_time, end_time) = parse_window(&payload.start_time, &payload.end_time)?;
        let now = Utc::now();
        let appointment = Appointment {
            id: payload.appointment_id,
            patient_id: payload.patient_id,
            doctor_id: payload.doctor_id,
            appointment_date: payload.date,
            start_time,
            end_time,
            mode: payload.mode,
            appointment_type: payload.appointment_type,
            status: AppointmentStatus::Pending,
            notes: payload.notes.clone(),
            location: None,
            created_at: now,
            updated_at: now,
        };

        let created = match self.insert_checked(appointment).await {
            Ok(created) => created,
            Err(AppointmentError::Store(StoreError::Duplicate(_))) => {
                return self
                    .store
                    .find_by_id(payload.appointment_id)
                    .await?
                    .ok_or(AppointmentError::NotFound);
            }
            Err(e) => return Err(e),
        };

        info!("Queued appointment {} created", created.id);
        self.invalidate(&created, None).await;
        self.notify(&created, AppointmentEvent::Created).await;
        Ok(created)
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get(&self, actor: &User, id: Uuid) -> Result<Appointment, AppointmentError> {
        let key = CacheKey::entity(ENTITY, &id.to_string());
        let appointment = self.cache.get_or_load(&key, || self.load(id)).await?;

        if !can_view(actor, &appointment) {
            return Err(AppointmentError::Forbidden(
                "Not authorized to view this appointment".to_string(),
            ));
        }
        Ok(appointment)
    }

    pub async fn list(&self, actor: &User, who: Participant, page: Pagination) -> Result<AppointmentPage, AppointmentError> {
        if !actor.is_admin() && !actor.is(who.id()) {
            return Err(AppointmentError::Forbidden(format!(
                "Not authorized to list appointments for this {}",
                who.kind()
            )));
        }

        let key = CacheKey::list(ENTITY, who.kind(), &who.id().to_string(), page.limit, page.offset);
        let appointments = self
            .cache
            .get_or_load(&key, || self.load_page(who, page))
            .await?;

        Ok(AppointmentPage {
            appointments,
            limit: page.limit,
            offset: page.offset,
        })
    }

    /// Every appointment, newest first. Administrators only.
    pub async fn list_all(&self, actor: &User, page: Pagination) -> Result<AppointmentPage, AppointmentError> {
        if !actor.is_admin() {
            return Err(AppointmentError::Forbidden(
                "Only administrators can list all appointments".to_string(),
            ));
        }

        let key = CacheKey::list(ENTITY, ALL, ALL, page.limit, page.offset);
        let appointments = self
            .cache
            .get_or_load(&key, || async {
                Ok::<_, AppointmentError>(self.store.list_all(page.limit, page.offset).await?)
            })
            .await?;

        Ok(AppointmentPage {
            appointments,
            limit: page.limit,
            offset: page.offset,
        })
    }

    /// Free fixed-length slots inside the doctor's working hours for `date`.
    /// Cached per doctor and date; every write touching that day drops the entry.
    pub async fn available_slots(&self, doctor_id: Uuid, date: NaiveDate) -> Result<AvailableSlots, AppointmentError> {
        let key = schedule_key(doctor_id, date);
        self.cache
            .get_or_load(&key, || self.load_slots(doctor_id, date))
            .await
    }

    // ==========================================================================
    // MUTATIONS
    // ==========================================================================

    #[instrument(skip(self, actor, request), fields(actor = %actor.id))]
    pub async fn update(
        &self,
        actor: &User,
        id: Uuid,
        request: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let existing = self.load(id).await?;
        if !can_view(actor, &existing) {
            return Err(AppointmentError::Forbidden(
                "Not authorized to update this appointment".to_string(),
            ));
        }
        if request.location.is_some() && actor.role == Role::Patient {
            return Err(AppointmentError::Forbidden(
                "Only doctors and administrators can set the location".to_string(),
            ));
        }
        ensure_editable(existing.status)?;
        if request.touches_time() {
            ensure_reschedulable(existing.status)?;
        }

        let mut updated = existing.clone();
        if let Some(mode) = request.mode {
            updated.mode = mode;
        }
        if request.notes.is_some() {
            updated.notes = request.notes.clone();
        }
        if request.location.is_some() {
            updated.location = request.location.clone();
        }
        updated.updated_at = Utc::now();

        let saved = if request.touches_time() {
            let start = request
                .start_time
                .clone()
                .unwrap_or_else(|| time_of_day::format(&existing.start_time));
            let end = request
                .end_time
                .clone()
                .unwrap_or_else(|| time_of_day::format(&existing.end_time));
            let (start_time, end_time) = parse_window(&start, &end)?;
            updated.start_time = start_time;
            updated.end_time = end_time;

            self.update_checked(updated).await?
        } else {
            self.store.update(&updated).await?.ok_or(AppointmentError::NotFound)?
        };

        self.invalidate(&saved, Some(existing.appointment_date)).await;
        if saved.start_time != existing.start_time || saved.end_time != existing.end_time {
            self.notify(&saved, AppointmentEvent::Updated).await;
        }
        Ok(saved)
    }

    #[instrument(skip(self, actor, request), fields(actor = %actor.id))]
    pub async fn reschedule(
        &self,
        actor: &User,
        id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let existing = self.load(id).await?;
        if !can_view(actor, &existing) {
            return Err(AppointmentError::Forbidden(
                "Not authorized to reschedule this appointment".to_string(),
            ));
        }
        ensure_reschedulable(existing.status)?;

        let (start_time, end_time) = parse_window(&request.start_time, &request.end_time)?;
        let mut moved = existing.clone();
        moved.appointment_date = request.date;
        moved.start_time = start_time;
        moved.end_time = end_time;
        moved.mode = request.mode;
        moved.updated_at = Utc::now();

        let saved = self.update_checked(moved).await?;
        info!(
            "Appointment {} rescheduled from {} to {}",
            saved.id, existing.appointment_date, saved.appointment_date
        );

        self.invalidate(&saved, Some(existing.appointment_date)).await;
        self.notify(&saved, AppointmentEvent::Rescheduled).await;
        Ok(saved)
    }

    /// Administrative status override. The time window is untouched, so no
    /// conflict check runs.
    pub async fn change_status(
        &self,
        actor: &User,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        if !actor.is_admin() {
            return Err(AppointmentError::Forbidden(
                "Only administrators can change appointment status".to_string(),
            ));
        }

        let existing = self.load(id).await?;
        validate_status_change(existing.status, status)?;

        let saved = self.write_status(existing, status).await?;
        let event = if status == AppointmentStatus::Cancelled {
            AppointmentEvent::Cancelled
        } else {
            AppointmentEvent::StatusChanged
        };
        self.notify(&saved, event).await;
        Ok(saved)
    }

    pub async fn cancel(&self, actor: &User, id: Uuid) -> Result<Appointment, AppointmentError> {
        let existing = self.load(id).await?;
        if !actor.is_admin() && !actor.is(existing.patient_id) {
            return Err(AppointmentError::Forbidden(
                "Only the patient or an administrator can cancel this appointment".to_string(),
            ));
        }
        ensure_cancellable(existing.status)?;

        let saved = self.write_status(existing, AppointmentStatus::Cancelled).await?;
        info!("Appointment {} cancelled by {}", saved.id, actor.id);
        self.notify(&saved, AppointmentEvent::Cancelled).await;
        Ok(saved)
    }

    pub async fn delete(&self, actor: &User, id: Uuid) -> Result<(), AppointmentError> {
        if !actor.is_admin() {
            return Err(AppointmentError::Forbidden(
                "Only administrators can delete appointments".to_string(),
            ));
        }

        let existing = self.load(id).await?;
        if !self.store.delete(id).await? {
            return Err(AppointmentError::NotFound);
        }

        warn!("Appointment {} permanently deleted by {}", id, actor.id);
        self.invalidate(&existing, None).await;
        Ok(())
    }

    // ==========================================================================
    // INTERNALS
    // ==========================================================================

    fn resolve_patient(&self, actor: &User, requested: Option<Uuid>) -> Result<Uuid, AppointmentError> {
        let patient_id = requested.unwrap_or(actor.id);
        if patient_id != actor.id && !actor.is_admin() {
            return Err(AppointmentError::Forbidden(
                "Cannot book appointments for another patient".to_string(),
            ));
        }
        Ok(patient_id)
    }

    async fn load(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store.find_by_id(id).await?.ok_or(AppointmentError::NotFound)
    }

    async fn load_page(&self, who: Participant, page: Pagination) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self.store.list(who, page.limit, page.offset).await?)
    }

    async fn load_slots(&self, doctor_id: Uuid, date: NaiveDate) -> Result<AvailableSlots, AppointmentError> {
        let weekday = date.weekday().num_days_from_sunday();
        let slots = match self.store.working_hours(doctor_id, weekday).await? {
            Some((open, close)) => {
                let booked: Vec<_> = self
                    .store
                    .list_for_doctor_on(doctor_id, date)
                    .await?
                    .iter()
                    .map(|a| (a.start_time, a.end_time))
                    .collect();
                free_slots(open, close, &booked, chrono::Duration::minutes(SLOT_MINUTES))
                    .iter()
                    .map(time_of_day::format)
                    .collect()
            }
            None => Vec::new(),
        };

        Ok(AvailableSlots { doctor_id, date, slots })
    }

    fn proposed(appointment: &Appointment, exclude: Option<Uuid>) -> ProposedSlot {
        ProposedSlot {
            patient_id: appointment.patient_id,
            doctor_id: appointment.doctor_id,
            date: appointment.appointment_date,
            start_time: time_of_day::format(&appointment.start_time),
            end_time: time_of_day::format(&appointment.end_time),
            exclude,
        }
    }

    /// The new row's own id is excluded from the check, so a redelivered create
    /// job that lost the race to its twin reaches the insert and sees the duplicate.
    async fn insert_checked(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let locks = self
            .acquire_slot_locks(appointment.patient_id, appointment.doctor_id, appointment.appointment_date)
            .await?;

        let result: Result<Appointment, AppointmentError> = async {
            self.engine
                .check(&Self::proposed(&appointment, Some(appointment.id)))
                .await?;
            Ok::<_, AppointmentError>(self.store.insert(&appointment).await?)
        }
        .await;

        locks.release().await;
        result
    }

    async fn update_checked(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let locks = self
            .acquire_slot_locks(appointment.patient_id, appointment.doctor_id, appointment.appointment_date)
            .await?;

        let result: Result<Appointment, AppointmentError> = async {
            self.engine
                .check(&Self::proposed(&appointment, Some(appointment.id)))
                .await?;
            self.store.update(&appointment).await?.ok_or(AppointmentError::NotFound)
        }
        .await;

        locks.release().await;
        result
    }

    async fn write_status(&self, mut appointment: Appointment, status: AppointmentStatus) -> Result<Appointment, AppointmentError> {
        appointment.status = status;
        appointment.updated_at = Utc::now();

        let saved = self.store.update(&appointment).await?.ok_or(AppointmentError::NotFound)?;
        self.invalidate(&saved, None).await;
        Ok(saved)
    }

    async fn acquire_slot_locks(
        &self,
        patient_id: Uuid,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<SlotLocks, AppointmentError> {
        let keys = slot_lock_keys(patient_id, doctor_id, date);
        let owner = Uuid::new_v4().to_string();

        for attempt in 1..=LOCK_ATTEMPTS {
            let mut locks = SlotLocks::new(self.store.clone(), owner.clone());
            for key in &keys {
                match self.store.try_acquire_lock(key, &owner, self.lock_ttl).await {
                    Ok(true) => locks.keys.push(key.clone()),
                    Ok(false) => break,
                    Err(e) => {
                        locks.release().await;
                        return Err(e.into());
                    }
                }
            }

            if locks.keys.len() == keys.len() {
                return Ok(locks);
            }
            locks.release().await;

            if attempt < LOCK_ATTEMPTS {
                debug!("Slot locks busy for {} (attempt {}), backing off", date, attempt);
                tokio::time::sleep(LOCK_BACKOFF * attempt).await;
            }
        }

        warn!("Gave up waiting for slot locks on {} for doctor {}", date, doctor_id);
        Err(AppointmentError::SlotBusy)
    }

    /// Drops every cached view the appointment appears in. `previous_date` is the
    /// day it occupied before a move; both days' schedules change.
    async fn invalidate(&self, appointment: &Appointment, previous_date: Option<NaiveDate>) {
        self.cache
            .invalidate_entity(
                ENTITY,
                &appointment.id.to_string(),
                &[
                    ("doctor", appointment.doctor_id.to_string()),
                    ("patient", appointment.patient_id.to_string()),
                    (ALL, ALL.to_string()),
                ],
            )
            .await;

        self.cache
            .invalidate_key(&schedule_key(appointment.doctor_id, appointment.appointment_date))
            .await;
        if let Some(previous) = previous_date.filter(|d| *d != appointment.appointment_date) {
            self.cache
                .invalidate_key(&schedule_key(appointment.doctor_id, previous))
                .await;
        }
    }

    /// Best effort: a notice that cannot be queued is logged and dropped.
    async fn notify(&self, appointment: &Appointment, event: AppointmentEvent) {
        let Some(producer) = &self.producer else {
            return;
        };

        let notice = AppointmentNoticePayload {
            appointment_id: appointment.id,
            patient_id: appointment.patient_id,
            doctor_id: appointment.doctor_id,
            event,
            status: appointment.status.to_string(),
            date: appointment.appointment_date,
            start_time: time_of_day::format(&appointment.start_time),
        };

        if let Err(e) = producer.enqueue(Job::AppointmentNotice(notice)).await {
            warn!("Could not queue notice for appointment {}: {}", appointment.id, e);
        }
    }
}
