// libs/appointment-cell/src/services/scheduling.rs
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{time_of_day, Participant, SchedulingError};
use crate::services::store::AppointmentStore;

/// A time window someone wants to reserve, as received from the caller.
#[derive(Debug, Clone)]
pub struct ProposedSlot {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    /// The reservation being moved, when the slot replaces an existing one.
    pub exclude: Option<Uuid>,
}

/// Validated half-open window `[start, end)` on a single date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWindow {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

pub fn parse_window(start: &str, end: &str) -> Result<(NaiveTime, NaiveTime), SchedulingError> {
    let start_time = time_of_day::parse(start).ok_or_else(|| SchedulingError::InvalidTimeFormat(start.to_string()))?;
    let end_time = time_of_day::parse(end).ok_or_else(|| SchedulingError::InvalidTimeFormat(end.to_string()))?;

    if end_time <= start_time {
        return Err(SchedulingError::EndBeforeStart);
    }

    Ok((start_time, end_time))
}

/// Half-open overlap. Touching endpoints do not collide.
pub fn intervals_overlap(a: (NaiveTime, NaiveTime), b: (NaiveTime, NaiveTime)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Length in minutes of one bookable slot in the availability listing.
pub const SLOT_MINUTES: i64 = 30;

/// Slot starts from `open` in steps of `length`, keeping each slot that fits
/// before `close` and overlaps none of `booked`.
pub fn free_slots(
    open: NaiveTime,
    close: NaiveTime,
    booked: &[(NaiveTime, NaiveTime)],
    length: chrono::Duration,
) -> Vec<NaiveTime> {
    let mut slots = Vec::new();
    let mut start = open;

    loop {
        let (end, wrapped) = start.overflowing_add_signed(length);
        if wrapped != 0 || end > close {
            break;
        }
        if !booked.iter().any(|window| intervals_overlap((start, end), *window)) {
            slots.push(start);
        }
        start = end;
    }

    slots
}

pub struct SchedulingEngine {
    store: Arc<dyn AppointmentStore>,
}

impl SchedulingEngine {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }

    /// Accepts the slot only if neither participant already holds an overlapping
    /// reservation. Checks run in order: format, ordering, patient, doctor.
    pub async fn check(&self, slot: &ProposedSlot) -> Result<SlotWindow, SchedulingError> {
        let (start, end) = parse_window(&slot.start_time, &slot.end_time)?;

        debug!(
            "Checking slot {} {}-{} for patient {} and doctor {}",
            slot.date, slot.start_time, slot.end_time, slot.patient_id, slot.doctor_id
        );

        let patient_hits = self
            .store
            .find_overlapping(Participant::Patient(slot.patient_id), slot.date, start, end, slot.exclude)
            .await?;
        if patient_hits > 0 {
            info!("Patient {} already booked on {} {}-{}", slot.patient_id, slot.date, slot.start_time, slot.end_time);
            return Err(SchedulingError::PatientSlotConflict);
        }

        let doctor_hits = self
            .store
            .find_overlapping(Participant::Doctor(slot.doctor_id), slot.date, start, end, slot.exclude)
            .await?;
        if doctor_hits > 0 {
            info!("Doctor {} already booked on {} {}-{}", slot.doctor_id, slot.date, slot.start_time, slot.end_time);
            return Err(SchedulingError::DoctorSlotConflict);
        }

        Ok(SlotWindow {
            date: slot.date,
            start,
            end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn t(raw: &str) -> NaiveTime {
        time_of_day::parse(raw).unwrap()
    }

    #[test]
    fn test_back_to_back_windows_do_not_overlap() {
        assert!(!intervals_overlap((t("10:00"), t("10:30")), (t("10:30"), t("11:00"))));
        assert!(!intervals_overlap((t("10:30"), t("11:00")), (t("10:00"), t("10:30"))));
    }

    #[test]
    fn test_partial_and_nested_windows_overlap() {
        assert!(intervals_overlap((t("10:00"), t("10:30")), (t("10:15"), t("10:45"))));
        assert!(intervals_overlap((t("09:00"), t("12:00")), (t("10:00"), t("10:30"))));
        assert!(intervals_overlap((t("10:00"), t("10:30")), (t("10:00"), t("10:30"))));
    }

    #[test]
    fn test_free_slots_skip_anything_overlapping_a_booking() {
        let booked = [(t("09:30"), t("10:00")), (t("10:45"), t("11:15"))];
        let slots = free_slots(t("09:00"), t("12:00"), &booked, chrono::Duration::minutes(SLOT_MINUTES));
        assert_eq!(slots, vec![t("09:00"), t("10:00"), t("11:30")]);
    }

    #[test]
    fn test_free_slots_stop_at_closing_and_midnight() {
        let half_hour = chrono::Duration::minutes(SLOT_MINUTES);
        assert_eq!(free_slots(t("09:00"), t("10:15"), &[], half_hour), vec![t("09:00"), t("09:30")]);
        assert_eq!(free_slots(t("23:00"), t("23:59"), &[], half_hour), vec![t("23:00")]);
        assert!(free_slots(t("10:00"), t("10:00"), &[], half_hour).is_empty());
    }

    #[test]
    fn test_parse_window_rejects_bad_input() {
        assert_matches!(parse_window("9am", "10:00"), Err(SchedulingError::InvalidTimeFormat(raw)) if raw == "9am");
        assert_matches!(parse_window("10:00", "25:00"), Err(SchedulingError::InvalidTimeFormat(_)));
        assert_matches!(parse_window("10:00", "10:00"), Err(SchedulingError::EndBeforeStart));
        assert_matches!(parse_window("11:00", "10:00"), Err(SchedulingError::EndBeforeStart));
        assert_eq!(parse_window("10:00", "10:30").unwrap(), (t("10:00"), t("10:30")));
    }
}
