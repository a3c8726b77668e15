// libs/appointment-cell/src/services/lifecycle.rs
use crate::models::{AppointmentError, AppointmentStatus};

/// Only reservations nobody has acted on yet may move to a new date.
pub fn ensure_reschedulable(status: AppointmentStatus) -> Result<(), AppointmentError> {
    if status == AppointmentStatus::Pending {
        Ok(())
    } else {
        Err(AppointmentError::NotReschedulable(status))
    }
}

pub fn ensure_cancellable(status: AppointmentStatus) -> Result<(), AppointmentError> {
    if status.is_terminal() {
        return Err(AppointmentError::InvalidStatusTransition {
            from: status,
            to: AppointmentStatus::Cancelled,
        });
    }
    Ok(())
}

/// Time and detail edits are refused once the appointment is finished or cancelled.
pub fn ensure_editable(status: AppointmentStatus) -> Result<(), AppointmentError> {
    if status.is_terminal() {
        return Err(AppointmentError::Validation(format!(
            "appointment is {} and can no longer be edited",
            status
        )));
    }
    Ok(())
}

/// PENDING -> CONFIRMED -> COMPLETED, with CANCELLED reachable from either
/// non-terminal state. Re-asserting the current status is accepted.
pub fn validate_status_change(from: AppointmentStatus, to: AppointmentStatus) -> Result<(), AppointmentError> {
    if to == AppointmentStatus::Pending {
        return Err(AppointmentError::Validation(
            "status can only be set to CONFIRMED, COMPLETED or CANCELLED".to_string(),
        ));
    }

    if from == to && !from.is_terminal() {
        return Ok(());
    }

    if from.is_terminal() {
        return Err(AppointmentError::InvalidStatusTransition { from, to });
    }

    Ok(())
}
