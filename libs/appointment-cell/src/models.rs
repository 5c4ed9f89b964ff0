use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use doctor_cell::models::{DoctorError, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Statuses that hold a seat in their slot.
    pub fn occupies_slot(self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    Consultation,
    FollowUp,
}

impl std::fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppointmentType::Consultation => "consultation",
            AppointmentType::FollowUp => "follow_up",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub appointment_type: AppointmentType,
    pub status: AppointmentStatus,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub appointment_type: Option<AppointmentType>,
}

/// Partial reschedule; absent fields keep the stored values. The merged
/// booking is re-validated from scratch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub appointment_date: Option<NaiveDate>,
    pub appointment_time: Option<NaiveTime>,
    pub doctor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentSearchQuery {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Doctor is not active")]
    DoctorInactive,

    #[error("Doctor is on leave: {0}")]
    DoctorOnLeave(String),

    #[error("Doctor is not available on {0}")]
    NotAvailableThatDay(Weekday),

    #[error("Requested time is outside availability hours")]
    OutsideAvailabilityHours,

    #[error("Slot is fully booked")]
    SlotFullyBooked,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cannot transition appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Completed appointments cannot be deleted")]
    CompletedImmutable,

    #[error("Appointment has {count} linked queue entries; cancel through the check-in workflow instead")]
    HasQueueEntries { count: usize },

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<DoctorError> for AppointmentError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::DoctorNotFound => AppointmentError::DoctorNotFound,
            DoctorError::DoctorInactive => AppointmentError::DoctorInactive,
            DoctorError::ValidationError(msg) => AppointmentError::ValidationError(msg),
            DoctorError::DatabaseError(msg) => AppointmentError::DatabaseError(msg),
            other => AppointmentError::DatabaseError(other.to_string()),
        }
    }
}

impl From<AppointmentError> for shared_models::error::AppError {
    fn from(err: AppointmentError) -> Self {
        use shared_models::error::AppError;
        match &err {
            AppointmentError::NotFound | AppointmentError::DoctorNotFound => {
                AppError::NotFound(err.to_string())
            }
            AppointmentError::DoctorInactive
            | AppointmentError::NotAvailableThatDay(_)
            | AppointmentError::OutsideAvailabilityHours
            | AppointmentError::ValidationError(_) => AppError::ValidationError(err.to_string()),
            AppointmentError::DoctorOnLeave(_) => AppError::LeaveConflict(err.to_string()),
            AppointmentError::SlotFullyBooked => AppError::Conflict(err.to_string()),
            AppointmentError::InvalidTransition { .. } | AppointmentError::CompletedImmutable => {
                AppError::InvalidTransition(err.to_string())
            }
            AppointmentError::HasQueueEntries { .. } => {
                AppError::BlockedByDependents(err.to_string())
            }
            AppointmentError::DatabaseError(_) => AppError::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&AppointmentStatus::NoShow).unwrap(),
            "\"no_show\""
        );
        let status: AppointmentStatus = serde_json::from_str("\"scheduled\"").unwrap();
        assert_eq!(status, AppointmentStatus::Scheduled);
    }

    #[test]
    fn only_scheduled_and_confirmed_occupy_slots() {
        assert!(AppointmentStatus::Scheduled.occupies_slot());
        assert!(AppointmentStatus::Confirmed.occupies_slot());
        assert!(!AppointmentStatus::Completed.occupies_slot());
        assert!(!AppointmentStatus::Cancelled.occupies_slot());
        assert!(!AppointmentStatus::NoShow.occupies_slot());
    }
}
