use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Day of the week as stored in availability rows: 0 = Sunday .. 6 = Saturday.
/// Display names are derived, never stored alongside the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    pub fn number(self) -> u8 {
        match self {
            Weekday::Sunday => 0,
            Weekday::Monday => 1,
            Weekday::Tuesday => 2,
            Weekday::Wednesday => 3,
            Weekday::Thursday => 4,
            Weekday::Friday => 5,
            Weekday::Saturday => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Weekday::Sunday => "Sunday",
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        match date.weekday().num_days_from_sunday() {
            0 => Weekday::Sunday,
            1 => Weekday::Monday,
            2 => Weekday::Tuesday,
            3 => Weekday::Wednesday,
            4 => Weekday::Thursday,
            5 => Weekday::Friday,
            _ => Weekday::Saturday,
        }
    }
}

impl TryFrom<u8> for Weekday {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Weekday::Sunday),
            1 => Ok(Weekday::Monday),
            2 => Ok(Weekday::Tuesday),
            3 => Ok(Weekday::Wednesday),
            4 => Ok(Weekday::Thursday),
            5 => Ok(Weekday::Friday),
            6 => Ok(Weekday::Saturday),
            other => Err(format!("Day of week must be 0-6, got {}", other)),
        }
    }
}

impl From<Weekday> for u8 {
    fn from(day: Weekday) -> u8 {
        day.number()
    }
}

impl std::fmt::Display for Weekday {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub full_name: String,
    pub specialty: Option<String>,
    pub is_active: bool,
    pub consultation_fee: Option<f64>,
    pub follow_up_fee: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One recurring weekly window during which a doctor can be booked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorAvailability {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i32,
    pub max_patients_per_slot: i32,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Inclusive date range during which a doctor is entirely unavailable,
/// overriding every weekly window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorLeave {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAvailabilityRequest {
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i32,
    pub max_patients_per_slot: Option<i32>,
}

/// Partial update for an availability window. Absent fields keep their
/// stored values; the merged result is validated like a fresh create.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub day_of_week: Option<Weekday>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub slot_duration_minutes: Option<i32>,
    pub max_patients_per_slot: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLeaveRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
}

/// One bookable slot with its current occupancy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub time: NaiveTime,
    pub end_time: NaiveTime,
    pub booked_count: i64,
    pub max_patients: i32,
    pub is_available: bool,
}

/// The expanded schedule for one doctor on one calendar date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotListing {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub day_of_week: Weekday,
    pub is_on_leave: bool,
    pub leave_reason: Option<String>,
    pub is_available: bool,
    pub total_slots: usize,
    pub available_slots: usize,
    pub booked_slots: usize,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DoctorError {
    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Doctor is not active")]
    DoctorInactive,

    #[error("Availability window not found")]
    AvailabilityNotFound,

    #[error("Leave record not found")]
    LeaveNotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Overlaps existing window on {day} {start}-{end}")]
    OverlappingWindow {
        day: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    },

    #[error("Window has {count} upcoming appointment(s); deactivate it instead")]
    BlockedByAppointments { count: usize },

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<DoctorError> for shared_models::error::AppError {
    fn from(err: DoctorError) -> Self {
        use shared_models::error::AppError;
        match &err {
            DoctorError::DoctorNotFound
            | DoctorError::AvailabilityNotFound
            | DoctorError::LeaveNotFound => AppError::NotFound(err.to_string()),
            DoctorError::DoctorInactive => AppError::BadRequest(err.to_string()),
            DoctorError::ValidationError(_) => AppError::ValidationError(err.to_string()),
            DoctorError::OverlappingWindow { .. } => AppError::Conflict(err.to_string()),
            DoctorError::BlockedByAppointments { .. } => {
                AppError::BlockedByDependents(err.to_string())
            }
            DoctorError::DatabaseError(_) => AppError::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_numbers_round_trip() {
        for n in 0u8..=6 {
            let day = Weekday::try_from(n).unwrap();
            assert_eq!(day.number(), n);
        }
        assert!(Weekday::try_from(7).is_err());
    }

    #[test]
    fn weekday_from_date_uses_sunday_zero() {
        // 2025-06-01 is a Sunday.
        let sunday = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(Weekday::from_date(sunday), Weekday::Sunday);
        assert_eq!(Weekday::from_date(sunday.succ_opt().unwrap()), Weekday::Monday);
    }

    #[test]
    fn weekday_serde_is_numeric() {
        let day: Weekday = serde_json::from_str("3").unwrap();
        assert_eq!(day, Weekday::Wednesday);
        assert_eq!(serde_json::to_string(&day).unwrap(), "3");
        assert_eq!(day.name(), "Wednesday");
    }
}
