use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    InConsultation,
    Completed,
    Cancelled,
}

impl QueueStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Cancelled)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::InConsultation => "in_consultation",
            QueueStatus::Completed => "completed",
            QueueStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One checked-in visit. Token numbers are unique per doctor and visit
/// date, assigned in check-in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub visit_date: NaiveDate,
    pub token_number: i32,
    pub status: QueueStatus,
    pub checked_in_at: DateTime<Utc>,
    pub consultation_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckInRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    /// Defaults to today.
    pub visit_date: Option<NaiveDate>,
    pub appointment_id: Option<Uuid>,
}

/// Queue entry plus the derived live metrics. Wait and consultation times
/// are computed at read time, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntryView {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub waiting_minutes: Option<i64>,
    pub in_consultation_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub doctor_id: Uuid,
    pub visit_date: NaiveDate,
    pub total_entries: usize,
    pub waiting: usize,
    pub in_consultation: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub average_waiting_minutes: Option<i64>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("Queue entry not found")]
    EntryNotFound,

    #[error("Cannot transition queue entry from {from} to {to}")]
    InvalidTransition { from: QueueStatus, to: QueueStatus },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<QueueError> for shared_models::error::AppError {
    fn from(err: QueueError) -> Self {
        use shared_models::error::AppError;
        match &err {
            QueueError::EntryNotFound => AppError::NotFound(err.to_string()),
            QueueError::InvalidTransition { .. } => AppError::InvalidTransition(err.to_string()),
            QueueError::ValidationError(_) => AppError::ValidationError(err.to_string()),
            QueueError::DatabaseError(_) => AppError::Database(err.to_string()),
        }
    }
}
