use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::locks::{queue_lock_key, KeyedLockRegistry};

use crate::models::{
    CheckInRequest, QueueEntry, QueueEntryView, QueueError, QueueStats, QueueStatus,
};

/// Legal moves in the visit state machine. Completed and Cancelled are
/// terminal; cancellation is only possible before the consultation starts.
pub fn valid_transitions(from: QueueStatus) -> Vec<QueueStatus> {
    match from {
        QueueStatus::Waiting => vec![QueueStatus::InConsultation, QueueStatus::Cancelled],
        QueueStatus::InConsultation => vec![QueueStatus::Completed],
        QueueStatus::Completed | QueueStatus::Cancelled => vec![],
    }
}

pub fn validate_transition(from: QueueStatus, to: QueueStatus) -> Result<(), QueueError> {
    if valid_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(QueueError::InvalidTransition { from, to })
    }
}

/// Attach live wait/consultation minutes. Waiting time only ticks while
/// the patient is still waiting; once called in, consultation time ticks
/// instead.
pub fn with_metrics(entry: QueueEntry, now: DateTime<Utc>) -> QueueEntryView {
    let waiting_minutes = match entry.status {
        QueueStatus::Waiting => Some((now - entry.checked_in_at).num_minutes()),
        _ => None,
    };
    let in_consultation_minutes = match (entry.status, entry.consultation_started_at) {
        (QueueStatus::InConsultation, Some(started)) => Some((now - started).num_minutes()),
        _ => None,
    };
    QueueEntryView {
        entry,
        waiting_minutes,
        in_consultation_minutes,
    }
}

pub struct QueueService {
    supabase: SupabaseClient,
}

impl QueueService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Issue the next token for the doctor's queue and create the entry.
    /// The max-token read and the insert run under the queue lock so
    /// concurrent check-ins never share a token.
    pub async fn check_in(
        &self,
        request: CheckInRequest,
        auth_token: &str,
    ) -> Result<QueueEntry, QueueError> {
        let today = Utc::now().date_naive();
        let visit_date = request.visit_date.unwrap_or(today);
        if visit_date < today {
            return Err(QueueError::ValidationError(
                "Cannot check in for a past visit date".to_string(),
            ));
        }

        debug!(
            "Checking in patient {} for doctor {} on {}",
            request.patient_id, request.doctor_id, visit_date
        );

        let lock_key = queue_lock_key(&request.doctor_id, visit_date);
        let _guard = KeyedLockRegistry::global().acquire(&lock_key).await;

        let token_number = self
            .highest_token(&request.doctor_id, visit_date, auth_token)
            .await?
            + 1;

        let entry_data = json!({
            "patient_id": request.patient_id,
            "doctor_id": request.doctor_id,
            "appointment_id": request.appointment_id,
            "visit_date": visit_date,
            "token_number": token_number,
            "status": QueueStatus::Waiting,
            "checked_in_at": Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/opd_queue_entries",
                Some(auth_token),
                Some(entry_data),
                Some(headers),
            )
            .await
            .map_err(|e| QueueError::DatabaseError(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| QueueError::DatabaseError("Failed to create queue entry".to_string()))?;
        let entry: QueueEntry =
            serde_json::from_value(row).map_err(|e| QueueError::DatabaseError(e.to_string()))?;

        info!(
            "Patient checked in with token {} for doctor {}",
            entry.token_number, entry.doctor_id
        );
        Ok(entry)
    }

    /// All entries for one doctor/date in token order, with live metrics.
    pub async fn list_queue(
        &self,
        doctor_id: &Uuid,
        visit_date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<QueueEntryView>, QueueError> {
        let entries = self.fetch_entries(doctor_id, visit_date, auth_token).await?;
        let now = Utc::now();
        Ok(entries.into_iter().map(|e| with_metrics(e, now)).collect())
    }

    pub async fn queue_stats(
        &self,
        doctor_id: &Uuid,
        visit_date: NaiveDate,
        auth_token: &str,
    ) -> Result<QueueStats, QueueError> {
        let entries = self.fetch_entries(doctor_id, visit_date, auth_token).await?;
        let now = Utc::now();

        let waiting: Vec<&QueueEntry> = entries
            .iter()
            .filter(|e| e.status == QueueStatus::Waiting)
            .collect();
        let average_waiting_minutes = if waiting.is_empty() {
            None
        } else {
            let total: i64 = waiting
                .iter()
                .map(|e| (now - e.checked_in_at).num_minutes())
                .sum();
            Some(total / waiting.len() as i64)
        };

        Ok(QueueStats {
            doctor_id: *doctor_id,
            visit_date,
            total_entries: entries.len(),
            waiting: waiting.len(),
            in_consultation: entries
                .iter()
                .filter(|e| e.status == QueueStatus::InConsultation)
                .count(),
            completed: entries
                .iter()
                .filter(|e| e.status == QueueStatus::Completed)
                .count(),
            cancelled: entries
                .iter()
                .filter(|e| e.status == QueueStatus::Cancelled)
                .count(),
            average_waiting_minutes,
        })
    }

    pub async fn start_consultation(
        &self,
        entry_id: &Uuid,
        auth_token: &str,
    ) -> Result<QueueEntry, QueueError> {
        let entry = self.get_entry(entry_id, auth_token).await?;
        validate_transition(entry.status, QueueStatus::InConsultation)?;

        self.patch_entry(
            entry_id,
            json!({
                "status": QueueStatus::InConsultation,
                "consultation_started_at": Utc::now().to_rfc3339()
            }),
            auth_token,
        )
        .await
    }

    pub async fn complete_consultation(
        &self,
        entry_id: &Uuid,
        auth_token: &str,
    ) -> Result<QueueEntry, QueueError> {
        let entry = self.get_entry(entry_id, auth_token).await?;
        validate_transition(entry.status, QueueStatus::Completed)?;

        self.patch_entry(
            entry_id,
            json!({
                "status": QueueStatus::Completed,
                "completed_at": Utc::now().to_rfc3339()
            }),
            auth_token,
        )
        .await
    }

    pub async fn cancel_entry(
        &self,
        entry_id: &Uuid,
        auth_token: &str,
    ) -> Result<QueueEntry, QueueError> {
        let entry = self.get_entry(entry_id, auth_token).await?;
        validate_transition(entry.status, QueueStatus::Cancelled)?;

        self.patch_entry(
            entry_id,
            json!({ "status": QueueStatus::Cancelled }),
            auth_token,
        )
        .await
    }

    pub async fn get_entry(
        &self,
        entry_id: &Uuid,
        auth_token: &str,
    ) -> Result<QueueEntry, QueueError> {
        let path = format!("/rest/v1/opd_queue_entries?id=eq.{}&limit=1", entry_id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| QueueError::DatabaseError(e.to_string()))?;

        let row = rows.into_iter().next().ok_or(QueueError::EntryNotFound)?;
        serde_json::from_value(row).map_err(|e| QueueError::DatabaseError(e.to_string()))
    }

    async fn fetch_entries(
        &self,
        doctor_id: &Uuid,
        visit_date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let path = format!(
            "/rest/v1/opd_queue_entries?doctor_id=eq.{}&visit_date=eq.{}&order=token_number.asc",
            doctor_id, visit_date
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| QueueError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| QueueError::DatabaseError(e.to_string())))
            .collect()
    }

    async fn highest_token(
        &self,
        doctor_id: &Uuid,
        visit_date: NaiveDate,
        auth_token: &str,
    ) -> Result<i32, QueueError> {
        let path = format!(
            "/rest/v1/opd_queue_entries?doctor_id=eq.{}&visit_date=eq.{}&order=token_number.desc&limit=1&select=token_number",
            doctor_id, visit_date
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| QueueError::DatabaseError(e.to_string()))?;

        Ok(rows
            .first()
            .and_then(|row| row.get("token_number"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as i32)
    }

    async fn patch_entry(
        &self,
        entry_id: &Uuid,
        data: Value,
        auth_token: &str,
    ) -> Result<QueueEntry, QueueError> {
        let path = format!("/rest/v1/opd_queue_entries?id=eq.{}", entry_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(data), Some(headers))
            .await
            .map_err(|e| QueueError::DatabaseError(e.to_string()))?;

        let row = rows.into_iter().next().ok_or(QueueError::EntryNotFound)?;
        serde_json::from_value(row).map_err(|e| QueueError::DatabaseError(e.to_string()))
    }
}
