use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{CreateLeaveRequest, DoctorError, DoctorLeave};

pub struct LeaveService {
    supabase: SupabaseClient,
}

impl LeaveService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn list_leaves(
        &self,
        doctor_id: &Uuid,
        auth_token: &str,
    ) -> Result<Vec<DoctorLeave>, DoctorError> {
        let path = format!(
            "/rest/v1/doctor_leaves?doctor_id=eq.{}&is_active=eq.true&order=start_date.asc",
            doctor_id
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| DoctorError::DatabaseError(e.to_string())))
            .collect()
    }

    pub async fn create_leave(
        &self,
        doctor_id: &Uuid,
        request: CreateLeaveRequest,
        auth_token: &str,
    ) -> Result<DoctorLeave, DoctorError> {
        debug!(
            "Creating leave for doctor {}: {} to {}",
            doctor_id, request.start_date, request.end_date
        );

        if request.start_date > request.end_date {
            return Err(DoctorError::ValidationError(
                "Leave start date must not be after end date".to_string(),
            ));
        }
        if request.reason.trim().is_empty() {
            return Err(DoctorError::ValidationError(
                "Leave reason is required".to_string(),
            ));
        }

        let leave_data = json!({
            "doctor_id": doctor_id,
            "start_date": request.start_date,
            "end_date": request.end_date,
            "reason": request.reason.trim(),
            "is_active": true,
            "created_at": Utc::now().to_rfc3339()
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
                "/rest/v1/doctor_leaves",
                Some(auth_token),
                Some(leave_data),
                Some(headers),
            )
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DoctorError::DatabaseError("Failed to create leave".to_string()))?;
        serde_json::from_value(row).map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    /// Soft-cancel a leave so historical records survive.
    pub async fn cancel_leave(
        &self,
        doctor_id: &Uuid,
        leave_id: &Uuid,
        auth_token: &str,
    ) -> Result<DoctorLeave, DoctorError> {
        let path = format!(
            "/rest/v1/doctor_leaves?id=eq.{}&doctor_id=eq.{}",
            leave_id, doctor_id
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "is_active": false })),
                Some(headers),
            )
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let row = rows.into_iter().next().ok_or(DoctorError::LeaveNotFound)?;
        serde_json::from_value(row).map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    /// Active leave covering `date`, if any. Leave overrides every weekly
    /// window, so callers must consult this before availability.
    pub async fn leave_covering(
        &self,
        doctor_id: &Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Option<DoctorLeave>, DoctorError> {
        let path = format!(
            "/rest/v1/doctor_leaves?doctor_id=eq.{}&is_active=eq.true&start_date=lte.{}&end_date=gte.{}&limit=1",
            doctor_id, date, date
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        match rows.into_iter().next() {
            Some(row) => {
                let leave = serde_json::from_value(row)
                    .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
                Ok(Some(leave))
            }
            None => Ok(None),
        }
    }
}
