use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Doctor, DoctorError};

pub struct DoctorService {
    supabase: SupabaseClient,
}

impl DoctorService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn get_doctor(&self, doctor_id: &Uuid, auth_token: &str) -> Result<Doctor, DoctorError> {
        debug!("Fetching doctor: {}", doctor_id);

        let path = format!("/rest/v1/doctors?id=eq.{}&limit=1", doctor_id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let row = rows.into_iter().next().ok_or(DoctorError::DoctorNotFound)?;
        serde_json::from_value(row).map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    /// Resolve a doctor and require them to be bookable.
    pub async fn get_active_doctor(
        &self,
        doctor_id: &Uuid,
        auth_token: &str,
    ) -> Result<Doctor, DoctorError> {
        let doctor = self.get_doctor(doctor_id, auth_token).await?;
        if !doctor.is_active {
            return Err(DoctorError::DoctorInactive);
        }
        Ok(doctor)
    }
}
