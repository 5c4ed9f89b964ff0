//! Helpers for tests that stand a wiremock server in for Supabase.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use shared_config::{AppConfig, DEFAULT_DELETE_LOOKAHEAD_DAYS};
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            availability_delete_lookahead_days: DEFAULT_DELETE_LOOKAHEAD_DAYS,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }
}

/// Canned Supabase rows matching the engine's table shapes.
pub struct MockRows;

impl MockRows {
    pub fn doctor(id: &Uuid, full_name: &str, is_active: bool) -> Value {
        json!({
            "id": id,
            "full_name": full_name,
            "specialty": "General Medicine",
            "is_active": is_active,
            "consultation_fee": 500.0,
            "follow_up_fee": 300.0,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn availability(
        doctor_id: &Uuid,
        day_of_week: u8,
        start_time: &str,
        end_time: &str,
        slot_duration_minutes: i32,
        max_patients_per_slot: i32,
    ) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "doctor_id": doctor_id,
            "day_of_week": day_of_week,
            "start_time": start_time,
            "end_time": end_time,
            "slot_duration_minutes": slot_duration_minutes,
            "max_patients_per_slot": max_patients_per_slot,
            "is_active": true,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn leave(doctor_id: &Uuid, start_date: NaiveDate, end_date: NaiveDate, reason: &str) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "doctor_id": doctor_id,
            "start_date": start_date,
            "end_date": end_date,
            "reason": reason,
            "is_active": true,
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn appointment(
        patient_id: &Uuid,
        doctor_id: &Uuid,
        date: NaiveDate,
        time: NaiveTime,
        status: &str,
    ) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "appointment_date": date,
            "appointment_time": time.format("%H:%M:%S").to_string(),
            "appointment_type": "consultation",
            "status": status,
            "cancellation_reason": null,
            "cancelled_at": null,
            "confirmed_at": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn queue_entry(
        patient_id: &Uuid,
        doctor_id: &Uuid,
        visit_date: NaiveDate,
        token_number: i32,
        status: &str,
    ) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "appointment_id": null,
            "visit_date": visit_date,
            "token_number": token_number,
            "status": status,
            "checked_in_at": Utc::now().to_rfc3339(),
            "consultation_started_at": null,
            "completed_at": null
        })
    }
}
