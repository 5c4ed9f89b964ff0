use chrono::{NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use doctor_cell::models::{DoctorAvailability, Weekday};
use doctor_cell::services::{doctor::DoctorService, leave::LeaveService};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::locks::{slot_lock_key, KeyedLockRegistry};

use crate::models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus, AppointmentType,
    BookAppointmentRequest, RescheduleAppointmentRequest,
};
use crate::services::lifecycle::AppointmentLifecycleService;

/// Active window whose `[start,end)` range contains `time`, along with its
/// per-slot capacity. Booking validation step 4.
pub fn find_covering_window(
    windows: &[DoctorAvailability],
    time: NaiveTime,
) -> Option<&DoctorAvailability> {
    windows
        .iter()
        .filter(|w| w.is_active)
        .find(|w| w.start_time <= time && time < w.end_time)
}

pub struct AppointmentBookingService {
    supabase: SupabaseClient,
    doctor_service: DoctorService,
    leave_service: LeaveService,
    lifecycle: AppointmentLifecycleService,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            doctor_service: DoctorService::new(config),
            leave_service: LeaveService::new(config),
            lifecycle: AppointmentLifecycleService::new(),
        }
    }

    /// Validate and commit a new booking. Checks run in a fixed order so
    /// every rejection names the first rule violated.
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!(
            "Booking appointment: patient {} with doctor {} on {} at {}",
            request.patient_id, request.doctor_id, request.appointment_date, request.appointment_time
        );

        let capacity = self
            .validate_booking(
                &request.doctor_id,
                request.appointment_date,
                request.appointment_time,
                auth_token,
            )
            .await?;

        // Count and insert under the slot lock so two concurrent bookings
        // cannot both pass the capacity check.
        let lock_key = slot_lock_key(
            &request.doctor_id,
            request.appointment_date,
            request.appointment_time,
        );
        let _guard = KeyedLockRegistry::global().acquire(&lock_key).await;

        let booked = self
            .count_slot_occupancy(
                &request.doctor_id,
                request.appointment_date,
                request.appointment_time,
                None,
                auth_token,
            )
            .await?;
        if booked >= i64::from(capacity) {
            return Err(AppointmentError::SlotFullyBooked);
        }

        let appointment_type = request.appointment_type.unwrap_or(AppointmentType::Consultation);
        let appointment_data = json!({
            "patient_id": request.patient_id,
            "doctor_id": request.doctor_id,
            "appointment_date": request.appointment_date,
            "appointment_time": request.appointment_time.format("%H:%M:%S").to_string(),
            "appointment_type": appointment_type,
            "status": AppointmentStatus::Scheduled,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let appointment = self.insert_appointment(appointment_data, auth_token).await?;
        info!("Appointment booked: {}", appointment.id);
        Ok(appointment)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: &Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&limit=1", appointment_id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let row = rows.into_iter().next().ok_or(AppointmentError::NotFound)?;
        serde_json::from_value(row).map_err(|e| AppointmentError::DatabaseError(e.to_string()))
    }

    pub async fn search_appointments(
        &self,
        query: &AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut filters = Vec::new();
        if let Some(doctor_id) = &query.doctor_id {
            filters.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(patient_id) = &query.patient_id {
            filters.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(status) = &query.status {
            filters.push(format!("status=eq.{}", urlencoding::encode(&status.to_string())));
        }
        if let Some(from) = &query.date_from {
            filters.push(format!("appointment_date=gte.{}", from));
        }
        if let Some(to) = &query.date_to {
            filters.push(format!("appointment_date=lte.{}", to));
        }

        let limit = query.limit.unwrap_or(50);
        let offset = query.offset.unwrap_or(0);
        let mut path = format!(
            "/rest/v1/appointments?order=appointment_date.asc,appointment_time.asc&limit={}&offset={}",
            limit, offset
        );
        for filter in filters {
            path.push('&');
            path.push_str(&filter);
        }

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| AppointmentError::DatabaseError(e.to_string()))
            })
            .collect()
    }

    /// Move an appointment to a new slot (or doctor). The merged values go
    /// through the whole booking validation again; the appointment's own
    /// seat is excluded from the occupancy count so it cannot conflict
    /// with itself.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: &Uuid,
        request: RescheduleAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(appointment_id, auth_token).await?;
        if !current.status.occupies_slot() {
            return Err(AppointmentError::ValidationError(format!(
                "Cannot reschedule a {} appointment",
                current.status
            )));
        }

        let doctor_id = request.doctor_id.unwrap_or(current.doctor_id);
        let date = request.appointment_date.unwrap_or(current.appointment_date);
        let time = request.appointment_time.unwrap_or(current.appointment_time);

        let capacity = self
            .validate_booking(&doctor_id, date, time, auth_token)
            .await?;

        let lock_key = slot_lock_key(&doctor_id, date, time);
        let _guard = KeyedLockRegistry::global().acquire(&lock_key).await;

        let booked = self
            .count_slot_occupancy(&doctor_id, date, time, Some(appointment_id), auth_token)
            .await?;
        if booked >= i64::from(capacity) {
            return Err(AppointmentError::SlotFullyBooked);
        }

        let update_data = json!({
            "doctor_id": doctor_id,
            "appointment_date": date,
            "appointment_time": time.format("%H:%M:%S").to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let appointment = self
            .patch_appointment(appointment_id, update_data, auth_token)
            .await?;
        info!("Appointment rescheduled: {}", appointment_id);
        Ok(appointment)
    }

    /// Cancelling is one-way and always carries an operator-entered reason.
    pub async fn cancel_appointment(
        &self,
        appointment_id: &Uuid,
        reason: &str,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppointmentError::ValidationError(
                "Cancellation reason is required".to_string(),
            ));
        }

        let current = self.get_appointment(appointment_id, auth_token).await?;
        self.lifecycle
            .validate_transition(current.status, AppointmentStatus::Cancelled)?;

        let update_data = json!({
            "status": AppointmentStatus::Cancelled,
            "cancellation_reason": reason,
            "cancelled_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        self.patch_appointment(appointment_id, update_data, auth_token)
            .await
    }

    pub async fn confirm_appointment(
        &self,
        appointment_id: &Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(appointment_id, auth_token).await?;
        self.lifecycle
            .validate_transition(current.status, AppointmentStatus::Confirmed)?;

        let update_data = json!({
            "status": AppointmentStatus::Confirmed,
            "confirmed_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        self.patch_appointment(appointment_id, update_data, auth_token)
            .await
    }

    /// Generic status move for completed/no-show marking. Cancellation has
    /// its own endpoint because it requires a reason.
    pub async fn update_status(
        &self,
        appointment_id: &Uuid,
        new_status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        if new_status == AppointmentStatus::Cancelled {
            return Err(AppointmentError::ValidationError(
                "Use the cancel endpoint; cancellation requires a reason".to_string(),
            ));
        }

        let current = self.get_appointment(appointment_id, auth_token).await?;
        self.lifecycle.validate_transition(current.status, new_status)?;

        let mut update_data = serde_json::Map::new();
        update_data.insert("status".to_string(), json!(new_status));
        if new_status == AppointmentStatus::Confirmed {
            update_data.insert("confirmed_at".to_string(), json!(Utc::now().to_rfc3339()));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        self.patch_appointment(appointment_id, Value::Object(update_data), auth_token)
            .await
    }

    /// Hard delete, allowed only for non-completed appointments with no
    /// check-in record. Anything already in the queue is cancelled through
    /// the queue so the audit trail survives.
    pub async fn delete_appointment(
        &self,
        appointment_id: &Uuid,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let current = self.get_appointment(appointment_id, auth_token).await?;
        if current.status == AppointmentStatus::Completed {
            return Err(AppointmentError::CompletedImmutable);
        }

        let queue_path = format!(
            "/rest/v1/opd_queue_entries?appointment_id=eq.{}&select=id",
            appointment_id
        );
        let entries: Vec<Value> = self
            .supabase
            .request(Method::GET, &queue_path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;
        if !entries.is_empty() {
            return Err(AppointmentError::HasQueueEntries {
                count: entries.len(),
            });
        }

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        self.supabase
            .request_no_content(Method::DELETE, &path, Some(auth_token))
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        info!("Appointment deleted: {}", appointment_id);
        Ok(())
    }

    /// Steps 1-4 of the booking pipeline. Returns the covering window's
    /// per-slot capacity for the occupancy check.
    async fn validate_booking(
        &self,
        doctor_id: &Uuid,
        date: NaiveDate,
        time: NaiveTime,
        auth_token: &str,
    ) -> Result<i32, AppointmentError> {
        if date < Utc::now().date_naive() {
            return Err(AppointmentError::ValidationError(
                "Appointment date cannot be in the past".to_string(),
            ));
        }

        self.doctor_service
            .get_active_doctor(doctor_id, auth_token)
            .await?;

        if let Some(leave) = self
            .leave_service
            .leave_covering(doctor_id, date, auth_token)
            .await?
        {
            return Err(AppointmentError::DoctorOnLeave(leave.reason));
        }

        let day_of_week = Weekday::from_date(date);
        let windows = self.fetch_windows(doctor_id, day_of_week, auth_token).await?;
        if windows.is_empty() {
            return Err(AppointmentError::NotAvailableThatDay(day_of_week));
        }

        let window =
            find_covering_window(&windows, time).ok_or(AppointmentError::OutsideAvailabilityHours)?;
        Ok(window.max_patients_per_slot)
    }

    async fn fetch_windows(
        &self,
        doctor_id: &Uuid,
        day_of_week: Weekday,
        auth_token: &str,
    ) -> Result<Vec<DoctorAvailability>, AppointmentError> {
        let path = format!(
            "/rest/v1/doctor_availability?doctor_id=eq.{}&day_of_week=eq.{}&is_active=eq.true",
            doctor_id,
            day_of_week.number()
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| AppointmentError::DatabaseError(e.to_string()))
            })
            .collect()
    }

    async fn count_slot_occupancy(
        &self,
        doctor_id: &Uuid,
        date: NaiveDate,
        time: NaiveTime,
        exclude_id: Option<&Uuid>,
        auth_token: &str,
    ) -> Result<i64, AppointmentError> {
        let mut path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&appointment_time=eq.{}&status=in.(scheduled,confirmed)&select=id",
            doctor_id,
            date,
            time.format("%H:%M:%S")
        );
        if let Some(id) = exclude_id {
            path.push_str(&format!("&id=neq.{}", id));
        }

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;
        Ok(rows.len() as i64)
    }

    async fn insert_appointment(
        &self,
        data: Value,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(data),
                Some(headers),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| AppointmentError::DatabaseError("Failed to create appointment".to_string()))?;
        serde_json::from_value(row).map_err(|e| AppointmentError::DatabaseError(e.to_string()))
    }

    async fn patch_appointment(
        &self,
        appointment_id: &Uuid,
        data: Value,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(data), Some(headers))
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let row = rows.into_iter().next().ok_or(AppointmentError::NotFound)?;
        serde_json::from_value(row).map_err(|e| AppointmentError::DatabaseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(start: NaiveTime, end: NaiveTime, capacity: i32) -> DoctorAvailability {
        DoctorAvailability {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            day_of_week: Weekday::Monday,
            start_time: start,
            end_time: end,
            slot_duration_minutes: 15,
            max_patients_per_slot: capacity,
            is_active: true,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn covering_window_is_half_open() {
        let windows = vec![window(t(9, 0), t(12, 0), 1)];
        assert!(find_covering_window(&windows, t(9, 0)).is_some());
        assert!(find_covering_window(&windows, t(11, 45)).is_some());
        // End boundary is exclusive.
        assert!(find_covering_window(&windows, t(12, 0)).is_none());
        assert!(find_covering_window(&windows, t(8, 45)).is_none());
    }

    #[test]
    fn covering_window_skips_inactive() {
        let mut w = window(t(9, 0), t(12, 0), 1);
        w.is_active = false;
        assert!(find_covering_window(&[w], t(10, 0)).is_none());
    }

    #[test]
    fn covering_window_picks_the_right_one_of_many() {
        let morning = window(t(9, 0), t(12, 0), 1);
        let evening = window(t(17, 0), t(20, 0), 2);
        let windows = vec![morning, evening];

        let hit = find_covering_window(&windows, t(18, 0)).unwrap();
        assert_eq!(hit.max_patients_per_slot, 2);
    }
}
