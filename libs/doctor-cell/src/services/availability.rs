use chrono::{Duration, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::locks::{schedule_lock_key, KeyedLockRegistry};
use shared_utils::time::ranges_overlap;

use crate::models::{
    CreateAvailabilityRequest, DoctorAvailability, DoctorError, UpdateAvailabilityRequest, Weekday,
};

/// First active window whose `[start,end)` range intersects the candidate.
/// `exclude_id` skips the window being edited so it cannot conflict with
/// itself.
pub fn find_overlap<'a>(
    windows: &'a [DoctorAvailability],
    start_time: NaiveTime,
    end_time: NaiveTime,
    exclude_id: Option<&Uuid>,
) -> Option<&'a DoctorAvailability> {
    windows
        .iter()
        .filter(|w| w.is_active)
        .filter(|w| exclude_id != Some(&w.id))
        .find(|w| ranges_overlap(start_time, end_time, w.start_time, w.end_time))
}

pub struct AvailabilityService {
    supabase: SupabaseClient,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn list_availability(
        &self,
        doctor_id: &Uuid,
        auth_token: &str,
    ) -> Result<Vec<DoctorAvailability>, DoctorError> {
        let path = format!(
            "/rest/v1/doctor_availability?doctor_id=eq.{}&is_active=eq.true&order=day_of_week.asc,start_time.asc",
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

    pub async fn get_availability_by_id(
        &self,
        availability_id: &Uuid,
        auth_token: &str,
    ) -> Result<DoctorAvailability, DoctorError> {
        let path = format!("/rest/v1/doctor_availability?id=eq.{}&limit=1", availability_id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or(DoctorError::AvailabilityNotFound)?;
        serde_json::from_value(row).map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    pub async fn create_availability(
        &self,
        doctor_id: &Uuid,
        request: CreateAvailabilityRequest,
        auth_token: &str,
    ) -> Result<DoctorAvailability, DoctorError> {
        debug!(
            "Creating availability for doctor {} on {}",
            doctor_id,
            request.day_of_week.name()
        );

        let max_patients = request.max_patients_per_slot.unwrap_or(1);
        validate_window(
            request.start_time,
            request.end_time,
            request.slot_duration_minutes,
            max_patients,
        )?;

        // Overlap check and insert must not interleave with a concurrent
        // edit of the same doctor/day.
        let lock_key = schedule_lock_key(doctor_id, request.day_of_week.number());
        let _guard = KeyedLockRegistry::global().acquire(&lock_key).await;

        self.check_window_conflicts(
            doctor_id,
            request.day_of_week,
            request.start_time,
            request.end_time,
            None,
            auth_token,
        )
        .await?;

        let availability_data = json!({
            "doctor_id": doctor_id,
            "day_of_week": request.day_of_week.number(),
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": request.end_time.format("%H:%M:%S").to_string(),
            "slot_duration_minutes": request.slot_duration_minutes,
            "max_patients_per_slot": max_patients,
            "is_active": true,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
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
                "/rest/v1/doctor_availability",
                Some(auth_token),
                Some(availability_data),
                Some(headers),
            )
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DoctorError::DatabaseError("Failed to create availability".to_string()))?;
        let availability: DoctorAvailability =
            serde_json::from_value(row).map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        info!("Availability created: {}", availability.id);
        Ok(availability)
    }

    /// Merge the patch onto the stored window, then validate the result as
    /// if it were a fresh create.
    pub async fn update_availability(
        &self,
        doctor_id: &Uuid,
        availability_id: &Uuid,
        request: UpdateAvailabilityRequest,
        auth_token: &str,
    ) -> Result<DoctorAvailability, DoctorError> {
        debug!("Updating availability: {}", availability_id);

        let current = self.get_availability_by_id(availability_id, auth_token).await?;
        if &current.doctor_id != doctor_id {
            return Err(DoctorError::AvailabilityNotFound);
        }

        let day_of_week = request.day_of_week.unwrap_or(current.day_of_week);
        let start_time = request.start_time.unwrap_or(current.start_time);
        let end_time = request.end_time.unwrap_or(current.end_time);
        let slot_duration = request
            .slot_duration_minutes
            .unwrap_or(current.slot_duration_minutes);
        let max_patients = request
            .max_patients_per_slot
            .unwrap_or(current.max_patients_per_slot);

        validate_window(start_time, end_time, slot_duration, max_patients)?;

        let lock_key = schedule_lock_key(doctor_id, day_of_week.number());
        let _guard = KeyedLockRegistry::global().acquire(&lock_key).await;

        self.check_window_conflicts(
            doctor_id,
            day_of_week,
            start_time,
            end_time,
            Some(availability_id),
            auth_token,
        )
        .await?;

        let mut update_data = serde_json::Map::new();
        if let Some(day) = request.day_of_week {
            update_data.insert("day_of_week".to_string(), json!(day.number()));
        }
        if let Some(start) = request.start_time {
            update_data.insert(
                "start_time".to_string(),
                json!(start.format("%H:%M:%S").to_string()),
            );
        }
        if let Some(end) = request.end_time {
            update_data.insert(
                "end_time".to_string(),
                json!(end.format("%H:%M:%S").to_string()),
            );
        }
        if let Some(duration) = request.slot_duration_minutes {
            update_data.insert("slot_duration_minutes".to_string(), json!(duration));
        }
        if let Some(capacity) = request.max_patients_per_slot {
            update_data.insert("max_patients_per_slot".to_string(), json!(capacity));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/doctor_availability?id=eq.{}", availability_id);
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
                Some(Value::Object(update_data)),
                Some(headers),
            )
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or(DoctorError::AvailabilityNotFound)?;
        serde_json::from_value(row).map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    /// Soft-deactivate; the right choice when future appointments still
    /// reference the window.
    pub async fn deactivate_availability(
        &self,
        doctor_id: &Uuid,
        availability_id: &Uuid,
        auth_token: &str,
    ) -> Result<DoctorAvailability, DoctorError> {
        let path = format!(
            "/rest/v1/doctor_availability?id=eq.{}&doctor_id=eq.{}",
            availability_id, doctor_id
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
                Some(json!({ "is_active": false, "updated_at": Utc::now().to_rfc3339() })),
                Some(headers),
            )
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or(DoctorError::AvailabilityNotFound)?;
        serde_json::from_value(row).map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    /// Hard delete, refused while upcoming appointments within the
    /// configured look-ahead horizon fall inside this window's weekday
    /// and hours.
    pub async fn delete_availability(
        &self,
        doctor_id: &Uuid,
        availability_id: &Uuid,
        lookahead_days: i64,
        auth_token: &str,
    ) -> Result<(), DoctorError> {
        let window = self.get_availability_by_id(availability_id, auth_token).await?;
        if &window.doctor_id != doctor_id {
            return Err(DoctorError::AvailabilityNotFound);
        }

        let today = Utc::now().date_naive();
        let horizon = today + Duration::days(lookahead_days);
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=gte.{}&appointment_date=lte.{}&status=in.(scheduled,confirmed)",
            doctor_id, today, horizon
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let dependent_count = rows
            .iter()
            .filter(|row| {
                let date = row
                    .get("appointment_date")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<chrono::NaiveDate>().ok());
                let time = row
                    .get("appointment_time")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<NaiveTime>().ok());
                match (date, time) {
                    (Some(date), Some(time)) => {
                        Weekday::from_date(date) == window.day_of_week
                            && window.start_time <= time
                            && time < window.end_time
                    }
                    _ => false,
                }
            })
            .count();

        if dependent_count > 0 {
            return Err(DoctorError::BlockedByAppointments {
                count: dependent_count,
            });
        }

        let delete_path = format!("/rest/v1/doctor_availability?id=eq.{}", availability_id);
        self.supabase
            .request_no_content(Method::DELETE, &delete_path, Some(auth_token))
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        info!("Availability deleted: {}", availability_id);
        Ok(())
    }

    async fn check_window_conflicts(
        &self,
        doctor_id: &Uuid,
        day_of_week: Weekday,
        start_time: NaiveTime,
        end_time: NaiveTime,
        exclude_id: Option<&Uuid>,
        auth_token: &str,
    ) -> Result<(), DoctorError> {
        let path = format!(
            "/rest/v1/doctor_availability?doctor_id=eq.{}&day_of_week=eq.{}&is_active=eq.true",
            doctor_id,
            day_of_week.number()
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let windows: Vec<DoctorAvailability> = rows
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| DoctorError::DatabaseError(e.to_string())))
            .collect::<Result<_, _>>()?;

        if let Some(existing) = find_overlap(&windows, start_time, end_time, exclude_id) {
            return Err(DoctorError::OverlappingWindow {
                day: existing.day_of_week,
                start: existing.start_time,
                end: existing.end_time,
            });
        }

        Ok(())
    }
}

fn validate_window(
    start_time: NaiveTime,
    end_time: NaiveTime,
    slot_duration_minutes: i32,
    max_patients_per_slot: i32,
) -> Result<(), DoctorError> {
    // Midnight-spanning windows are not supported.
    if start_time >= end_time {
        return Err(DoctorError::ValidationError(
            "Start time must be before end time".to_string(),
        ));
    }
    if slot_duration_minutes <= 0 {
        return Err(DoctorError::ValidationError(
            "Slot duration must be positive".to_string(),
        ));
    }
    if max_patients_per_slot < 1 {
        return Err(DoctorError::ValidationError(
            "Max patients per slot must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(start: NaiveTime, end: NaiveTime) -> DoctorAvailability {
        DoctorAvailability {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            day_of_week: Weekday::Monday,
            start_time: start,
            end_time: end,
            slot_duration_minutes: 15,
            max_patients_per_slot: 1,
            is_active: true,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn overlap_reports_existing_window() {
        let existing = vec![window(t(9, 0), t(12, 0))];
        let hit = find_overlap(&existing, t(11, 0), t(13, 0), None).unwrap();
        assert_eq!(hit.start_time, t(9, 0));
        assert_eq!(hit.end_time, t(12, 0));
    }

    #[test]
    fn adjacent_windows_do_not_overlap() {
        let existing = vec![window(t(9, 0), t(12, 0))];
        assert!(find_overlap(&existing, t(12, 0), t(14, 0), None).is_none());
    }

    #[test]
    fn edited_window_does_not_conflict_with_itself() {
        let existing = vec![window(t(9, 0), t(12, 0))];
        let own_id = existing[0].id;
        assert!(find_overlap(&existing, t(9, 30), t(11, 30), Some(&own_id)).is_none());
    }

    #[test]
    fn inactive_windows_are_ignored() {
        let mut w = window(t(9, 0), t(12, 0));
        w.is_active = false;
        assert!(find_overlap(&[w], t(10, 0), t(11, 0), None).is_none());
    }

    #[test]
    fn window_validation_rejects_bad_input() {
        assert_matches!(
            validate_window(t(12, 0), t(9, 0), 15, 1),
            Err(DoctorError::ValidationError(_))
        );
        assert_matches!(
            validate_window(t(9, 0), t(9, 0), 15, 1),
            Err(DoctorError::ValidationError(_))
        );
        assert_matches!(
            validate_window(t(9, 0), t(12, 0), 0, 1),
            Err(DoctorError::ValidationError(_))
        );
        assert_matches!(
            validate_window(t(9, 0), t(12, 0), 15, 0),
            Err(DoctorError::ValidationError(_))
        );
        assert!(validate_window(t(9, 0), t(12, 0), 15, 2).is_ok());
    }
}
