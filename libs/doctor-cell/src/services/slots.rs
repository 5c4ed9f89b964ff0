use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::time::add_minutes;

use crate::models::{DoctorAvailability, DoctorError, Slot, SlotListing, Weekday};
use crate::services::leave::LeaveService;

/// Walk each window from start to end in slot-duration steps, emitting one
/// slot per step with its current occupancy. Slots strictly before `cutoff`
/// (wall-clock time when listing today) are suppressed.
pub fn expand_windows(
    windows: &[DoctorAvailability],
    booked: &HashMap<NaiveTime, i64>,
    cutoff: Option<NaiveTime>,
) -> Vec<Slot> {
    let mut slots = Vec::new();

    let mut ordered: Vec<&DoctorAvailability> = windows.iter().filter(|w| w.is_active).collect();
    ordered.sort_by_key(|w| w.start_time);

    for window in ordered {
        let step = i64::from(window.slot_duration_minutes);
        let mut current = window.start_time;
        while current < window.end_time {
            let slot_end = add_minutes(current, step);
            if cutoff.map_or(true, |now| current >= now) {
                let booked_count = booked.get(&current).copied().unwrap_or(0);
                slots.push(Slot {
                    time: current,
                    end_time: slot_end,
                    booked_count,
                    max_patients: window.max_patients_per_slot,
                    is_available: booked_count < i64::from(window.max_patients_per_slot),
                });
            }
            // Guard against a wrap past midnight ending the walk early.
            if slot_end <= current {
                break;
            }
            current = slot_end;
        }
    }

    slots
}

pub struct SlotService {
    supabase: SupabaseClient,
    leave_service: LeaveService,
}

impl SlotService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            leave_service: LeaveService::new(config),
        }
    }

    /// Expand a doctor's weekly windows into bookable slots for one date.
    /// Read-only; occupancy is recounted on every call.
    pub async fn generate_slots(
        &self,
        doctor_id: &Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<SlotListing, DoctorError> {
        debug!("Generating slots for doctor {} on {}", doctor_id, date);

        let now = Utc::now();
        let today = now.date_naive();
        if date < today {
            return Err(DoctorError::ValidationError(
                "Cannot list slots for a past date".to_string(),
            ));
        }

        let day_of_week = Weekday::from_date(date);

        if let Some(leave) = self
            .leave_service
            .leave_covering(doctor_id, date, auth_token)
            .await?
        {
            return Ok(SlotListing {
                doctor_id: *doctor_id,
                date,
                day_of_week,
                is_on_leave: true,
                leave_reason: Some(leave.reason),
                is_available: false,
                total_slots: 0,
                available_slots: 0,
                booked_slots: 0,
                slots: Vec::new(),
            });
        }

        let windows = self
            .fetch_windows(doctor_id, day_of_week, auth_token)
            .await?;
        if windows.is_empty() {
            return Ok(SlotListing {
                doctor_id: *doctor_id,
                date,
                day_of_week,
                is_on_leave: false,
                leave_reason: None,
                is_available: false,
                total_slots: 0,
                available_slots: 0,
                booked_slots: 0,
                slots: Vec::new(),
            });
        }

        let booked = self.fetch_booked_counts(doctor_id, date, auth_token).await?;
        let cutoff = (date == today).then(|| now.time());
        let slots = expand_windows(&windows, &booked, cutoff);

        let total_slots = slots.len();
        let available_slots = slots.iter().filter(|s| s.is_available).count();
        let booked_slots = slots.iter().filter(|s| s.booked_count > 0).count();

        Ok(SlotListing {
            doctor_id: *doctor_id,
            date,
            day_of_week,
            is_on_leave: false,
            leave_reason: None,
            is_available: available_slots > 0,
            total_slots,
            available_slots,
            booked_slots,
            slots,
        })
    }

    async fn fetch_windows(
        &self,
        doctor_id: &Uuid,
        day_of_week: Weekday,
        auth_token: &str,
    ) -> Result<Vec<DoctorAvailability>, DoctorError> {
        let path = format!(
            "/rest/v1/doctor_availability?doctor_id=eq.{}&day_of_week=eq.{}&is_active=eq.true&order=start_time.asc",
            doctor_id,
            day_of_week.number()
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

    /// Occupancy per slot start time for one doctor/date, counting only
    /// appointments that still hold a seat.
    async fn fetch_booked_counts(
        &self,
        doctor_id: &Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<HashMap<NaiveTime, i64>, DoctorError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&status=in.(scheduled,confirmed)&select=appointment_time",
            doctor_id, date
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let mut counts: HashMap<NaiveTime, i64> = HashMap::new();
        for row in rows {
            let time = row
                .get("appointment_time")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<NaiveTime>().ok());
            if let Some(time) = time {
                *counts.entry(time).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(start: NaiveTime, end: NaiveTime, duration: i32, capacity: i32) -> DoctorAvailability {
        DoctorAvailability {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            day_of_week: Weekday::Monday,
            start_time: start,
            end_time: end,
            slot_duration_minutes: duration,
            max_patients_per_slot: capacity,
            is_active: true,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn three_hour_window_yields_twelve_quarter_slots() {
        let windows = vec![window(t(9, 0), t(12, 0), 15, 1)];
        let slots = expand_windows(&windows, &HashMap::new(), None);

        assert_eq!(slots.len(), 12);
        assert_eq!(slots[0].time, t(9, 0));
        assert_eq!(slots[11].time, t(11, 45));
        assert!(slots.iter().all(|s| s.is_available));
        // Half-open: no slot starts at the window end.
        assert!(slots.iter().all(|s| s.time < t(12, 0)));
    }

    #[test]
    fn occupancy_marks_full_slots_unavailable() {
        let windows = vec![window(t(9, 0), t(12, 0), 15, 1)];
        let mut booked = HashMap::new();
        booked.insert(t(10, 0), 1);

        let slots = expand_windows(&windows, &booked, None);
        let ten = slots.iter().find(|s| s.time == t(10, 0)).unwrap();
        assert_eq!(ten.booked_count, 1);
        assert!(!ten.is_available);
        assert!(slots.iter().filter(|s| s.time != t(10, 0)).all(|s| s.is_available));
    }

    #[test]
    fn capacity_above_one_keeps_partial_slots_available() {
        let windows = vec![window(t(9, 0), t(10, 0), 30, 3)];
        let mut booked = HashMap::new();
        booked.insert(t(9, 0), 2);

        let slots = expand_windows(&windows, &booked, None);
        assert_eq!(slots.len(), 2);
        assert!(slots[0].is_available);
        assert_eq!(slots[0].booked_count, 2);
    }

    #[test]
    fn cutoff_hides_past_slots_for_today() {
        let windows = vec![window(t(9, 0), t(12, 0), 60, 1)];
        let slots = expand_windows(&windows, &HashMap::new(), Some(t(10, 30)));

        let times: Vec<NaiveTime> = slots.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![t(11, 0)]);
    }

    #[test]
    fn inactive_windows_produce_no_slots() {
        let mut w = window(t(9, 0), t(12, 0), 15, 1);
        w.is_active = false;
        assert!(expand_windows(&[w], &HashMap::new(), None).is_empty());
    }

    #[test]
    fn multiple_windows_expand_in_time_order() {
        let windows = vec![
            window(t(14, 0), t(15, 0), 30, 1),
            window(t(9, 0), t(10, 0), 30, 1),
        ];
        let slots = expand_windows(&windows, &HashMap::new(), None);
        let times: Vec<NaiveTime> = slots.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![t(9, 0), t(9, 30), t(14, 0), t(14, 30)]);
    }
}
