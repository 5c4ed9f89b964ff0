use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{
    AppointmentError, AppointmentStatus, BookAppointmentRequest, RescheduleAppointmentRequest,
};
use appointment_cell::services::booking::AppointmentBookingService;
use shared_config::AppConfig;
use shared_utils::test_utils::{MockRows, TestConfig};

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn config_for(server: &MockServer) -> AppConfig {
    let mut config = TestConfig::default().to_app_config();
    config.supabase_url = server.uri();
    config
}

fn future_date() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(8)
}

fn day_of(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

fn booking_request(patient_id: Uuid, doctor_id: Uuid, date: NaiveDate, time: NaiveTime) -> BookAppointmentRequest {
    BookAppointmentRequest {
        patient_id,
        doctor_id,
        appointment_date: date,
        appointment_time: time,
        appointment_type: None,
    }
}

async fn mount_active_doctor(server: &MockServer, doctor_id: &Uuid) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::doctor(doctor_id, "Dr. Asha Rao", true)
        ])))
        .mount(server)
        .await;
}

async fn mount_no_leave(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_leaves"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

async fn mount_window(server: &MockServer, doctor_id: &Uuid, day: u8, capacity: i32) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::availability(doctor_id, day, "09:00:00", "12:00:00", 15, capacity)
        ])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn booking_runs_the_full_pipeline_and_inserts() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let date = future_date();

    mount_active_doctor(&server, &doctor_id).await;
    mount_no_leave(&server).await;
    mount_window(&server, &doctor_id, day_of(date), 1).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({
            "doctor_id": doctor_id,
            "appointment_time": "10:00:00",
            "status": "scheduled"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockRows::appointment(&patient_id, &doctor_id, date, t(10, 0), "scheduled")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let service = AppointmentBookingService::new(&config_for(&server));
    let appointment = service
        .book_appointment(booking_request(patient_id, doctor_id, date, t(10, 0)), "token")
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Scheduled);
    assert_eq!(appointment.appointment_time, t(10, 0));
}

#[tokio::test]
async fn booking_rejects_inactive_doctor() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::doctor(&doctor_id, "Dr. Retired", false)
        ])))
        .mount(&server)
        .await;

    let service = AppointmentBookingService::new(&config_for(&server));
    let result = service
        .book_appointment(
            booking_request(Uuid::new_v4(), doctor_id, future_date(), t(10, 0)),
            "token",
        )
        .await;

    assert_matches!(result, Err(AppointmentError::DoctorInactive));
}

#[tokio::test]
async fn booking_rejects_past_dates_before_any_lookup() {
    let server = MockServer::start().await;
    let service = AppointmentBookingService::new(&config_for(&server));

    let yesterday = Utc::now().date_naive() - Duration::days(1);
    let result = service
        .book_appointment(
            booking_request(Uuid::new_v4(), Uuid::new_v4(), yesterday, t(10, 0)),
            "token",
        )
        .await;

    assert_matches!(result, Err(AppointmentError::ValidationError(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn booking_rejects_doctor_on_leave() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    mount_active_doctor(&server, &doctor_id).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_leaves"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::leave(&doctor_id, date, date, "Medical conference")
        ])))
        .mount(&server)
        .await;

    let service = AppointmentBookingService::new(&config_for(&server));
    let result = service
        .book_appointment(booking_request(Uuid::new_v4(), doctor_id, date, t(10, 0)), "token")
        .await;

    assert_matches!(result, Err(AppointmentError::DoctorOnLeave(reason)) if reason == "Medical conference");
}

#[tokio::test]
async fn booking_rejects_day_without_windows() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_active_doctor(&server, &doctor_id).await;
    mount_no_leave(&server).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let service = AppointmentBookingService::new(&config_for(&server));
    let result = service
        .book_appointment(
            booking_request(Uuid::new_v4(), doctor_id, future_date(), t(10, 0)),
            "token",
        )
        .await;

    assert_matches!(result, Err(AppointmentError::NotAvailableThatDay(_)));
}

#[tokio::test]
async fn booking_rejects_time_outside_window() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    mount_active_doctor(&server, &doctor_id).await;
    mount_no_leave(&server).await;
    mount_window(&server, &doctor_id, day_of(date), 1).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let service = AppointmentBookingService::new(&config_for(&server));
    let result = service
        .book_appointment(booking_request(Uuid::new_v4(), doctor_id, date, t(14, 0)), "token")
        .await;

    assert_matches!(result, Err(AppointmentError::OutsideAvailabilityHours));
}

#[tokio::test]
async fn booking_rejects_full_slot() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let occupant = Uuid::new_v4();
    let date = future_date();

    mount_active_doctor(&server, &doctor_id).await;
    mount_no_leave(&server).await;
    mount_window(&server, &doctor_id, day_of(date), 1).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::appointment(&occupant, &doctor_id, date, t(10, 0), "scheduled")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let service = AppointmentBookingService::new(&config_for(&server));
    let result = service
        .book_appointment(booking_request(Uuid::new_v4(), doctor_id, date, t(10, 0)), "token")
        .await;

    assert_matches!(result, Err(AppointmentError::SlotFullyBooked));
}

#[tokio::test]
async fn concurrent_bookings_cannot_exceed_capacity() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    mount_active_doctor(&server, &doctor_id).await;
    mount_no_leave(&server).await;
    mount_window(&server, &doctor_id, day_of(date), 1).await;

    // First occupancy read sees an empty slot; every read after the insert
    // sees the committed row. The slot lock forces that ordering.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("appointment_time", "eq.10:00:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("appointment_time", "eq.10:00:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::appointment(&Uuid::new_v4(), &doctor_id, date, t(10, 0), "scheduled")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockRows::appointment(&Uuid::new_v4(), &doctor_id, date, t(10, 0), "scheduled")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let service = Arc::new(AppointmentBookingService::new(&config_for(&server)));
    let a = {
        let service = Arc::clone(&service);
        let request = booking_request(Uuid::new_v4(), doctor_id, date, t(10, 0));
        tokio::spawn(async move { service.book_appointment(request, "token").await })
    };
    let b = {
        let service = Arc::clone(&service);
        let request = booking_request(Uuid::new_v4(), doctor_id, date, t(10, 0));
        tokio::spawn(async move { service.book_appointment(request, "token").await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(AppointmentError::SlotFullyBooked)))
        .count();

    assert_eq!(successes, 1);
    assert_eq!(conflicts, 1);
}

#[tokio::test]
async fn reschedule_excludes_own_seat_from_the_count() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let date = future_date();

    let row = MockRows::appointment(&patient_id, &doctor_id, date, t(10, 0), "scheduled");
    let appointment_id = row["id"].as_str().unwrap().parse::<Uuid>().unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row.clone()])))
        .mount(&server)
        .await;

    mount_active_doctor(&server, &doctor_id).await;
    mount_no_leave(&server).await;
    mount_window(&server, &doctor_id, day_of(date), 1).await;

    // The occupancy query must carry the self-exclusion filter.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("appointment_time", "eq.10:30:00"))
        .and(query_param("id", format!("neq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let mut moved = row.clone();
    moved["appointment_time"] = json!("10:30:00");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({ "appointment_time": "10:30:00" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([moved])))
        .expect(1)
        .mount(&server)
        .await;

    let service = AppointmentBookingService::new(&config_for(&server));
    let appointment = service
        .reschedule_appointment(
            &appointment_id,
            RescheduleAppointmentRequest {
                appointment_time: Some(t(10, 30)),
                ..Default::default()
            },
            "token",
        )
        .await
        .unwrap();

    assert_eq!(appointment.appointment_time, t(10, 30));
}

#[tokio::test]
async fn cancel_requires_a_reason() {
    let server = MockServer::start().await;
    let service = AppointmentBookingService::new(&config_for(&server));

    let result = service
        .cancel_appointment(&Uuid::new_v4(), "   ", "token")
        .await;

    assert_matches!(result, Err(AppointmentError::ValidationError(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_appointments_stay_cancelled() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    let row = MockRows::appointment(&Uuid::new_v4(), &doctor_id, date, t(10, 0), "cancelled");
    let appointment_id = row["id"].as_str().unwrap().parse::<Uuid>().unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&server)
        .await;

    let service = AppointmentBookingService::new(&config_for(&server));
    let result = service
        .cancel_appointment(&appointment_id, "changed my mind", "token")
        .await;

    assert_matches!(
        result,
        Err(AppointmentError::InvalidTransition {
            from: AppointmentStatus::Cancelled,
            ..
        })
    );
}

#[tokio::test]
async fn cancel_stamps_reason_and_time() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    let row = MockRows::appointment(&Uuid::new_v4(), &doctor_id, date, t(10, 0), "scheduled");
    let appointment_id = row["id"].as_str().unwrap().parse::<Uuid>().unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row.clone()])))
        .mount(&server)
        .await;

    let mut cancelled = row.clone();
    cancelled["status"] = json!("cancelled");
    cancelled["cancellation_reason"] = json!("patient request");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({
            "status": "cancelled",
            "cancellation_reason": "patient request"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([cancelled])))
        .expect(1)
        .mount(&server)
        .await;

    let service = AppointmentBookingService::new(&config_for(&server));
    let appointment = service
        .cancel_appointment(&appointment_id, "patient request", "token")
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Cancelled);
    assert_eq!(appointment.cancellation_reason.as_deref(), Some("patient request"));
}

#[tokio::test]
async fn delete_is_blocked_by_linked_queue_entries() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    let row = MockRows::appointment(&Uuid::new_v4(), &doctor_id, date, t(10, 0), "scheduled");
    let appointment_id = row["id"].as_str().unwrap().parse::<Uuid>().unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/opd_queue_entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": Uuid::new_v4() }])))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let service = AppointmentBookingService::new(&config_for(&server));
    let result = service.delete_appointment(&appointment_id, "token").await;

    assert_matches!(result, Err(AppointmentError::HasQueueEntries { count: 1 }));
}

#[tokio::test]
async fn delete_succeeds_on_empty_no_content_response() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    let row = MockRows::appointment(&Uuid::new_v4(), &doctor_id, date, t(10, 0), "scheduled");
    let appointment_id = row["id"].as_str().unwrap().parse::<Uuid>().unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/opd_queue_entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    // PostgREST answers a bare delete with 204 and no body.
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let service = AppointmentBookingService::new(&config_for(&server));
    service.delete_appointment(&appointment_id, "token").await.unwrap();
}

#[tokio::test]
async fn completed_appointments_cannot_be_deleted() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    let row = MockRows::appointment(&Uuid::new_v4(), &doctor_id, date, t(10, 0), "completed");
    let appointment_id = row["id"].as_str().unwrap().parse::<Uuid>().unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&server)
        .await;

    let service = AppointmentBookingService::new(&config_for(&server));
    let result = service.delete_appointment(&appointment_id, "token").await;

    assert_matches!(result, Err(AppointmentError::CompletedImmutable));
}
