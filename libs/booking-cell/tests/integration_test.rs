use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param, query_param_contains};
use wiremock::{Mock, MockServer, ResponseTemplate};

use booking_cell::router::appointment_routes;
use shared_utils::test_utils::{JwtTestUtils, MockPostgrestResponses, TestConfig, TestUser};

fn test_app(server_url: &str) -> (Router, TestConfig) {
    let config = TestConfig {
        supabase_url: server_url.to_string(),
        ..TestConfig::default()
    };
    let app = appointment_routes(config.to_arc());
    (app, config)
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(v) => Body::from(v.to_string()),
        None => Body::empty(),
    };
    builder.body(body).unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// 09:00 UTC a week from now, with the weekday index its rule needs.
fn future_slot() -> (DateTime<Utc>, i16) {
    let date = (Utc::now() + Duration::days(7)).date_naive();
    let start = date.and_hms_opt(9, 0, 0).unwrap().and_utc();
    let day = date.weekday().num_days_from_sunday() as i16;
    (start, day)
}

fn booking_body(patient: &TestUser, professional: &TestUser, start: DateTime<Utc>) -> Value {
    json!({
        "patient_id": patient.id,
        "professional_id": professional.id,
        "start_time": start.to_rfc3339(),
        "duration_minutes": 60,
        "modality": "virtual",
        "reason": "first consultation"
    })
}

/// Everything a booking needs to succeed except the final insert, which the
/// caller mounts itself.
async fn mount_happy_path_checks(
    server: &MockServer,
    patient: &TestUser,
    professional: &TestUser,
    day_of_week: i16,
) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/consents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrestResponses::consent_response(&patient.id)
        ])))
        .mount(server)
        .await;

    // Daily booking counter, nothing created today.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param_contains("created_at", "gte."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/professionals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "tariff": 60.0 }
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrestResponses::availability_rule_response(
                &professional.id,
                day_of_week,
                "08:00:00",
                "12:00:00",
                60
            )
        ])))
        .mount(server)
        .await;

    // Overlap pre-check, slot currently free.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "neq.cancelled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/audit_events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn booking_requires_authentication() {
    let server = MockServer::start().await;
    let (app, _) = test_app(&server.uri());

    let response = app
        .oneshot(request(Method::POST, "/", None, Some(json!({}))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn successful_booking_returns_confirmation_with_tariff() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient = TestUser::patient("patient@example.com");
    let professional = TestUser::professional("pro@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, None);

    let (start, day) = future_slot();
    mount_happy_path_checks(&server, &patient, &professional, day).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/book_appointment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrestResponses::appointment_response(
                &patient.id,
                &professional.id,
                &start.to_rfc3339(),
                60,
                "pending"
            )
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let body = booking_body(&patient, &professional, start);
    let response = app
        .oneshot(request(Method::POST, "/", Some(&token), Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], json!("pending"));
    assert_eq!(body["duration_minutes"], json!(60));
    assert_eq!(body["tariff"], json!(60.0));
}

#[tokio::test]
async fn cannot_book_for_another_patient() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient = TestUser::patient("patient@example.com");
    let other = TestUser::patient("other@example.com");
    let professional = TestUser::professional("pro@example.com");
    let token = JwtTestUtils::create_test_token(&other, &config.jwt_secret, None);

    let (start, _) = future_slot();
    let body = booking_body(&patient, &professional, start);
    let response = app
        .oneshot(request(Method::POST, "/", Some(&token), Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn past_start_time_is_rejected_before_any_lookup() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient = TestUser::patient("patient@example.com");
    let professional = TestUser::professional("pro@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, None);

    let yesterday = Utc::now() - Duration::days(1);
    let body = booking_body(&patient, &professional, yesterday);
    let response = app
        .oneshot(request(Method::POST, "/", Some(&token), Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error_kind"], json!("validation_error"));
}

#[tokio::test]
async fn missing_consent_blocks_the_booking() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient = TestUser::patient("patient@example.com");
    let professional = TestUser::professional("pro@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, None);

    Mock::given(method("GET"))
        .and(path("/rest/v1/consents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (start, _) = future_slot();
    let body = booking_body(&patient, &professional, start);
    let response = app
        .oneshot(request(Method::POST, "/", Some(&token), Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn daily_limit_returns_too_many_requests() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient = TestUser::patient("patient@example.com");
    let professional = TestUser::professional("pro@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, None);

    Mock::given(method("GET"))
        .and(path("/rest/v1/consents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrestResponses::consent_response(&patient.id)
        ])))
        .mount(&server)
        .await;

    // Five bookings already created today, the configured limit.
    let existing: Vec<Value> = (0..5).map(|_| json!({ "id": Uuid::new_v4() })).collect();
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param_contains("created_at", "gte."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(existing)))
        .mount(&server)
        .await;

    let (start, _) = future_slot();
    let body = booking_body(&patient, &professional, start);
    let response = app
        .oneshot(request(Method::POST, "/", Some(&token), Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn unknown_professional_is_not_found() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient = TestUser::patient("patient@example.com");
    let professional = TestUser::professional("pro@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, None);

    Mock::given(method("GET"))
        .and(path("/rest/v1/consents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrestResponses::consent_response(&patient.id)
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param_contains("created_at", "gte."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/professionals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (start, _) = future_slot();
    let body = booking_body(&patient, &professional, start);
    let response = app
        .oneshot(request(Method::POST, "/", Some(&token), Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn booking_outside_open_hours_conflicts() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient = TestUser::patient("patient@example.com");
    let professional = TestUser::professional("pro@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, None);

    Mock::given(method("GET"))
        .and(path("/rest/v1/consents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrestResponses::consent_response(&patient.id)
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param_contains("created_at", "gte."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/professionals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "tariff": 60.0 }
        ])))
        .mount(&server)
        .await;
    // No open-hours rules on that weekday.
    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (start, _) = future_slot();
    let body = booking_body(&patient, &professional, start);
    let response = app
        .oneshot(request(Method::POST, "/", Some(&token), Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response).await;
    assert_eq!(body["error_kind"], json!("professional_unavailable"));
}

#[tokio::test]
async fn unrecognized_modality_is_a_validation_error() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient = TestUser::patient("patient@example.com");
    let professional = TestUser::professional("pro@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, None);

    let (start, _) = future_slot();
    let mut body = booking_body(&patient, &professional, start);
    body["modality"] = json!("teleportation");

    let response = app
        .oneshot(request(Method::POST, "/", Some(&token), Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error_kind"], json!("validation_error"));
}

#[tokio::test]
async fn occupied_slot_conflicts() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient = TestUser::patient("patient@example.com");
    let professional = TestUser::professional("pro@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, None);

    let (start, day) = future_slot();

    Mock::given(method("GET"))
        .and(path("/rest/v1/consents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrestResponses::consent_response(&patient.id)
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param_contains("created_at", "gte."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/professionals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "tariff": 60.0 }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrestResponses::availability_rule_response(
                &professional.id,
                day,
                "08:00:00",
                "12:00:00",
                60
            )
        ])))
        .mount(&server)
        .await;
    // Someone already holds the interval.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "neq.cancelled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrestResponses::appointment_response(
                &Uuid::new_v4().to_string(),
                &professional.id,
                &start.to_rfc3339(),
                60,
                "confirmed"
            )
        ])))
        .mount(&server)
        .await;

    let body = booking_body(&patient, &professional, start);
    let response = app
        .oneshot(request(Method::POST, "/", Some(&token), Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response).await;
    assert_eq!(body["error_kind"], json!("slot_conflict"));
}

#[tokio::test]
async fn concurrent_bookings_for_one_slot_produce_one_winner() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient_a = TestUser::patient("a@example.com");
    let patient_b = TestUser::patient("b@example.com");
    let professional = TestUser::professional("pro@example.com");
    let token_a = JwtTestUtils::create_test_token(&patient_a, &config.jwt_secret, None);
    let token_b = JwtTestUtils::create_test_token(&patient_b, &config.jwt_secret, None);

    let (start, day) = future_slot();
    mount_happy_path_checks(&server, &patient_a, &professional, day).await;

    // The database function admits exactly one insert for the interval.
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/book_appointment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrestResponses::appointment_response(
                &patient_a.id,
                &professional.id,
                &start.to_rfc3339(),
                60,
                "pending"
            )
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/book_appointment"))
        .respond_with(ResponseTemplate::new(409).set_body_json(
            MockPostgrestResponses::pg_error_response(
                "23P01",
                "conflicting key value violates exclusion constraint \"appointments_no_overlap\"",
            ),
        ))
        .mount(&server)
        .await;

    let req_a = request(
        Method::POST,
        "/",
        Some(&token_a),
        Some(booking_body(&patient_a, &professional, start)),
    );
    let req_b = request(
        Method::POST,
        "/",
        Some(&token_b),
        Some(booking_body(&patient_b, &professional, start)),
    );

    let (res_a, res_b) = futures::join!(app.clone().oneshot(req_a), app.oneshot(req_b));
    let mut statuses = vec![res_a.unwrap().status(), res_b.unwrap().status()];
    statuses.sort();

    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);
}

#[tokio::test]
async fn stranger_cannot_read_an_appointment() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let stranger = TestUser::patient("stranger@example.com");
    let token = JwtTestUtils::create_test_token(&stranger, &config.jwt_secret, None);

    let appointment = MockPostgrestResponses::appointment_response(
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
        "2025-06-02T09:00:00Z",
        60,
        "pending",
    );
    let appointment_id = appointment["id"].as_str().unwrap().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([appointment])))
        .mount(&server)
        .await;

    let uri = format!("/{}", appointment_id);
    let response = app
        .oneshot(request(Method::GET, &uri, Some(&token), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn professional_confirms_a_pending_appointment() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient = TestUser::patient("patient@example.com");
    let professional = TestUser::professional("pro@example.com");
    let token = JwtTestUtils::create_test_token(&professional, &config.jwt_secret, None);

    let (start, _) = future_slot();
    let pending = MockPostgrestResponses::appointment_response(
        &patient.id,
        &professional.id,
        &start.to_rfc3339(),
        60,
        "pending",
    );
    let appointment_id = pending["id"].as_str().unwrap().to_string();
    let mut confirmed = pending.clone();
    confirmed["status"] = json!("confirmed");

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([pending])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([confirmed])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/audit_events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(&server)
        .await;

    let uri = format!("/{}/confirm", appointment_id);
    let response = app
        .oneshot(request(Method::POST, &uri, Some(&token), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], json!("confirmed"));
}

#[tokio::test]
async fn completed_appointment_cannot_be_cancelled() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient = TestUser::patient("patient@example.com");
    let professional = TestUser::professional("pro@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, None);

    let completed = MockPostgrestResponses::appointment_response(
        &patient.id,
        &professional.id,
        "2025-06-02T09:00:00Z",
        60,
        "completed",
    );
    let appointment_id = completed["id"].as_str().unwrap().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([completed])))
        .mount(&server)
        .await;

    let uri = format!("/{}/cancel", appointment_id);
    let body = json!({ "cancelled_by": "patient" });
    let response = app
        .oneshot(request(Method::POST, &uri, Some(&token), Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response).await;
    assert_eq!(body["error_kind"], json!("invalid_transition"));
}

#[tokio::test]
async fn cannot_cancel_an_appointment_already_started() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient = TestUser::patient("patient@example.com");
    let professional = TestUser::professional("pro@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, None);

    let past_start = (Utc::now() - Duration::hours(1)).to_rfc3339();
    let pending = MockPostgrestResponses::appointment_response(
        &patient.id,
        &professional.id,
        &past_start,
        60,
        "pending",
    );
    let appointment_id = pending["id"].as_str().unwrap().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([pending])))
        .mount(&server)
        .await;

    let uri = format!("/{}/cancel", appointment_id);
    let body = json!({ "cancelled_by": "patient" });
    let response = app
        .oneshot(request(Method::POST, &uri, Some(&token), Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn patient_search_is_scoped_to_their_own_appointments() {
    let server = MockServer::start().await;
    let (app, config) = test_app(&server.uri());

    let patient = TestUser::patient("patient@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &config.jwt_secret, None);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", patient.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    // The caller asks for someone else's appointments; the filter is
    // overridden with their own id.
    let uri = format!("/search?patient_id={}", Uuid::new_v4());
    let response = app
        .oneshot(request(Method::GET, &uri, Some(&token), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["appointments"], json!([]));
}
