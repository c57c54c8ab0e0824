//! Core API integration tests
//!
//! Drives the full router (pipeline included) with a stub executor
//! dispatcher, covering the booking -> reminder -> confirmation flow,
//! duplicate suppression, rate limiting, and the messaging fallback path.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use aro_contracts::{ExecutorCommand, ExecutorResultEvent};
use aro_core::{CoreConfig, CoreEngine, CoreError, CoreResult, ExecutorDispatch};

const SERVICE_TOKEN: &str = "service-token";
const TENANT: &str = "tenant-health-1";

/// Stub executor: classifies replies by keyword, succeeds or fails sends
struct StubExecutor {
    failing: AtomicBool,
}

impl StubExecutor {
    fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutorDispatch for StubExecutor {
    async fn execute(&self, command: &ExecutorCommand) -> CoreResult<ExecutorResultEvent> {
        if command.command_type == "integration.nlp.classify_reply" {
            let text = command
                .payload
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_lowercase();
            let intent = if text.contains("resched") {
                "reschedule"
            } else if text.contains("cancel") {
                "cancel"
            } else {
                "confirm"
            };
            return Ok(ExecutorResultEvent::succeeded(
                command.execution_id,
                &command.tenant_id,
                &command.correlation_id,
                json!({"openclawOutput": {"intent": intent}}),
            ));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::ExecutorUnavailable("executor down".to_string()));
        }
        Ok(ExecutorResultEvent::succeeded(
            command.execution_id,
            &command.tenant_id,
            &command.correlation_id,
            json!({"openclawOutput": {"ok": true}}),
        ))
    }
}

fn test_config(dir: &Path) -> CoreConfig {
    CoreConfig {
        node_env: "test".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        log_level: "info".to_string(),
        database_url: dir.join("db"),
        database_migration_lock_timeout_ms: 1000,
        executor_url: "http://127.0.0.1:1".to_string(),
        openclaw_shared_token: "openclaw-token".to_string(),
        service_shared_token: SERVICE_TOKEN.to_string(),
        permission_manifest_version: "2026-07".to_string(),
        command_queue_file: dir.join("queue.json").to_string_lossy().into_owned(),
        fallback_queue_file: dir.join("fallback.json").to_string_lossy().into_owned(),
        audit_log_file: dir.join("audit.json").to_string_lossy().into_owned(),
        subscriptions_file: dir.join("subscriptions.json").to_string_lossy().into_owned(),
        dispatch_worker_interval_ms: 5000,
        dispatch_worker_max_attempts: 3,
        admin_username: "admin".to_string(),
        admin_password: "admin-secret".to_string(),
        booking_webhook_secret: String::new(),
        messaging_webhook_secret: String::new(),
        payment_webhook_secret: String::new(),
    }
}

fn setup(dir: &tempfile::TempDir) -> (Arc<CoreEngine>, Arc<StubExecutor>, Router) {
    let stub = Arc::new(StubExecutor::new());
    let engine = Arc::new(
        CoreEngine::new(test_config(dir.path()), stub.clone() as Arc<dyn ExecutorDispatch>)
            .unwrap(),
    );
    let router = aro_core::http::router(engine.clone());
    (engine, stub, router)
}

async fn request(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    authed: bool,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    if authed {
        builder = builder
            .header("Authorization", format!("Bearer {}", SERVICE_TOKEN))
            .header("X-Tenant-Id", TENANT)
            .header("Idempotency-Key", uuid::Uuid::new_v4().to_string());
    }
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let response = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(json!(null));
    (status, json)
}

fn booking_body(external_id: &str, phone: &str, hours_ahead: i64) -> Value {
    json!({
        "externalId": external_id,
        "customerPhone": phone,
        "appointmentDate": (Utc::now() + Duration::hours(hours_ahead)).to_rfc3339(),
        "serviceType": "Consultation",
        "serviceCost": 120.0
    })
}

async fn event_types(router: &Router) -> Vec<String> {
    let (_, body) = request(router, "GET", "/v1/events?limit=500", None, true).await;
    body["events"]
        .as_array()
        .unwrap_or(&Vec::new())
        .iter()
        .filter_map(|e| e["eventType"].as_str().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn happy_path_booking_reminder_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _stub, router) = setup(&dir);

    let (status, body) = request(
        &router,
        "POST",
        "/v1/webhooks/booking",
        Some(booking_body("cal_evt_100", "+15551234567", 72)),
        true,
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["appointment"]["status"], "pending_confirm");
    assert_eq!(
        body["dispatchedCommands"][0]["commandType"],
        "integration.twilio.send_sms"
    );
    assert_eq!(body["dispatchedCommands"][0]["dispatchStatus"], "enqueued");

    // reminder48hAt == appointmentDate - 48h
    let scheduled: chrono::DateTime<Utc> =
        body["appointment"]["scheduledAt"].as_str().unwrap().parse().unwrap();
    let reminder_48: chrono::DateTime<Utc> =
        body["reminders"]["reminder48hAt"].as_str().unwrap().parse().unwrap();
    assert_eq!(scheduled - reminder_48, Duration::hours(48));

    // One worker tick dispatches the reminder and appends message_sent
    engine.worker_tick().await.unwrap();
    let types = event_types(&router).await;
    assert!(types.contains(&"booking.received".to_string()));
    assert!(types.contains(&"executor.command.succeeded".to_string()));
    assert!(types.contains(&"message_sent".to_string()));

    // Inbound confirmation advances the appointment
    let (status, body) = request(
        &router,
        "POST",
        "/v1/webhooks/inbound-reply",
        Some(json!({"from": "+15551234567", "text": "Yes I confirm"})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["intent"], "confirm");

    let types = event_types(&router).await;
    assert!(types.contains(&"inbound.reply.received".to_string()));
    assert!(types.contains(&"reply_classified".to_string()));
    assert!(types.contains(&"appointment.confirmed".to_string()));
}

#[tokio::test]
async fn reschedule_intent_enqueues_link_without_confirming() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _stub, router) = setup(&dir);

    request(
        &router,
        "POST",
        "/v1/webhooks/booking",
        Some(booking_body("cal_evt_200", "+15559876543", 72)),
        true,
    )
    .await;

    let (status, body) = request(
        &router,
        "POST",
        "/v1/webhooks/inbound-reply",
        Some(json!({"from": "+15559876543", "text": "please reschedule me"})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["intent"], "reschedule");

    let types = event_types(&router).await;
    assert!(types.contains(&"reply_classified".to_string()));
    assert!(!types.contains(&"appointment.confirmed".to_string()));

    // The follow-up command is waiting in the queue
    let pending = engine.command_queue().due(Utc::now() + Duration::seconds(1));
    assert!(pending
        .iter()
        .any(|e| e.command.command_type == "integration.booking.request_reschedule_link"));
}

#[tokio::test]
async fn duplicate_booking_delivery_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _stub, router) = setup(&dir);
    let body = booking_body("cal_evt_300", "+15550001111", 72);

    let (_, first) = request(&router, "POST", "/v1/webhooks/booking", Some(body.clone()), true).await;
    let (status, second) = request(&router, "POST", "/v1/webhooks/booking", Some(body), true).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(first["appointment"]["id"], second["appointment"]["id"]);

    let types = event_types(&router).await;
    assert_eq!(
        types.iter().filter(|t| *t == "booking.received").count(),
        1
    );
    // Only the original delivery enqueued the reminder command
    assert_eq!(engine.command_queue().len(), 1);
}

#[tokio::test]
async fn inbound_rate_limit_trips_at_101() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, _stub, router) = setup(&dir);

    for _ in 0..100 {
        let (status, _) = request(&router, "GET", "/health", None, false).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = request(&router, "GET", "/health", None, false).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(body["error"]["retryAfter"], 60);
}

#[tokio::test]
async fn messaging_circuit_open_defers_to_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, stub, router) = setup(&dir);

    // Booking creates the customer, consent, and the first sms command
    let (_, booked) = request(
        &router,
        "POST",
        "/v1/webhooks/booking",
        Some(booking_body("cal_evt_400", "+15552223333", 72)),
        true,
    )
    .await;
    let customer_id = booked["appointment"]["customerId"].as_str().unwrap().to_string();

    // Four more sends, so one failing tick trips the threshold of five
    for i in 0..4 {
        let (status, _) = request(
            &router,
            "POST",
            &format!("/v1/commands?n={}", i),
            Some(json!({
                "commandType": "integration.twilio.send_sms",
                "payload": {"to": "+15552223333", "customerId": customer_id, "template": "custom"}
            })),
            true,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
    assert_eq!(engine.command_queue().len(), 5);

    stub.set_failing(true);
    engine.worker_tick().await.unwrap();

    // Circuit is now open; a fresh send gets deferred, not dispatched
    request(
        &router,
        "POST",
        "/v1/commands",
        Some(json!({
            "commandType": "integration.twilio.send_sms",
            "payload": {"to": "+15552223333", "customerId": customer_id, "template": "custom"}
        })),
        true,
    )
    .await;
    engine.worker_tick().await.unwrap();

    assert!(engine.fallback_queue().len() >= 1);
    let deferred = engine
        .fallback_queue()
        .drain_due(Utc::now() + Duration::seconds(120))
        .unwrap();
    let entry = deferred
        .iter()
        .find(|e| e.reason == "CIRCUIT_BREAKER_OPEN")
        .expect("a deferred send with the circuit-open reason");
    let eta = entry.scheduled_for - Utc::now();
    assert!(eta > Duration::seconds(50) && eta <= Duration::seconds(61));
}

#[tokio::test]
async fn duplicate_command_idempotency_key_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _stub, router) = setup(&dir);

    // Consent comes from a booking
    request(
        &router,
        "POST",
        "/v1/webhooks/booking",
        Some(booking_body("cal_evt_500", "+15554445555", 72)),
        true,
    )
    .await;
    let enqueued_before = engine.command_queue().len();

    let send = |idempotency_key: &'static str| {
        let router = router.clone();
        async move {
            let response = router
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/v1/commands")
                        .header("Content-Type", "application/json")
                        .header("Authorization", format!("Bearer {}", SERVICE_TOKEN))
                        .header("X-Tenant-Id", TENANT)
                        .header("Idempotency-Key", idempotency_key)
                        .body(Body::from(
                            json!({
                                "commandType": "integration.twilio.send_sms",
                                "payload": {"to": "+15554445555", "template": "custom"}
                            })
                            .to_string(),
                        ))
                        .unwrap(),
                )
                .await
                .unwrap();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            serde_json::from_slice::<Value>(&bytes).unwrap()
        }
    };

    let first = send("idem-1").await;
    let second = send("idem-1").await;
    assert_eq!(first["executionId"], second["executionId"]);
    assert_eq!(engine.command_queue().len(), enqueued_before + 1);

    let types = event_types(&router).await;
    assert_eq!(
        types.iter().filter(|t| *t == "command.accepted").count(),
        1
    );
}

#[tokio::test]
async fn opted_out_customer_send_is_suppressed() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _stub, router) = setup(&dir);

    request(
        &router,
        "POST",
        "/v1/webhooks/booking",
        Some(booking_body("cal_evt_600", "+15556667777", 72)),
        true,
    )
    .await;

    let (status, _) = request(
        &router,
        "POST",
        "/v1/privacy/opt-out",
        Some(json!({"phone": "+15556667777"})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    engine.worker_tick().await.unwrap();

    // The reminder send was suppressed and dead-lettered for the admin
    let types = event_types(&router).await;
    assert!(!types.contains(&"message_sent".to_string()));
    let dead = engine.state_store().dead_letters(false).unwrap();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].error.contains("consent"));

    // And the audit trail shows the suppression, with the chain intact
    let audit = engine.audit_chain();
    assert!(audit
        .entries()
        .iter()
        .any(|e| e.action == "guardrail.suppressed_send"));
    assert!(audit.verify().valid);
}

#[tokio::test]
async fn dispatch_exhaustion_dead_letters_with_event() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, stub, router) = setup(&dir);

    request(
        &router,
        "POST",
        "/v1/webhooks/booking",
        Some(booking_body("cal_evt_950", "+15557770000", 72)),
        true,
    )
    .await;

    stub.set_failing(true);
    // Three failing attempts; backoff is short at low attempt counts
    for _ in 0..3 {
        engine.worker_tick().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(700)).await;
    }

    assert!(engine.command_queue().is_empty());
    let dead = engine.state_store().dead_letters(false).unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 3);

    let types = event_types(&router).await;
    assert!(types.contains(&"command.dispatch.dlq".to_string()));

    // Admin re-queues it once the executor is healthy again
    stub.set_failing(false);
    engine.dlq_retry(dead[0].id).unwrap();
    assert_eq!(engine.command_queue().len(), 1);
    engine.worker_tick().await.unwrap();
    let types = event_types(&router).await;
    assert!(types.contains(&"message_sent".to_string()));
}

#[tokio::test]
async fn no_show_pattern_starts_recovery_and_completion_requests_review() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _stub, router) = setup(&dir);

    // Two appointments that both end as no-shows
    for (i, external_id) in ["cal_evt_960", "cal_evt_961"].iter().enumerate() {
        let (_, booked) = request(
            &router,
            "POST",
            "/v1/webhooks/booking",
            Some(booking_body(external_id, "+15551112222", 72 + i as i64)),
            true,
        )
        .await;
        let appointment_id: uuid::Uuid =
            booked["appointment"]["id"].as_str().unwrap().parse().unwrap();
        engine
            .apply_transition(
                appointment_id,
                aro_state::AppointmentStatus::NoShow,
                aro_core::guardrails::Actor::Admin,
            )
            .unwrap();
    }

    let customer = engine
        .state_store()
        .customer_by_phone(TENANT, "+15551112222")
        .unwrap()
        .unwrap();
    assert_eq!(customer.no_show_count, 2);
    assert_eq!(customer.risk_score, 40);

    // The win-back send is queued behind the two reminder sends
    let queued: Vec<String> = engine
        .command_queue()
        .due(Utc::now())
        .iter()
        .filter_map(|e| {
            e.command
                .payload
                .get("template")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .collect();
    assert!(queued.contains(&"no_show_recovery".to_string()));

    // A completed appointment asks for a review
    let (_, booked) = request(
        &router,
        "POST",
        "/v1/webhooks/booking",
        Some(booking_body("cal_evt_962", "+15553337777", 72)),
        true,
    )
    .await;
    let appointment_id: uuid::Uuid =
        booked["appointment"]["id"].as_str().unwrap().parse().unwrap();
    engine
        .apply_transition(
            appointment_id,
            aro_state::AppointmentStatus::Confirmed,
            aro_core::guardrails::Actor::Customer,
        )
        .unwrap();
    engine
        .apply_transition(
            appointment_id,
            aro_state::AppointmentStatus::InProgress,
            aro_core::guardrails::Actor::Admin,
        )
        .unwrap();
    engine
        .apply_transition(
            appointment_id,
            aro_state::AppointmentStatus::Completed,
            aro_core::guardrails::Actor::Admin,
        )
        .unwrap();

    let queued: Vec<String> = engine
        .command_queue()
        .due(Utc::now())
        .iter()
        .filter_map(|e| {
            e.command
                .payload
                .get("template")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .collect();
    assert!(queued.contains(&"review_request".to_string()));

    // The system itself may never cancel
    let err = engine
        .apply_transition(
            appointment_id,
            aro_state::AppointmentStatus::Cancelled,
            aro_core::guardrails::Actor::System,
        )
        .unwrap_err();
    assert!(err.to_string().contains("forbidden"));
}

#[tokio::test]
async fn unauthorized_and_unknown_routes_use_the_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, _stub, router) = setup(&dir);

    let (status, body) = request(&router, "GET", "/v1/events", None, false).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, body) = request(&router, "GET", "/v1/nope", None, true).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "ROUTE_NOT_FOUND");
}

#[tokio::test]
async fn admin_flow_token_audit_and_override() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _stub, router) = setup(&dir);

    let (_, booked) = request(
        &router,
        "POST",
        "/v1/webhooks/booking",
        Some(booking_body("cal_evt_700", "+15558889999", 72)),
        true,
    )
    .await;
    let appointment_id = booked["appointment"]["id"].as_str().unwrap().to_string();

    // Wrong password refused
    let (status, _) = request(
        &router,
        "POST",
        "/v1/admin/auth/token",
        Some(json!({"username": "admin", "password": "wrong"})),
        false,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = request(
        &router,
        "POST",
        "/v1/admin/auth/token",
        Some(json!({"username": "admin", "password": "admin-secret"})),
        false,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    // Override through a valid transition
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/admin/manual-overrides")
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::from(
                    json!({
                        "action": "mark_confirmed",
                        "appointmentId": appointment_id,
                        "reason": "phone confirmation"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Audit chain lists the override and verifies
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/admin/audit/logs")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["integrity"]["valid"], true);
    assert!(body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["action"] == "manual_override"));

    let appointment = engine
        .state_store()
        .appointment(appointment_id.parse().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(appointment.status, aro_state::AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn privacy_export_and_delete_cascade() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _stub, router) = setup(&dir);

    let (_, booked) = request(
        &router,
        "POST",
        "/v1/webhooks/booking",
        Some(booking_body("cal_evt_800", "+15553334444", 72)),
        true,
    )
    .await;
    let customer_id = booked["appointment"]["customerId"].as_str().unwrap().to_string();
    let appointment_id: uuid::Uuid =
        booked["appointment"]["id"].as_str().unwrap().parse().unwrap();

    let (status, export) = request(
        &router,
        "GET",
        &format!("/v1/privacy/export/{}", customer_id),
        None,
        true,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(export["customer"]["phone"], "+15553334444");
    assert_eq!(export["appointments"].as_array().unwrap().len(), 1);
    assert_eq!(export["consent"]["granted"], true);

    // A caller scoped to another tenant cannot see or delete this customer
    let cross_tenant = |method: &'static str, uri: String| {
        let router = router.clone();
        async move {
            router
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .header("Authorization", format!("Bearer {}", SERVICE_TOKEN))
                        .header("X-Tenant-Id", "tenant-other")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap()
                .status()
        }
    };
    assert_eq!(
        cross_tenant("GET", format!("/v1/privacy/export/{}", customer_id)).await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        cross_tenant("DELETE", format!("/v1/privacy/delete/{}", customer_id)).await,
        StatusCode::NOT_FOUND
    );
    assert!(engine
        .state_store()
        .customer(customer_id.parse().unwrap())
        .unwrap()
        .is_some());

    // The booking created a workflow instance that the cascade must remove
    assert!(!engine
        .state_store()
        .workflows_for_appointment(appointment_id)
        .unwrap()
        .is_empty());

    let (status, _) = request(
        &router,
        "DELETE",
        &format!("/v1/privacy/delete/{}", customer_id),
        None,
        true,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(engine
        .state_store()
        .customer(customer_id.parse().unwrap())
        .unwrap()
        .is_none());
    assert!(engine
        .state_store()
        .workflows_for_appointment(appointment_id)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn events_are_ordered_per_aggregate_with_stable_cursors() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, _stub, router) = setup(&dir);

    for i in 0..3 {
        request(
            &router,
            "POST",
            "/v1/webhooks/booking",
            Some(booking_body(
                &format!("cal_evt_9{:02}", i),
                &format!("+1555000{:04}", i),
                72 + i as i64,
            )),
            true,
        )
        .await;
    }

    let (_, page) = request(&router, "GET", "/v1/events?limit=2", None, true).await;
    let events = page["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    let next = page["nextCursor"].as_u64().unwrap();
    assert_eq!(next, events[1]["replayCursor"].as_u64().unwrap());

    let (_, rest) = request(
        &router,
        "GET",
        &format!("/v1/events?after={}&limit=500", next),
        None,
        true,
    )
    .await;
    for event in rest["events"].as_array().unwrap() {
        assert!(event["replayCursor"].as_u64().unwrap() > next);
    }
}
