//! Route handlers
//!
//! Thin: authenticate, pull headers and body apart, call one engine
//! operation, map the result. All domain logic lives in the engine.

use axum::body::Bytes;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use aro_contracts::{CommandEnvelope, CommandHeaders};

use crate::engine::{CoreEngine, OverrideAction};
use crate::error::CoreError;
use crate::http::middleware::CorrelationId;

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn tenant_id(headers: &HeaderMap) -> Result<String, CoreError> {
    header(headers, "x-tenant-id")
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| CoreError::Validation("X-Tenant-Id header is required".to_string()))
}

fn bearer<'h>(headers: &'h HeaderMap) -> Option<&'h str> {
    header(headers, "authorization").and_then(|v| v.strip_prefix("Bearer "))
}

// ---- commands ----

pub async fn submit_command(
    State(engine): State<Arc<CoreEngine>>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, CoreError> {
    let envelope: CommandEnvelope = serde_json::from_slice(&body)
        .map_err(|e| CoreError::Validation(format!("invalid command envelope: {}", e)))?;
    let command_headers = CommandHeaders {
        tenant_id: tenant_id(&headers)?,
        idempotency_key: header(&headers, "idempotency-key")
            .unwrap_or_default()
            .to_string(),
        correlation_id: correlation.0.clone(),
    };
    let response = engine.submit_command(&command_headers, &envelope)?;
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

// ---- events & subscriptions ----

pub async fn list_events(
    State(engine): State<Arc<CoreEngine>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, CoreError> {
    let tenant = match params.get("tenantId") {
        Some(tenant) if !tenant.trim().is_empty() => tenant.clone(),
        _ => tenant_id(&headers)?,
    };
    let after = params
        .get("after")
        .map(|v| {
            v.parse::<u64>()
                .map_err(|_| CoreError::Validation("after must be a cursor".to_string()))
        })
        .transpose()?;
    let limit = params
        .get("limit")
        .map(|v| {
            v.parse::<usize>()
                .map_err(|_| CoreError::Validation("limit must be a number".to_string()))
        })
        .transpose()?;
    let response = engine.events_after(&tenant, after, limit)?;
    Ok(Json(response).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionBody {
    #[serde(default)]
    pub callback_url: Option<String>,
}

pub async fn create_subscription(
    State(engine): State<Arc<CoreEngine>>,
    headers: HeaderMap,
    Json(body): Json<CreateSubscriptionBody>,
) -> Result<Response, CoreError> {
    let tenant = tenant_id(&headers)?;
    let response = engine.create_subscription(&tenant, body.callback_url)?;
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayBody {
    #[serde(default)]
    pub after: Option<u64>,
}

pub async fn replay_subscription(
    State(engine): State<Arc<CoreEngine>>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReplayBody>>,
) -> Result<Response, CoreError> {
    let after = body.and_then(|Json(b)| b.after);
    let response = engine.replay_subscription(id, after)?;
    Ok(Json(response).into_response())
}

// ---- webhooks ----

pub async fn webhook_booking(
    State(engine): State<Arc<CoreEngine>>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, CoreError> {
    let tenant = tenant_id(&headers)?;
    let signature = header(&headers, "calendly-webhook-signature");
    let response = engine.ingest_booking(&tenant, &correlation.0, &body, signature)?;
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

pub async fn webhook_inbound_reply(
    State(engine): State<Arc<CoreEngine>>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, CoreError> {
    let tenant = tenant_id(&headers)?;
    let signature = header(&headers, "x-twilio-signature");
    let response = engine
        .ingest_inbound_reply(&tenant, &correlation.0, &body, signature)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

pub async fn webhook_payment(
    State(engine): State<Arc<CoreEngine>>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, CoreError> {
    let tenant = tenant_id(&headers)?;
    let signature = header(&headers, "stripe-signature");
    let response = engine.ingest_payment(&tenant, &correlation.0, &body, signature)?;
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

// ---- health ----

pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "aro-core",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

pub async fn ready(State(engine): State<Arc<CoreEngine>>) -> impl IntoResponse {
    let (ready, checks) = engine.readiness();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(serde_json::json!({ "ready": ready, "checks": checks })))
}

pub async fn not_found() -> CoreError {
    CoreError::RouteNotFound
}

// ---- admin ----

#[derive(Debug, Deserialize)]
pub struct AdminLoginBody {
    pub username: String,
    pub password: String,
}

pub async fn admin_token(
    State(engine): State<Arc<CoreEngine>>,
    Json(body): Json<AdminLoginBody>,
) -> Result<Response, CoreError> {
    let response = engine.admin_login(&body.username, &body.password)?;
    Ok(Json(response).into_response())
}

pub async fn audit_logs(
    State(engine): State<Arc<CoreEngine>>,
    headers: HeaderMap,
) -> Result<Response, CoreError> {
    engine.require_admin(bearer(&headers))?;
    Ok(Json(engine.audit_logs()).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualOverrideBody {
    pub action: OverrideAction,
    pub appointment_id: Uuid,
    pub reason: String,
}

pub async fn manual_override(
    State(engine): State<Arc<CoreEngine>>,
    headers: HeaderMap,
    Json(body): Json<ManualOverrideBody>,
) -> Result<Response, CoreError> {
    engine.require_admin(bearer(&headers))?;
    let response =
        engine.manual_override("api", body.action, body.appointment_id, &body.reason)?;
    Ok(Json(response).into_response())
}

pub async fn dlq_list(
    State(engine): State<Arc<CoreEngine>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, CoreError> {
    engine.require_admin(bearer(&headers))?;
    let include_archived = params
        .get("includeArchived")
        .map(|v| v == "true")
        .unwrap_or(false);
    Ok(Json(engine.dlq_list(include_archived)?).into_response())
}

pub async fn dlq_retry(
    State(engine): State<Arc<CoreEngine>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, CoreError> {
    engine.require_admin(bearer(&headers))?;
    Ok(Json(engine.dlq_retry(id)?).into_response())
}

pub async fn dlq_archive(
    State(engine): State<Arc<CoreEngine>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, CoreError> {
    engine.require_admin(bearer(&headers))?;
    Ok(Json(engine.dlq_archive(id)?).into_response())
}

// ---- privacy ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentBody {
    pub phone: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

pub async fn privacy_consent(
    State(engine): State<Arc<CoreEngine>>,
    headers: HeaderMap,
    Json(body): Json<ConsentBody>,
) -> Result<Response, CoreError> {
    let tenant = tenant_id(&headers)?;
    let response = engine.privacy_consent(&tenant, &body.phone, body.method, body.ip)?;
    Ok(Json(response).into_response())
}

#[derive(Debug, Deserialize)]
pub struct OptOutBody {
    pub phone: String,
}

pub async fn privacy_opt_out(
    State(engine): State<Arc<CoreEngine>>,
    headers: HeaderMap,
    Json(body): Json<OptOutBody>,
) -> Result<Response, CoreError> {
    let tenant = tenant_id(&headers)?;
    let response = engine.privacy_opt_out(&tenant, &body.phone)?;
    Ok(Json(response).into_response())
}

pub async fn privacy_export(
    State(engine): State<Arc<CoreEngine>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, CoreError> {
    let tenant = tenant_id(&headers)?;
    Ok(Json(engine.privacy_export(&tenant, id)?).into_response())
}

pub async fn privacy_delete(
    State(engine): State<Arc<CoreEngine>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, CoreError> {
    let tenant = tenant_id(&headers)?;
    Ok(Json(engine.privacy_delete(&tenant, id)?).into_response())
}
