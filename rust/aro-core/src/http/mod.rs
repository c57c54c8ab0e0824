//! HTTP surface of the Core Engine
//!
//! Pipeline per request: inbound token bucket, service auth (on `/v1/*`
//! service routes), correlation id, validation, handler, error mapping.
//! Every response carries the uniform error envelope on failure and the
//! correlation id always.

pub mod handlers;
pub mod middleware;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;

use aro_contracts::{ErrorCode, ErrorEnvelope};

use crate::engine::CoreEngine;
use crate::error::CoreError;

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status =
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut envelope = ErrorEnvelope::new(code, self.to_string());
        if let Some(retry_after) = self.retry_after() {
            envelope = envelope.with_retry_after(retry_after);
        }
        if code == ErrorCode::InternalError {
            // Never leak internals; the log has the detail
            envelope.error.message = "internal error".to_string();
        }
        let mut response = (status, Json(envelope)).into_response();
        if let Some(retry_after) = self.retry_after() {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

/// Build the Core router with the full request pipeline
pub fn router(engine: Arc<CoreEngine>) -> Router {
    let service_routes = Router::new()
        .route("/v1/commands", post(handlers::submit_command))
        .route("/v1/events", get(handlers::list_events))
        .route("/v1/subscriptions", post(handlers::create_subscription))
        .route(
            "/v1/subscriptions/:id/replay",
            post(handlers::replay_subscription),
        )
        .route("/v1/webhooks/booking", post(handlers::webhook_booking))
        .route(
            "/v1/webhooks/inbound-reply",
            post(handlers::webhook_inbound_reply),
        )
        .route("/v1/webhooks/payment", post(handlers::webhook_payment))
        .route("/v1/privacy/consent", post(handlers::privacy_consent))
        .route("/v1/privacy/opt-out", post(handlers::privacy_opt_out))
        .route("/v1/privacy/export/:id", get(handlers::privacy_export))
        .route("/v1/privacy/delete/:id", delete(handlers::privacy_delete))
        .layer(axum::middleware::from_fn_with_state(
            engine.clone(),
            middleware::service_auth,
        ));

    let admin_routes = Router::new()
        .route("/v1/admin/auth/token", post(handlers::admin_token))
        .route("/v1/admin/audit/logs", get(handlers::audit_logs))
        .route(
            "/v1/admin/manual-overrides",
            post(handlers::manual_override),
        )
        .route("/v1/admin/dlq", get(handlers::dlq_list))
        .route("/v1/admin/dlq/:id/retry", post(handlers::dlq_retry))
        .route("/v1/admin/dlq/:id/archive", post(handlers::dlq_archive));

    Router::new()
        .merge(service_routes)
        .merge(admin_routes)
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .fallback(handlers::not_found)
        .layer(axum::middleware::from_fn(middleware::correlation))
        .layer(axum::middleware::from_fn_with_state(
            engine.clone(),
            middleware::inbound_rate_limit,
        ))
        .with_state(engine)
}
