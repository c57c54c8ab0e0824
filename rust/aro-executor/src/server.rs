//! HTTP surface of the Executor

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tracing::info;

use aro_contracts::{ErrorEnvelope, ExecutorCommand};

use crate::error::ExecutorError;
use crate::service::ExecutorService;

/// Build the Executor router
pub fn router(service: Arc<ExecutorService>) -> Router {
    Router::new()
        .route("/v1/executions", post(execute))
        .route("/health", get(health))
        .with_state(service)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn error_response(err: ExecutorError) -> Response {
    let code = err.code();
    let status =
        StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut envelope = ErrorEnvelope::new(code, err.to_string());
    if let Some(retry_after) = err.retry_after() {
        envelope = envelope.with_retry_after(retry_after);
    }
    let mut response = (status, Json(envelope)).into_response();
    if let Some(retry_after) = err.retry_after() {
        if let Ok(value) = retry_after.to_string().parse() {
            response.headers_mut().insert("Retry-After", value);
        }
    }
    response
}

async fn execute(
    State(service): State<Arc<ExecutorService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let command: ExecutorCommand = match serde_json::from_slice(&body) {
        Ok(command) => command,
        Err(e) => {
            return error_response(ExecutorError::Validation(format!(
                "invalid execution body: {}",
                e
            )));
        }
    };

    let tenant_header = headers.get("x-tenant-id").and_then(|v| v.to_str().ok());
    match service
        .execute(bearer(&headers), tenant_header, command)
        .await
    {
        Ok(event) => (StatusCode::OK, Json(event)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn health() -> impl IntoResponse {
    info!("health probe");
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "aro-executor",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
