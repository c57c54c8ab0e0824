//! Request pipeline middleware

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::CoreEngine;
use crate::error::CoreError;

/// Correlation id attached to every request
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// Hook 1: inbound token bucket, 100 requests per rolling 60 s keyed by
/// `X-Forwarded-For` (default key "local").
pub async fn inbound_rate_limit(
    State(engine): State<Arc<CoreEngine>>,
    request: Request,
    next: Next,
) -> Response {
    let key = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "local".to_string());

    if engine.inbound_limiter().try_acquire(&key).is_err() {
        warn!(key = %key, "inbound rate limit exceeded");
        return CoreError::RateLimited {
            retry_after_secs: 60,
        }
        .into_response();
    }
    next.run(request).await
}

/// Hook 3: assign or echo the correlation id; always echoed on the response
pub async fn correlation(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert("X-Correlation-Id", value);
    }
    info!(correlation_id = %correlation_id, status = %response.status(), "request handled");
    response
}

/// Hook 2: bearer service token plus tenant header on service routes
pub async fn service_auth(
    State(engine): State<Arc<CoreEngine>>,
    request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let expected = engine.config().service_shared_token.as_bytes();
    let authorized = bearer
        .map(|token| bool::from(token.as_bytes().ct_eq(expected)))
        .unwrap_or(false);
    if !authorized {
        return CoreError::Unauthorized.into_response();
    }

    let tenant_present = request
        .headers()
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);
    if !tenant_present {
        return CoreError::Validation("X-Tenant-Id header is required".to_string()).into_response();
    }

    next.run(request).await
}
