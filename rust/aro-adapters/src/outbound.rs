//! Resilient outbound pipeline shared by all adapters
//!
//! Every provider call passes token bucket -> circuit breaker -> retry
//! wrapper, in that order. The bucket waits (outbound discipline), the
//! breaker fails fast with a retry hint, and only transient errors are
//! retried.

use std::sync::Arc;

use aro_resilience::{retry_with_backoff, BreakerError, CircuitBreaker, RetryConfig, TokenBucket};

use crate::error::{AdapterError, AdapterResult};

/// Composes the resilience layers around a provider call
pub struct ResilientSender {
    bucket: Arc<TokenBucket>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
}

impl ResilientSender {
    pub fn new(bucket: Arc<TokenBucket>, breaker: Arc<CircuitBreaker>, retry: RetryConfig) -> Self {
        Self {
            bucket,
            breaker,
            retry,
        }
    }

    /// Breaker guarding this sender's provider domain
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `operation` under the full resilience pipeline
    pub async fn send<F, Fut, T>(&self, operation: F) -> AdapterResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = AdapterResult<T>>,
    {
        self.bucket.acquire().await;

        let result = self
            .breaker
            .execute(|| {
                retry_with_backoff(&self.retry, AdapterError::is_retryable, &operation)
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(BreakerError::Open { retry_after }) => Err(AdapterError::Unavailable {
                retry_after_secs: retry_after.as_secs().max(1),
            }),
            Err(BreakerError::Inner(e)) => Err(e),
        }
    }
}
