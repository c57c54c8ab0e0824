//! Circuit breaker - fault tolerance for provider domains
//!
//! CLOSED counts consecutive failures inside a monitoring window and trips
//! to OPEN at the threshold. OPEN fails fast with a retry-after hint until
//! the timeout elapses, then HALF_OPEN admits trial calls; enough
//! consecutive successes close the circuit, any failure reopens it.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

/// Provider domains each guarded by their own breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderDomain {
    Messaging,
    Booking,
    Payment,
}

impl std::fmt::Display for ProviderDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderDomain::Messaging => write!(f, "messaging"),
            ProviderDomain::Booking => write!(f, "booking"),
            ProviderDomain::Payment => write!(f, "payment"),
        }
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing, rejecting requests
    Open,
    /// Testing recovery
    HalfOpen,
}

/// Breaker tuning per provider domain
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures within the monitoring window that trip the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// How long the circuit stays open before a trial is allowed
    pub timeout: Duration,
    /// Window in which consecutive failures must accumulate
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(120),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    first_failure: Option<Instant>,
    opened_at: Option<Instant>,
}

/// Persistable view of breaker state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
}

/// Error surfaced by the breaker wrapper
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Circuit is open; retry no sooner than the hint
    #[error("Circuit breaker is open (retry after {retry_after:?})")]
    Open { retry_after: Duration },

    /// The wrapped operation failed
    #[error(transparent)]
    Inner(E),
}

/// Circuit breaker for one provider domain
pub struct CircuitBreaker {
    domain: ProviderDomain,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(domain: ProviderDomain, config: CircuitBreakerConfig) -> Self {
        Self {
            domain,
            config,
            inner: RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                first_failure: None,
                opened_at: None,
            }),
        }
    }

    /// Restore from a persisted snapshot. A previously OPEN circuit starts
    /// HALF_OPEN so the first call after a cold start is a trial.
    pub fn restore(domain: ProviderDomain, config: CircuitBreakerConfig, snapshot: &BreakerSnapshot) -> Self {
        let state = match snapshot.state {
            CircuitState::Open => {
                warn!(domain = %domain, "restoring open circuit as half-open after cold start");
                CircuitState::HalfOpen
            }
            other => other,
        };
        let breaker = Self::new(domain, config);
        {
            // Fresh lock, no contention yet
            let mut inner = breaker.inner.try_write().expect("unshared breaker");
            inner.state = state;
        }
        breaker
    }

    pub fn domain(&self) -> ProviderDomain {
        self.domain
    }

    /// Admit or reject a call without executing it.
    ///
    /// `Err` carries the remaining open time as a retry-after hint.
    pub async fn admit(&self) -> Result<(), Duration> {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    Ok(())
                } else {
                    Err(self.config.timeout - elapsed)
                }
            }
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        inner.failure_count = 0;
        inner.first_failure = None;
        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= self.config.success_threshold {
                inner.state = CircuitState::Closed;
                inner.success_count = 0;
                inner.opened_at = None;
            }
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.failure_count = 0;
            inner.first_failure = None;
            return;
        }

        // Consecutive failures only count inside the monitoring window
        let now = Instant::now();
        match inner.first_failure {
            Some(first) if now.duration_since(first) <= self.config.monitoring_period => {
                inner.failure_count += 1;
            }
            _ => {
                inner.first_failure = Some(now);
                inner.failure_count = 1;
            }
        }

        if inner.failure_count >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            warn!(domain = %self.domain, "circuit opened");
        }
    }

    /// Execute an operation under breaker protection
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if let Err(retry_after) = self.admit().await {
            return Err(BreakerError::Open { retry_after });
        }
        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Current state
    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// Snapshot for persistence
    pub async fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.inner.read().await.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(timeout_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_millis(timeout_ms),
            monitoring_period: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(ProviderDomain::Messaging, config(60_000));
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        let retry_after = breaker.admit().await.unwrap_err();
        assert!(retry_after <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn success_resets_the_failure_streak() {
        let breaker = CircuitBreaker::new(ProviderDomain::Messaging, config(60_000));
        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_after_timeout_then_closes_on_successes() {
        let breaker = CircuitBreaker::new(ProviderDomain::Booking, config(10));
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        breaker.admit().await.unwrap();
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        breaker.record_success().await;
        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(ProviderDomain::Payment, config(10));
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        breaker.admit().await.unwrap();
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn execute_fails_fast_when_open() {
        let breaker = CircuitBreaker::new(ProviderDomain::Messaging, config(60_000));
        for _ in 0..3 {
            let _ = breaker
                .execute(|| async { Err::<(), _>("provider down") })
                .await;
        }
        let result = breaker.execute(|| async { Ok::<_, &str>(42) }).await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn restored_open_snapshot_becomes_half_open() {
        let snapshot = BreakerSnapshot {
            state: CircuitState::Open,
        };
        let breaker =
            CircuitBreaker::restore(ProviderDomain::Messaging, config(60_000), &snapshot);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }
}
