//! Circuit breaker to stop calling a consistently failing dependency.
//!
//! # State Transitions
//! ```text
//! Closed   → Open:     failure_threshold consecutive failures
//! Open     → HalfOpen: first call after reset_timeout since the last failure
//! HalfOpen → Closed:   success_threshold consecutive successes
//! HalfOpen → Open:     any failure
//! ```
//!
//! The Open → HalfOpen move happens lazily when a call arrives; there is no
//! timer. One breaker guards one dependency, shared by every request.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use bulwark_core::{Invocation, InvokeError, Invoker};

use crate::config::duration_human;

/// Consecutive half-open successes needed to close the circuit.
pub const SUCCESS_THRESHOLD: u32 = 3;

/// Consecutive closed-state failures needed to open the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Time after the last failure before a probe is allowed.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures before opening circuit
    pub failure_threshold: u32,

    /// Time since the last failure before attempting recovery
    #[serde(with = "duration_human")]
    pub reset_timeout: Duration,

    /// Successes needed to close circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            success_threshold: SUCCESS_THRESHOLD,
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Calls are rejected locally
    Open,

    /// Calls are let through to test recovery
    HalfOpen,
}

/// Point-in-time view of a breaker, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure_at: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_failure_at: None,
        }
    }
}

/// Circuit breaker prevents cascade failures.
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerState::closed()),
            config,
        }
    }

    /// Ask permission to make a call.
    ///
    /// Moves Open → HalfOpen if `reset_timeout` has passed since the last
    /// failure; otherwise rejects with `CircuitOpen`.
    pub fn try_acquire(&self) -> Result<(), InvokeError> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let since_failure = inner
            .last_failure_at
            .map(|at| at.elapsed())
            .unwrap_or(self.config.reset_timeout);

        if since_failure >= self.config.reset_timeout {
            inner.state = CircuitState::HalfOpen;
            inner.successes = 0;
            tracing::info!("Circuit transitioning to half-open for recovery test");
            Ok(())
        } else {
            Err(InvokeError::CircuitOpen {
                retry_in: self.config.reset_timeout - since_failure,
            })
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    tracing::info!("Circuit closed after successful recovery");
                }
            }
            // A call admitted before the circuit opened finished late
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Instant::now());
        inner.failures = inner.failures.saturating_add(1);

        match inner.state {
            CircuitState::Closed => {
                if inner.failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.successes = 0;
                    tracing::warn!(
                        failures = inner.failures,
                        "Circuit opened after repeated failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.successes = 0;
                tracing::warn!("Circuit reopened after failed recovery attempt");
            }
            CircuitState::Open => {}
        }
    }

    /// Current state. Never changes it.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Failures counted since the last reset of the counter.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    /// State and counters together.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failures,
            success_count: inner.successes,
        }
    }

    /// Reset to closed with cleared counters.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerState::closed();
    }

    /// Active configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

/// Layer guarding its inner implementer with a [`CircuitBreaker`].
pub struct CircuitBreakerLayer<I> {
    inner: I,
    breaker: Arc<CircuitBreaker>,
}

impl<I> CircuitBreakerLayer<I> {
    /// Wrap `inner` with a shared breaker.
    pub fn new(inner: I, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    /// The breaker this layer consults.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl<Req, Resp, I> Invoker<Req, Resp> for CircuitBreakerLayer<I>
where
    I: Invoker<Req, Resp>,
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    async fn invoke(&self, request: &Req) -> Result<Resp, InvokeError> {
        self.invoke_with_source(request).await.result
    }

    async fn invoke_with_source(&self, request: &Req) -> Invocation<Resp> {
        if let Err(rejection) = self.breaker.try_acquire() {
            tracing::debug!(invoker = self.inner.name(), "Circuit open, rejecting call");
            return Invocation::remote(Err(rejection));
        }

        let invocation = self.inner.invoke_with_source(request).await;
        // Cached responses say nothing about the remote's health
        if !invocation.from_cache() {
            match &invocation.result {
                Ok(_) => self.breaker.record_success(),
                Err(_) => self.breaker.record_failure(),
            }
        }
        invocation
    }

    fn name(&self) -> &str {
        "circuit_breaker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tripped(threshold: u32) -> CircuitBreaker {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            ..Default::default()
        });
        for _ in 0..threshold {
            cb.record_failure();
        }
        cb
    }

    #[tokio::test]
    async fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_after_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        match cb.try_acquire() {
            Err(InvokeError::CircuitOpen { retry_in }) => {
                assert_eq!(retry_in, DEFAULT_RESET_TIMEOUT)
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let cb = CircuitBreaker::default();

        for _ in 0..4 {
            cb.record_failure();
        }
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);

        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_reset_timeout() {
        let cb = tripped(DEFAULT_FAILURE_THRESHOLD);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cb.try_acquire().is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        // Querying state does not trigger the transition
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = tripped(DEFAULT_FAILURE_THRESHOLD);
        tokio::time::advance(DEFAULT_RESET_TIMEOUT).await;
        assert!(cb.try_acquire().is_ok());

        cb.record_success();
        cb.record_failure();

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.success_count, 0);
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_success_threshold() {
        let cb = tripped(DEFAULT_FAILURE_THRESHOLD);
        tokio::time::advance(DEFAULT_RESET_TIMEOUT).await;
        assert!(cb.try_acquire().is_ok());

        for _ in 0..SUCCESS_THRESHOLD - 1 {
            cb.record_success();
            assert_eq!(cb.state(), CircuitState::HalfOpen);
        }
        cb.record_success();

        assert_eq!(
            cb.snapshot(),
            CircuitSnapshot {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
            }
        );
    }

    struct CacheHit;

    #[async_trait]
    impl Invoker<String, String> for CacheHit {
        async fn invoke(&self, request: &String) -> Result<String, InvokeError> {
            Ok(request.clone())
        }

        async fn invoke_with_source(&self, request: &String) -> Invocation<String> {
            Invocation::cached(request.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_layer_ignores_cached_responses() {
        let breaker = Arc::new(tripped(DEFAULT_FAILURE_THRESHOLD));
        let layer = CircuitBreakerLayer::new(CacheHit, breaker.clone());
        let request = "q".to_string();

        // Open rejects before anything below is consulted
        assert!(matches!(
            layer.invoke(&request).await,
            Err(InvokeError::CircuitOpen { .. })
        ));

        tokio::time::advance(DEFAULT_RESET_TIMEOUT).await;
        for _ in 0..SUCCESS_THRESHOLD + 1 {
            assert_eq!(layer.invoke(&request).await.unwrap(), "q");
        }

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::HalfOpen);
        assert_eq!(snapshot.success_count, 0);
    }

    #[tokio::test]
    async fn test_reset() {
        let cb = tripped(1);
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }
}
