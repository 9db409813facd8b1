//! Composition of the resilience layers.
//!
//! ```text
//! Monitoring → CircuitBreaker → Retry → Cache → [Timeout] → base
//! ```
//!
//! Each layer holds only its inner implementer. Diagnostics are read from
//! shared state handles (monitor, breaker, cache), never by calling
//! through the stack.

use async_trait::async_trait;
use std::sync::Arc;

use bulwark_core::{CacheKeyed, Invocation, InvokeError, Invoker};

use crate::batch::{self, BatchOutcome};
use crate::cache::{CacheLayer, CacheStats, ResponseCache};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerLayer, CircuitSnapshot};
use crate::config::ResilienceConfig;
use crate::monitoring::{
    ErrorMetricsSnapshot, ErrorMonitor, ErrorObserver, HealthStatus, MonitoringLayer,
};
use crate::retry::{RetryLayer, RetryPolicy};
use crate::timeout::TimeoutLayer;

type SharedInvoker<Req, Resp> = Arc<dyn Invoker<Req, Resp>>;

/// Builder for [`ResilientClient`].
pub struct ResilienceBuilder {
    config: ResilienceConfig,
    observers: Vec<Arc<dyn ErrorObserver>>,
}

impl ResilienceBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
            observers: Vec::new(),
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an error observer.
    pub fn observer(mut self, observer: Arc<dyn ErrorObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Wrap `base` in the full stack.
    pub fn build<Req, Resp, B>(self, base: B) -> ResilientClient<Req, Resp>
    where
        B: Invoker<Req, Resp> + 'static,
        Req: CacheKeyed + Send + Sync + 'static,
        Resp: Clone + Send + Sync + 'static,
    {
        let config = self.config;
        tracing::debug!(
            base = base.name(),
            cache = config.cache.enabled,
            timeout = ?config.timeout,
            "Assembling resilience stack"
        );

        let mut below_retry: SharedInvoker<Req, Resp> = Arc::new(base);

        if let Some(timeout) = config.timeout {
            below_retry = Arc::new(TimeoutLayer::new(below_retry, timeout));
        }

        let cache = if config.cache.enabled {
            let cache = Arc::new(ResponseCache::from_config(&config.cache));
            below_retry = Arc::new(CacheLayer::new(below_retry, cache.clone()));
            Some(cache)
        } else {
            None
        };

        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
        let monitor = Arc::new(ErrorMonitor::from_config(&config.monitoring));
        for observer in self.observers {
            monitor.register_observer(observer);
        }

        let stack = Self::wrap(below_retry.clone(), config.retry.clone(), &breaker, &monitor);

        ResilientClient {
            stack,
            below_retry,
            monitor,
            breaker,
            cache,
            config,
        }
    }

    fn wrap<Req, Resp>(
        below_retry: SharedInvoker<Req, Resp>,
        policy: RetryPolicy,
        breaker: &Arc<CircuitBreaker>,
        monitor: &Arc<ErrorMonitor>,
    ) -> SharedInvoker<Req, Resp>
    where
        Req: Send + Sync + 'static,
        Resp: Send + 'static,
    {
        let retry = RetryLayer::new(below_retry, policy);
        let guarded = CircuitBreakerLayer::new(retry, breaker.clone());
        Arc::new(MonitoringLayer::new(guarded, monitor.clone()))
    }
}

impl Default for ResilienceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A remote operation wrapped in the full resilience stack.
pub struct ResilientClient<Req, Resp> {
    stack: SharedInvoker<Req, Resp>,
    below_retry: SharedInvoker<Req, Resp>,
    monitor: Arc<ErrorMonitor>,
    breaker: Arc<CircuitBreaker>,
    cache: Option<Arc<ResponseCache<Resp>>>,
    config: ResilienceConfig,
}

impl<Req, Resp> ResilientClient<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Clone + Send + Sync + 'static,
{
    /// Invoke with a one-off retry policy.
    ///
    /// The call still shares the monitor, breaker and cache with every
    /// other call made through this client.
    pub async fn invoke_with_policy(
        &self,
        request: &Req,
        policy: &RetryPolicy,
    ) -> Result<Resp, InvokeError> {
        let stack = ResilienceBuilder::wrap(
            self.below_retry.clone(),
            policy.clone(),
            &self.breaker,
            &self.monitor,
        );
        stack.invoke(request).await
    }

    /// Invoke every request through the stack using the configured
    /// batch concurrency.
    pub async fn invoke_batch(&self, requests: &[Req]) -> BatchOutcome<Resp> {
        batch::invoke_batch(self, requests, self.config.batch.concurrency).await
    }

    /// Error metrics as observed by the outermost layer.
    pub fn metrics(&self) -> ErrorMetricsSnapshot {
        self.monitor.snapshot()
    }

    /// Health tier derived from the current error rate.
    pub fn health(&self) -> HealthStatus {
        self.monitor.health()
    }

    /// Breaker state and counters.
    pub fn circuit(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    /// Cache counters, or `None` when caching is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// Register an error observer after construction.
    pub fn register_observer(&self, observer: Arc<dyn ErrorObserver>) {
        self.monitor.register_observer(observer);
    }

    pub fn monitor(&self) -> &Arc<ErrorMonitor> {
        &self.monitor
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache<Resp>>> {
        self.cache.as_ref()
    }

    /// Configuration the stack was built from.
    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }
}

#[async_trait]
impl<Req, Resp> Invoker<Req, Resp> for ResilientClient<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Clone + Send + Sync + 'static,
{
    async fn invoke(&self, request: &Req) -> Result<Resp, InvokeError> {
        self.stack.invoke(request).await
    }

    async fn invoke_with_source(&self, request: &Req) -> Invocation<Resp> {
        self.stack.invoke_with_source(request).await
    }

    fn name(&self) -> &str {
        "resilient_client"
    }
}
