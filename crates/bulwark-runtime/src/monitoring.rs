//! Error monitoring layer.
//!
//! Observes the outcome of every logical call without changing it. As the
//! outermost layer it sees a whole retry sequence as one call.
//!
//! The error rate is `total_errors / min(total_requests, window_size)`.
//! Errors are never decayed, so past `window_size` requests this is a
//! coarse ratio rather than a true last-N rate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bulwark_core::{Invocation, InvokeError, Invoker};

/// Default request window for the error rate.
pub const DEFAULT_WINDOW_SIZE: u64 = 100;

/// Error rates strictly below this are healthy.
pub const HEALTHY_ERROR_RATE: f64 = 0.01;

/// Error rates strictly below this (and not healthy) are degraded.
pub const DEGRADED_ERROR_RATE: f64 = 0.1;

/// Monitoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Request window for the error rate denominator
    pub window_size: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

/// Health tier derived from the error rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Classify an error rate. Tier upper bounds are exclusive.
    pub fn from_error_rate(rate: f64) -> Self {
        if rate < HEALTHY_ERROR_RATE {
            HealthStatus::Healthy
        } else if rate < DEGRADED_ERROR_RATE {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// The most recent failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastError {
    pub class: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Aggregate error counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub errors_by_class: BTreeMap<String, u64>,
    pub error_rate: f64,
    pub last_error: Option<LastError>,
}

impl ErrorMetricsSnapshot {
    /// Health tier for this snapshot.
    pub fn health(&self) -> HealthStatus {
        HealthStatus::from_error_rate(self.error_rate)
    }
}

/// Notified synchronously after each failed call.
///
/// Returned errors and panics are logged and never reach the caller.
pub trait ErrorObserver: Send + Sync {
    fn on_error(&self, error: &InvokeError, metrics: &ErrorMetricsSnapshot) -> anyhow::Result<()>;
}

impl<F> ErrorObserver for F
where
    F: Fn(&InvokeError, &ErrorMetricsSnapshot) -> anyhow::Result<()> + Send + Sync,
{
    fn on_error(&self, error: &InvokeError, metrics: &ErrorMetricsSnapshot) -> anyhow::Result<()> {
        self(error, metrics)
    }
}

#[derive(Default)]
struct Counters {
    total_requests: u64,
    total_errors: u64,
    errors_by_class: BTreeMap<String, u64>,
    last_error: Option<LastError>,
}

/// Owner of the error metrics and the observer list.
pub struct ErrorMonitor {
    counters: Mutex<Counters>,
    observers: RwLock<Vec<Arc<dyn ErrorObserver>>>,
    window_size: u64,
}

impl ErrorMonitor {
    /// Create a monitor. A window of zero is treated as one.
    pub fn new(window_size: u64) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            observers: RwLock::new(Vec::new()),
            window_size: window_size.max(1),
        }
    }

    /// Create a monitor from configuration.
    pub fn from_config(config: &MonitoringConfig) -> Self {
        Self::new(config.window_size)
    }

    /// Register an observer for failures.
    pub fn register_observer(&self, observer: Arc<dyn ErrorObserver>) {
        self.observers.write().push(observer);
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Count a successful call.
    pub fn record_success(&self) {
        self.counters.lock().total_requests += 1;
    }

    /// Count a failed call and notify observers.
    pub fn record_failure(&self, error: &InvokeError) {
        let snapshot = {
            let mut counters = self.counters.lock();
            let label = error.metric_label();

            counters.total_requests += 1;
            counters.total_errors += 1;
            *counters.errors_by_class.entry(label.clone()).or_insert(0) += 1;
            counters.last_error = Some(LastError {
                class: label,
                message: error.to_string(),
                at: Utc::now(),
            });

            self.snapshot_of(&counters)
        };

        self.notify(error, &snapshot);
    }

    fn notify(&self, error: &InvokeError, snapshot: &ErrorMetricsSnapshot) {
        // Clone the list so observers may register further observers
        let observers: Vec<Arc<dyn ErrorObserver>> = self.observers.read().clone();

        for (index, observer) in observers.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_error(error, snapshot))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(observer = index, error = %e, "Error observer failed");
                }
                Err(_) => {
                    tracing::error!(observer = index, "Error observer panicked");
                }
            }
        }
    }

    fn snapshot_of(&self, counters: &Counters) -> ErrorMetricsSnapshot {
        let denominator = counters.total_requests.min(self.window_size);
        let error_rate = if denominator == 0 {
            0.0
        } else {
            counters.total_errors as f64 / denominator as f64
        };

        ErrorMetricsSnapshot {
            total_requests: counters.total_requests,
            total_errors: counters.total_errors,
            errors_by_class: counters.errors_by_class.clone(),
            error_rate,
            last_error: counters.last_error.clone(),
        }
    }

    /// Current metrics.
    pub fn snapshot(&self) -> ErrorMetricsSnapshot {
        let counters = self.counters.lock();
        self.snapshot_of(&counters)
    }

    /// Health tier, recomputed from the current metrics.
    pub fn health(&self) -> HealthStatus {
        self.snapshot().health()
    }

    /// Clear all counters. Observers stay registered.
    pub fn reset(&self) {
        *self.counters.lock() = Counters::default();
    }
}

impl Default for ErrorMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

/// Layer recording outcomes into an [`ErrorMonitor`].
pub struct MonitoringLayer<I> {
    inner: I,
    monitor: Arc<ErrorMonitor>,
}

impl<I> MonitoringLayer<I> {
    /// Wrap `inner` with a shared monitor.
    pub fn new(inner: I, monitor: Arc<ErrorMonitor>) -> Self {
        Self { inner, monitor }
    }

    /// The monitor this layer records into.
    pub fn monitor(&self) -> &Arc<ErrorMonitor> {
        &self.monitor
    }
}

#[async_trait]
impl<Req, Resp, I> Invoker<Req, Resp> for MonitoringLayer<I>
where
    I: Invoker<Req, Resp>,
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    async fn invoke(&self, request: &Req) -> Result<Resp, InvokeError> {
        self.invoke_with_source(request).await.result
    }

    async fn invoke_with_source(&self, request: &Req) -> Invocation<Resp> {
        let invocation = self.inner.invoke_with_source(request).await;
        if !invocation.from_cache() {
            match &invocation.result {
                Ok(_) => self.monitor.record_success(),
                Err(error) => self.monitor.record_failure(error),
            }
        }
        invocation
    }

    fn name(&self) -> &str {
        "monitoring"
    }
}
