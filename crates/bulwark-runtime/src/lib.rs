//! # bulwark-runtime
//!
//! Resilience layers for remote calls.
//!
//! Every layer implements [`bulwark_core::Invoker`] and wraps exactly one
//! inner implementer, composed outer to inner as:
//!
//! ```text
//! Monitoring → CircuitBreaker → Retry → Cache → base
//! ```
//!
//! - [`cache`]: TTL cache with hit-biased eviction; only successes are stored
//! - [`retry`]: exponential backoff with jitter, honoring server retry hints
//! - [`circuit_breaker`]: stops calling a dependency that keeps failing
//! - [`monitoring`]: error metrics, health tiers and observers
//!
//! ## Example
//!
//! ```rust,ignore
//! use bulwark_core::{FnInvoker, InvokeError, Invoker, QueryRequest};
//! use bulwark_runtime::{ResilienceBuilder, ResilienceConfig};
//!
//! let base = FnInvoker::new("search", |req: QueryRequest| async move {
//!     Ok::<_, InvokeError>(format!("results for {}", req.query))
//! });
//!
//! let client = ResilienceBuilder::new()
//!     .config(ResilienceConfig::from_yaml_file("resilience.yaml")?)
//!     .build(base);
//!
//! let answer = client.invoke(&QueryRequest::new("docs", "retry budget")).await?;
//! println!("{answer} ({:?})", client.health());
//! ```

pub mod batch;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod monitoring;
pub mod retry;
pub mod stack;
pub mod timeout;

pub use batch::{invoke_batch, BatchConfig, BatchOutcome};
pub use cache::{CacheConfig, CacheLayer, CacheStats, ResponseCache};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerLayer, CircuitSnapshot, CircuitState,
};
pub use config::{ConfigError, ResilienceConfig};
pub use monitoring::{
    ErrorMetricsSnapshot, ErrorMonitor, ErrorObserver, HealthStatus, LastError, MonitoringConfig,
    MonitoringLayer,
};
pub use retry::{retry_with, RetryLayer, RetryPolicy};
pub use stack::{ResilienceBuilder, ResilientClient};
pub use timeout::TimeoutLayer;
