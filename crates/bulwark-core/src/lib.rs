//! # bulwark-core
//!
//! Shared vocabulary for resilient remote invocation.
//!
//! This crate defines what every resilience layer agrees on:
//! - the call contract ([`Invoker`]): `invoke(request) -> response`
//! - the error taxonomy ([`InvokeError`], [`ClassifiedError`], [`ErrorClass`])
//! - the request model and its normalized [`CacheKey`]
//!
//! It contains no policy. Retry, circuit breaking, caching and monitoring
//! live in `bulwark-runtime` and only ever talk to each other through
//! [`Invoker`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use bulwark_core::{classify_message, ClassifiedError, InvokeError};
//!
//! // Classify once, at the boundary where the remote result is interpreted
//! let err = ClassifiedError::from_status(429, "slow down", &serde_json::json!({"retryAfter": 2}));
//! assert_eq!(err.details.retry_after, Some(std::time::Duration::from_secs(2)));
//!
//! let transport = classify_message("connection reset by peer");
//! assert!(matches!(transport, InvokeError::Unclassified(_)));
//! ```

pub mod classify;
pub mod error;
pub mod invoker;
pub mod request;
pub mod schema;

pub use classify::{classify_message, parse_retry_after};
pub use error::{ClassifiedError, ErrorClass, ErrorDetails, InvokeError};
pub use invoker::{FnInvoker, Invocation, Invoker, ResponseSource};
pub use request::{CacheKey, CacheKeyed, QueryRequest};
pub use schema::{validate_config_schema, SchemaError};
