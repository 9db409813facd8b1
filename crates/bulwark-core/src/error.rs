//! Error taxonomy for remote invocation.
//!
//! Remote failures are classified exactly once, when the raw outcome of the
//! remote call is first interpreted, into an [`ErrorClass`]. Every layer
//! above that point matches on the enum instead of inspecting error types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Numeric class of a remote failure.
///
/// Mirrors common HTTP semantics but carries no transport assumptions.
/// Serialized as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u16", from = "u16")]
pub enum ErrorClass {
    /// Request was malformed; see `ErrorDetails::fields`
    MalformedRequest,
    /// Caller is not authenticated
    Unauthenticated,
    /// Caller lacks the required scope
    Forbidden,
    /// Target does not exist
    NotFound,
    /// Callee is throttling; may carry `retry_after`
    RateLimited,
    /// Callee failed internally
    InternalFault,
    /// Upstream gateway received an invalid response
    BadGateway,
    /// Callee is temporarily unavailable
    Unavailable,
    /// Upstream gateway timed out
    GatewayTimeout,
    /// Any other numeric class
    Other(u16),
}

impl ErrorClass {
    /// Numeric code of this class.
    pub fn code(&self) -> u16 {
        match self {
            ErrorClass::MalformedRequest => 400,
            ErrorClass::Unauthenticated => 401,
            ErrorClass::Forbidden => 403,
            ErrorClass::NotFound => 404,
            ErrorClass::RateLimited => 429,
            ErrorClass::InternalFault => 500,
            ErrorClass::BadGateway => 502,
            ErrorClass::Unavailable => 503,
            ErrorClass::GatewayTimeout => 504,
            ErrorClass::Other(code) => *code,
        }
    }

    /// Map a numeric code to its class. Total: unknown codes become `Other`.
    pub fn from_code(code: u16) -> Self {
        match code {
            400 => ErrorClass::MalformedRequest,
            401 => ErrorClass::Unauthenticated,
            403 => ErrorClass::Forbidden,
            404 => ErrorClass::NotFound,
            429 => ErrorClass::RateLimited,
            500 => ErrorClass::InternalFault,
            502 => ErrorClass::BadGateway,
            503 => ErrorClass::Unavailable,
            504 => ErrorClass::GatewayTimeout,
            other => ErrorClass::Other(other),
        }
    }

    /// True for classes the callee is responsible for (5xx range).
    pub fn is_server_fault(&self) -> bool {
        (500..600).contains(&self.code())
    }
}

impl From<u16> for ErrorClass {
    fn from(code: u16) -> Self {
        Self::from_code(code)
    }
}

impl From<ErrorClass> for u16 {
    fn from(class: ErrorClass) -> Self {
        class.code()
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::MalformedRequest => write!(f, "malformed_request"),
            ErrorClass::Unauthenticated => write!(f, "unauthenticated"),
            ErrorClass::Forbidden => write!(f, "forbidden"),
            ErrorClass::NotFound => write!(f, "not_found"),
            ErrorClass::RateLimited => write!(f, "rate_limited"),
            ErrorClass::InternalFault => write!(f, "internal_fault"),
            ErrorClass::BadGateway => write!(f, "bad_gateway"),
            ErrorClass::Unavailable => write!(f, "unavailable"),
            ErrorClass::GatewayTimeout => write!(f, "gateway_timeout"),
            ErrorClass::Other(code) => write!(f, "status_{}", code),
        }
    }
}

/// Structured details supplied by the callee.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Minimum wait before a retry is permitted (seconds on the wire)
    #[serde(
        rename = "retryAfter",
        default,
        skip_serializing_if = "Option::is_none",
        with = "retry_after_secs"
    )]
    pub retry_after: Option<Duration>,

    /// Parameter name -> validation complaint
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,

    /// Any other keys from the callee's error body
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

mod retry_after_secs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => serializer.serialize_f64(duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<f64>::deserialize(deserializer)? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(|e| D::Error::custom(format!("invalid retryAfter {secs}: {e}"))),
            None => Ok(None),
        }
    }
}

/// A failure reported by the remote operation, already classified.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message} ({class}, code {})", .class.code())]
pub struct ClassifiedError {
    /// Numeric class
    pub class: ErrorClass,

    /// Human-readable message from the callee
    pub message: String,

    /// Structured details
    #[serde(default)]
    pub details: ErrorDetails,
}

impl ClassifiedError {
    /// Create a classified error without details.
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            details: ErrorDetails::default(),
        }
    }

    /// A rate-limit failure, optionally carrying the callee's retry hint.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let mut err = Self::new(ErrorClass::RateLimited, message);
        err.details.retry_after = retry_after;
        err
    }

    /// An internal fault on the callee side.
    pub fn server_fault(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InternalFault, message)
    }

    /// The callee is temporarily unavailable.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unavailable, message)
    }

    /// A malformed request with per-field complaints.
    pub fn malformed<I, K, V>(message: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut err = Self::new(ErrorClass::MalformedRequest, message);
        err.details.fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        err
    }

    /// Attach a retry hint.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.details.retry_after = Some(retry_after);
        self
    }
}

/// Terminal outcome of an invocation that did not produce a response.
///
/// `Remote`, `Unclassified` and `TimedOut` describe what happened to the
/// remote call. `CircuitOpen` and `RetriesExhausted` are local policy
/// outcomes and never originate from the callee.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvokeError {
    #[error("Remote call failed: {0}")]
    Remote(#[from] ClassifiedError),

    #[error("Remote call failed without classification: {0}")]
    Unclassified(String),

    #[error("Remote call timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Circuit open, next attempt permitted in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<InvokeError>,
    },
}

impl InvokeError {
    /// The error that actually ended the attempt sequence.
    ///
    /// For `RetriesExhausted` this is the last observed failure; for every
    /// other variant it is `self`.
    pub fn last_observed(&self) -> &InvokeError {
        match self {
            InvokeError::RetriesExhausted { last, .. } => last.last_observed(),
            other => other,
        }
    }

    /// Remote class of the last observed failure, if it was classified.
    pub fn class(&self) -> Option<ErrorClass> {
        match self.last_observed() {
            InvokeError::Remote(err) => Some(err.class),
            _ => None,
        }
    }

    /// The callee's retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.last_observed() {
            InvokeError::Remote(err) => err.details.retry_after,
            _ => None,
        }
    }

    /// Structured details of the last observed failure, if it was classified.
    pub fn details(&self) -> Option<&ErrorDetails> {
        match self.last_observed() {
            InvokeError::Remote(err) => Some(&err.details),
            _ => None,
        }
    }

    /// True for outcomes produced by local policy rather than the callee.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            InvokeError::CircuitOpen { .. } | InvokeError::RetriesExhausted { .. }
        )
    }

    /// Stable label used for per-class error counts.
    pub fn metric_label(&self) -> String {
        match self {
            InvokeError::Remote(err) => err.class.to_string(),
            InvokeError::Unclassified(_) => "unclassified".to_string(),
            InvokeError::TimedOut(_) => "timeout".to_string(),
            InvokeError::CircuitOpen { .. } => "circuit_open".to_string(),
            InvokeError::RetriesExhausted { last, .. } => last.metric_label(),
        }
    }
}
