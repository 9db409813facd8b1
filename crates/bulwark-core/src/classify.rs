//! Boundary classification of raw remote outcomes.
//!
//! A remote adapter calls into this module once, where the result of the
//! remote call is first interpreted, and hands an [`InvokeError`] upward.
//! Transport failures that only carry text are scanned for an embedded
//! status code or rate-limit phrasing; anything else stays unclassified.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ClassifiedError, ErrorClass, ErrorDetails, InvokeError};

lazy_static! {
    /// Embedded status code: "HTTP 503", "HTTP/1.1 502", "status: 429", "status code 500"
    static ref STATUS_PATTERN: Regex = Regex::new(
        r"(?i)\b(?:http(?:/\d(?:\.\d)?)?|status(?:[\s_-]*code)?)[\s:=]*([45]\d{2})\b"
    ).unwrap();

    /// Rate-limit phrasing without a status code
    static ref RATE_LIMIT_PATTERN: Regex = Regex::new(
        r"(?i)rate[\s_-]?limit|too many requests|throttl"
    ).unwrap();

    /// Retry hint in seconds: "retry after 2", "retry-after: 30"
    static ref RETRY_AFTER_PATTERN: Regex = Regex::new(
        r"(?i)retry[\s_-]?after[\s:=]*(\d+)"
    ).unwrap();
}

impl ClassifiedError {
    /// Build a classified error from a status code and a JSON error body.
    ///
    /// Reads `retryAfter` (seconds) and `fields` (parameter -> complaint)
    /// from the body when present. Malformed detail values are ignored
    /// rather than failing the classification.
    pub fn from_status(status: u16, message: impl Into<String>, body: &JsonValue) -> Self {
        let retry_after = body
            .get("retryAfter")
            .and_then(JsonValue::as_f64)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

        let fields: BTreeMap<String, String> = body
            .get("fields")
            .and_then(JsonValue::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let extra: BTreeMap<String, JsonValue> = body
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(k, _)| !matches!(k.as_str(), "retryAfter" | "fields"))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            class: ErrorClass::from_code(status),
            message: message.into(),
            details: ErrorDetails {
                retry_after,
                fields,
                extra,
            },
        }
    }
}

/// Classify a transport failure that only carries a message.
pub fn classify_message(text: &str) -> InvokeError {
    let retry_after = RETRY_AFTER_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map(Duration::from_secs);

    if let Some(code) = STATUS_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
    {
        let mut err = ClassifiedError::new(ErrorClass::from_code(code), text);
        err.details.retry_after = retry_after;
        tracing::debug!(class = %err.class, "classified transport failure by status");
        return InvokeError::Remote(err);
    }

    if RATE_LIMIT_PATTERN.is_match(text) {
        tracing::debug!("classified transport failure as rate limited");
        return InvokeError::Remote(ClassifiedError::rate_limited(text, retry_after));
    }

    InvokeError::Unclassified(text.to_string())
}

/// Parse a `Retry-After` header value given as integer seconds.
pub fn parse_retry_after(header: &str) -> Option<Duration> {
    header.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_reads_body_details() {
        let body = serde_json::json!({
            "retryAfter": 2,
            "fields": {"limit": "must be at most 50", "ignored": 3}
        });
        let err = ClassifiedError::from_status(429, "slow down", &body);

        assert_eq!(err.class, ErrorClass::RateLimited);
        assert_eq!(err.details.retry_after, Some(Duration::from_secs(2)));
        assert_eq!(err.details.fields.len(), 1);
        assert_eq!(err.details.fields["limit"], "must be at most 50");
        assert!(err.details.extra.is_empty());
    }

    #[test]
    fn test_from_status_keeps_unknown_body_keys() {
        let body = serde_json::json!({"requestId": "abc-123", "retryAfter": 1});
        let err = ClassifiedError::from_status(503, "down", &body);
        assert_eq!(err.details.extra.len(), 1);
        assert_eq!(err.details.extra["requestId"], "abc-123");
    }

    #[test]
    fn test_from_status_ignores_bad_retry_after() {
        let body = serde_json::json!({"retryAfter": "soon"});
        let err = ClassifiedError::from_status(503, "down", &body);
        assert_eq!(err.class, ErrorClass::Unavailable);
        assert_eq!(err.details.retry_after, None);
    }

    #[test]
    fn test_from_status_ignores_out_of_range_retry_after() {
        for hint in [serde_json::json!(1e20), serde_json::json!(-3), serde_json::json!(f64::MAX)] {
            let body = serde_json::json!({ "retryAfter": hint });
            let err = ClassifiedError::from_status(429, "slow down", &body);
            assert_eq!(err.class, ErrorClass::RateLimited);
            assert_eq!(err.details.retry_after, None);
        }
    }

    #[test]
    fn test_classify_embedded_status() {
        let err = classify_message("upstream returned HTTP 503 Service Unavailable");
        assert_eq!(err.class(), Some(ErrorClass::Unavailable));

        let err = classify_message("HTTP/1.1 502 Bad Gateway");
        assert_eq!(err.class(), Some(ErrorClass::BadGateway));

        let err = classify_message("request failed, status code: 500");
        assert_eq!(err.class(), Some(ErrorClass::InternalFault));
    }

    #[test]
    fn test_classify_rate_limit_phrasing() {
        let err = classify_message("Too Many Requests, retry after 7");
        assert_eq!(err.class(), Some(ErrorClass::RateLimited));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_classify_transport_failures_stay_unclassified() {
        for text in ["connection reset by peer", "operation timed out", "broken pipe"] {
            assert!(matches!(classify_message(text), InvokeError::Unclassified(_)));
        }
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
