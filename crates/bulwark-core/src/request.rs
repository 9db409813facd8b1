//! Request model and normalized cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A query against a named remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Resource the query targets (e.g. a corpus name)
    pub target: String,

    /// Query text
    pub query: String,

    /// Maximum number of results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Ask the callee to generate an answer, not just results
    #[serde(default)]
    pub generate_answer: bool,
}

impl QueryRequest {
    /// Create a request with no limit and answer generation off.
    pub fn new(target: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            query: query.into(),
            limit: None,
            generate_answer: false,
        }
    }

    /// Set the result limit.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Enable or disable answer generation.
    pub fn with_answer(mut self, generate_answer: bool) -> Self {
        self.generate_answer = generate_answer;
        self
    }
}

/// Normalized identity of a request.
///
/// Construction is the only place normalization happens: the query is
/// trimmed and lower-cased, the target is kept verbatim. Two requests that
/// differ only in query case or surrounding whitespace map to equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    target: String,
    query: String,
    limit: Option<u32>,
    generate_answer: bool,
}

impl CacheKey {
    /// Build a key from raw request fields.
    pub fn new(target: &str, query: &str, limit: Option<u32>, generate_answer: bool) -> Self {
        Self {
            target: target.to_string(),
            query: query.trim().to_lowercase(),
            limit,
            generate_answer,
        }
    }

    /// Deterministic textual form, `target:query:limit:flag`.
    pub fn as_string(&self) -> String {
        self.to_string()
    }

    /// Normalized query text.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Target the key belongs to.
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limit {
            Some(limit) => write!(
                f,
                "{}:{}:{}:{}",
                self.target, self.query, limit, self.generate_answer
            ),
            None => write!(
                f,
                "{}:{}:default:{}",
                self.target, self.query, self.generate_answer
            ),
        }
    }
}

/// Requests that can be served from the response cache.
pub trait CacheKeyed {
    /// Derive the normalized key. Must be a pure function of the request.
    fn cache_key(&self) -> CacheKey;
}

impl CacheKeyed for QueryRequest {
    fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.target, &self.query, self.limit, self.generate_answer)
    }
}

impl CacheKeyed for String {
    fn cache_key(&self) -> CacheKey {
        CacheKey::new("", self, None, false)
    }
}

impl CacheKeyed for CacheKey {
    fn cache_key(&self) -> CacheKey {
        self.clone()
    }
}
