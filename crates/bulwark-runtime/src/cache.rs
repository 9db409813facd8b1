//! Response cache layer.
//!
//! Serves repeated identical requests from memory within a freshness
//! window. Freshness is checked lazily on lookup; there is no background
//! sweeper. Eviction is hit-biased rather than LRU: the entry with the
//! lowest `access_count * 10_000 + age_ms` is dropped, so entries that were
//! never read go first.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use bulwark_core::{CacheKey, CacheKeyed, Invocation, InvokeError, Invoker};

use crate::config::duration_human;

/// Default freshness window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of entries.
pub const DEFAULT_CAPACITY: usize = 100;

/// Weight of one cache hit in the eviction score, in milliseconds of age.
const HIT_WEIGHT_MS: u128 = 10_000;

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Include the cache layer in the stack
    pub enabled: bool,

    /// Freshness window
    #[serde(with = "duration_human")]
    pub ttl: Duration,

    /// Maximum number of entries
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: DEFAULT_TTL,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

struct CacheEntry<V> {
    response: V,
    created_at: Instant,
    access_count: u64,
}

impl<V> CacheEntry<V> {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    fn utility_score(&self, now: Instant) -> u128 {
        u128::from(self.access_count) * HIT_WEIGHT_MS + self.age(now).as_millis()
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

struct CacheInner<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded, TTL-scoped response store.
pub struct ResponseCache<V> {
    inner: Mutex<CacheInner<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> ResponseCache<V> {
    /// Create a cache. A capacity of zero is treated as one.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Create a cache from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl, config.capacity)
    }

    /// Look up a fresh response, counting the hit.
    ///
    /// An expired entry found here is removed.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let fresh = match inner.entries.get_mut(key) {
            Some(entry) if entry.age(now) < self.ttl => {
                entry.access_count += 1;
                Some(entry.response.clone())
            }
            _ => None,
        };

        match fresh {
            Some(response) => {
                inner.hits += 1;
                Some(response)
            }
            None => {
                // Drops the entry if it was present but stale
                inner.entries.remove(key);
                inner.misses += 1;
                None
            }
        }
    }

    /// Store a response, evicting one entry if the cache is full.
    ///
    /// Overwriting an existing key never evicts.
    pub fn insert(&self, key: CacheKey, response: V) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.utility_score(now))
                .map(|(k, _)| k.clone());

            if let Some(victim) = victim {
                inner.entries.remove(&victim);
                inner.evictions += 1;
                tracing::debug!(key = %victim, "evicted cache entry");
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                response,
                created_at: now,
                access_count: 0,
            },
        );
    }

    /// Whether a fresh entry exists, without counting a hit.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| entry.age(now) < self.ttl)
    }

    /// Number of stored entries, including expired ones not yet looked up.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Counters are kept.
    pub fn invalidate_all(&self) {
        self.inner.lock().entries.clear();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            entries: inner.entries.len(),
        }
    }

    /// Freshness window.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}

/// Layer serving fresh responses from a [`ResponseCache`].
///
/// Only successes are stored. A failed call leaves the cache untouched.
pub struct CacheLayer<I, V> {
    inner: I,
    cache: Arc<ResponseCache<V>>,
}

impl<I, V> CacheLayer<I, V> {
    /// Wrap `inner` with a shared cache.
    pub fn new(inner: I, cache: Arc<ResponseCache<V>>) -> Self {
        Self { inner, cache }
    }

    /// The cache this layer reads and writes.
    pub fn cache(&self) -> &Arc<ResponseCache<V>> {
        &self.cache
    }
}

#[async_trait]
impl<Req, Resp, I> Invoker<Req, Resp> for CacheLayer<I, Resp>
where
    I: Invoker<Req, Resp>,
    Req: CacheKeyed + Send + Sync + 'static,
    Resp: Clone + Send + Sync + 'static,
{
    async fn invoke(&self, request: &Req) -> Result<Resp, InvokeError> {
        self.invoke_with_source(request).await.result
    }

    async fn invoke_with_source(&self, request: &Req) -> Invocation<Resp> {
        let key = request.cache_key();

        if let Some(response) = self.cache.get(&key) {
            tracing::debug!(key = %key, "cache hit");
            return Invocation::cached(response);
        }

        tracing::debug!(key = %key, invoker = self.inner.name(), "cache miss");
        let result = self.inner.invoke(request).await;
        if let Ok(response) = &result {
            self.cache.insert(key, response.clone());
        }
        Invocation::remote(result)
    }

    fn name(&self) -> &str {
        "cache"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::{ClassifiedError, FnInvoker, QueryRequest, ResponseSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(query: &str) -> CacheKey {
        CacheKey::new("docs", query, None, false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_hit_and_expiry() {
        let cache = ResponseCache::new(Duration::from_secs(300), 10);
        cache.insert(key("a"), 1u32);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get(&key("a")), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&key("a")), None);
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_lowest_utility_entry() {
        let cache = ResponseCache::new(Duration::from_secs(300), 3);

        cache.insert(key("old-unused"), 1u32);
        tokio::time::advance(Duration::from_millis(100)).await;
        cache.insert(key("popular"), 2);
        tokio::time::advance(Duration::from_millis(100)).await;
        cache.insert(key("young-unused"), 3);
        tokio::time::advance(Duration::from_millis(100)).await;

        // popular: 1 hit * 10_000 + 200ms, old-unused: 300ms, young-unused: 100ms
        assert_eq!(cache.get(&key("popular")), Some(2));

        cache.insert(key("new"), 4);

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&key("young-unused")));
        assert!(cache.contains(&key("old-unused")));
        assert!(cache.contains(&key("popular")));
        assert!(cache.contains(&key("new")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hits_outweigh_age() {
        let cache = ResponseCache::new(Duration::from_secs(300), 2);

        cache.insert(key("read-once"), 1u32);
        assert_eq!(cache.get(&key("read-once")), Some(1));
        tokio::time::advance(Duration::from_millis(5)).await;
        cache.insert(key("never-read"), 2);

        // read-once: 10_000 + 9_005ms, never-read: 9_000ms
        tokio::time::advance(Duration::from_secs(9)).await;
        cache.insert(key("incoming"), 3);

        assert!(cache.contains(&key("read-once")));
        assert!(!cache.contains(&key("never-read")));
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = ResponseCache::new(Duration::from_secs(300), 1);
        cache.insert(key("a"), 1u32);
        cache.insert(key("a"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(&key("a")), Some(2));
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = ResponseCache::default();
        cache.insert(key("a"), "x".to_string());
        cache.invalidate_all();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), DEFAULT_CAPACITY);
    }

    #[tokio::test]
    async fn test_layer_skips_inner_on_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let base = FnInvoker::new("base", move |req: QueryRequest| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, InvokeError>(format!("results for {}", req.query))
            }
        });
        let layer = CacheLayer::new(base, Arc::new(ResponseCache::default()));

        let first = layer.invoke(&QueryRequest::new("docs", "Retry")).await.unwrap();
        let second = layer.invoke(&QueryRequest::new("docs", "  retry ")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(layer.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_layer_reports_response_source() {
        let base = FnInvoker::new("base", |req: QueryRequest| async move {
            Ok::<_, InvokeError>(req.query)
        });
        let layer = CacheLayer::new(base, Arc::new(ResponseCache::default()));
        let request = QueryRequest::new("docs", "q");

        let miss = layer.invoke_with_source(&request).await;
        assert_eq!(miss.source, ResponseSource::Remote);

        let hit = layer.invoke_with_source(&request).await;
        assert!(hit.from_cache());
        assert_eq!(hit.result.unwrap(), "q");
    }

    #[tokio::test]
    async fn test_layer_never_caches_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let base = FnInvoker::new("base", move |_req: QueryRequest| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ClassifiedError::unavailable("down").into())
                } else {
                    Ok::<_, InvokeError>("ok".to_string())
                }
            }
        });
        let layer = CacheLayer::new(base, Arc::new(ResponseCache::default()));
        let request = QueryRequest::new("docs", "q");

        assert!(layer.invoke(&request).await.is_err());
        assert!(layer.cache().is_empty());

        assert_eq!(layer.invoke(&request).await.unwrap(), "ok");
        assert_eq!(layer.invoke(&request).await.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
