//! Short-lived memoization of route results.
//!
//! # Keying
//!
//! A [`CacheKey`] is the operation name plus its full argument string (the
//! request path and query). Two requests with the same arguments to the same
//! operation share a slot on purpose; nothing about the caller is part of
//! the key.
//!
//! # What Gets Stored
//!
//! Only successful results. [`ResultCache::get_or_compute`] stores `Ok`
//! values and passes `Err` through untouched, and [`CacheLayer`] treats any
//! non-2xx response as an error. A 404 for an id that is created a second
//! later is therefore never served from cache.
//!
//! # Concurrency
//!
//! Every key owns an async mutex that is held across the computation.
//! Concurrent misses on one key run the computation once; the others wait
//! and read the stored value. Different keys never block each other.
//!
//! # Expiry
//!
//! An entry is live while `now - stored_at < ttl`. Dead entries are replaced
//! on the next miss; [`ResultCache::purge_expired`] removes them in bulk and
//! is driven by the periodic sweep in `AppState`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, Response, StatusCode};
use axum::response::IntoResponse;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{debug, error};

use crate::error::AppError;
use crate::metrics;

/// Slot identity: operation plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    operation: &'static str,
    arguments: String,
}

impl CacheKey {
    pub fn new(operation: &'static str, arguments: impl Into<String>) -> Self {
        Self {
            operation,
            arguments: arguments.into(),
        }
    }

    /// Key a request by its path and query string.
    pub fn for_request<B>(operation: &'static str, req: &Request<B>) -> Self {
        let arguments = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| req.uri().path());
        Self::new(operation, arguments)
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.operation, self.arguments)
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < ttl
    }
}

type Slot<V> = Arc<Mutex<Option<CacheEntry<V>>>>;

/// Time-bounded, single-flight result cache.
#[derive(Debug)]
pub struct ResultCache<V> {
    slots: DashMap<CacheKey, Slot<V>>,
}

impl<V> Default for ResultCache<V> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<V> ResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live value for `key`, or run `compute` and store its `Ok` result.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let operation = key.operation();
        let slot = self.slots.entry(key).or_default().clone();
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_ref()
            && entry.is_live(ttl, Instant::now())
        {
            metrics::record_cache_lookup(operation, "hit");
            return Ok(entry.value.clone());
        }

        metrics::record_cache_lookup(operation, "miss");
        let value = compute().await?;
        *guard = Some(CacheEntry {
            value: value.clone(),
            stored_at: Instant::now(),
        });
        Ok(value)
    }

    /// Remove entries older than `ttl` (and slots whose computation failed).
    ///
    /// Slots held by a pending lookup or locked by an in-flight computation
    /// are kept.
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(guard) => guard.as_ref().is_some_and(|entry| entry.is_live(ttl, now)),
                Err(_) => true,
            }
        });
        before.saturating_sub(self.slots.len())
    }

    /// Number of slots, live or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// =============================================================================
// HTTP Layer
// =============================================================================

/// A buffered successful response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Cache shared by every cached route.
pub type ResponseCache = ResultCache<CachedResponse>;

/// Why a response did not go through the cache.
enum Bypass<E> {
    /// Non-2xx or unbufferable response; returned as-is.
    Response(Response<Body>),
    /// The inner service itself failed.
    Inner(E),
}

/// Result caching layer for a single route.
#[derive(Clone)]
pub struct CacheLayer {
    cache: Arc<ResponseCache>,
    operation: &'static str,
    ttl: Duration,
    max_body_bytes: usize,
}

impl CacheLayer {
    pub fn new(
        cache: Arc<ResponseCache>,
        operation: &'static str,
        ttl: Duration,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            cache,
            operation,
            ttl,
            max_body_bytes,
        }
    }
}

impl<S> Layer<S> for CacheLayer {
    type Service = CacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheService {
            inner,
            layer: self.clone(),
        }
    }
}

/// Result caching service wrapper.
#[derive(Clone)]
pub struct CacheService<S> {
    inner: S,
    layer: CacheLayer,
}

impl<S> Service<Request<Body>> for CacheService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let key = CacheKey::for_request(self.layer.operation, &req);
        let cache = self.layer.cache.clone();
        let ttl = self.layer.ttl;
        let max_body_bytes = self.layer.max_body_bytes;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            debug!(key = %key, "Consulting result cache");

            let outcome = cache
                .get_or_compute(key, ttl, || async move {
                    let response = inner.call(req).await.map_err(Bypass::Inner)?;
                    if !response.status().is_success() {
                        return Err(Bypass::Response(response));
                    }

                    let (parts, body) = response.into_parts();
                    match axum::body::to_bytes(body, max_body_bytes).await {
                        Ok(body) => Ok(CachedResponse {
                            status: parts.status,
                            headers: parts.headers,
                            body,
                        }),
                        Err(e) => {
                            error!(error = %e, "Failed to buffer response for caching");
                            Err(Bypass::Response(
                                AppError::Internal(format!("response buffering failed: {e}"))
                                    .into_response(),
                            ))
                        }
                    }
                })
                .await;

            match outcome {
                Ok(cached) => Ok(cached.into_response()),
                Err(Bypass::Response(response)) => Ok(response),
                Err(Bypass::Inner(e)) => Err(e),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    async fn counted(calls: &AtomicUsize, value: u32) -> Result<u32, String> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_entry_skips_compute() {
        let cache = ResultCache::new();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_compute(CacheKey::new("op", "1"), TTL, || counted(&calls, 7))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        let second = cache
            .get_or_compute(CacheKey::new("op", "1"), TTL, || counted(&calls, 8))
            .await
            .unwrap();

        assert_eq!((first, second), (7, 7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_recomputed() {
        let cache = ResultCache::new();
        let calls = AtomicUsize::new(0);

        cache
            .get_or_compute(CacheKey::new("op", "1"), TTL, || counted(&calls, 1))
            .await
            .unwrap();
        tokio::time::advance(TTL).await;
        let refreshed = cache
            .get_or_compute(CacheKey::new("op", "1"), TTL, || counted(&calls, 2))
            .await
            .unwrap();

        assert_eq!(refreshed, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_differ_by_operation_and_arguments() {
        let cache = ResultCache::new();
        let calls = AtomicUsize::new(0);

        for key in [
            CacheKey::new("download", "/download/1"),
            CacheKey::new("download", "/download/2"),
            CacheKey::new("preview", "/download/1"),
        ] {
            cache.get_or_compute(key, TTL, || counted(&calls, 0)).await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_not_cached() {
        let cache: ResultCache<u32> = ResultCache::new();
        let calls = AtomicUsize::new(0);

        let failed = cache
            .get_or_compute(CacheKey::new("op", "x"), TTL, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>("not found")
            })
            .await;
        assert!(failed.is_err());

        let ok = cache
            .get_or_compute(CacheKey::new("op", "x"), TTL, || counted(&calls, 5))
            .await
            .unwrap();
        assert_eq!(ok, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_removes_dead_entries() {
        let cache = ResultCache::new();
        let calls = AtomicUsize::new(0);

        cache
            .get_or_compute(CacheKey::new("op", "old"), TTL, || counted(&calls, 1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        cache
            .get_or_compute(CacheKey::new("op", "new"), TTL, || counted(&calls, 2))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;

        assert_eq!(cache.purge_expired(TTL), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_keeps_slot_claimed_by_pending_lookup() {
        let cache = ResultCache::<u32>::new();
        let key = CacheKey::new("op", "pending");

        // A lookup has taken the slot out of the map but not locked it yet
        let claimed = cache.slots.entry(key.clone()).or_default().clone();
        assert_eq!(cache.purge_expired(TTL), 0);
        assert_eq!(cache.len(), 1);

        *claimed.lock().await = Some(CacheEntry {
            value: 9,
            stored_at: Instant::now(),
        });
        drop(claimed);

        // The next lookup sees the value stored through the claimed slot
        let calls = AtomicUsize::new(0);
        let value = cache
            .get_or_compute(key, TTL, || counted(&calls, 10))
            .await
            .unwrap();
        assert_eq!(value, 9);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Unclaimed and expired, it goes
        tokio::time::advance(TTL).await;
        assert_eq!(cache.purge_expired(TTL), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_misses_compute_once() {
        let cache = Arc::new(ResultCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_compute(CacheKey::new("op", "hot"), TTL, || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, String>(42_u32)
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_key_from_request_includes_query() {
        let req = Request::builder()
            .uri("/download/7?size=large")
            .body(Body::empty())
            .unwrap();
        let key = CacheKey::for_request("download", &req);
        assert_eq!(key.to_string(), "download:/download/7?size=large");
    }
}
