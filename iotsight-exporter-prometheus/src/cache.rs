//! Time-bounded response cache with stampede protection.
//!
//! One `ResponseCache` is constructed per source at startup and handed to
//! that source's client; there are no module-level singletons. Entries are
//! keyed per upstream resource (one key per source, or per sensor id for the
//! multi-sensor source).
//!
//! The stale path marks `last_fetch` *before* the network call, so concurrent
//! scrapes for the same key observe the entry as fresh and skip the redundant
//! upstream request. The lock is never held across an await: mark, release,
//! fetch, reacquire to commit.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use iotsight_common::{Error, Result, current_timestamp_millis};

/// Per-source hit/miss counters, monotonically increasing for the process
/// lifetime. A miss is counted per upstream request issued, including the
/// cheap probe request of the two-stage freshness check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounters {
    pub hit: u64,
    pub miss: u64,
}

/// One cached upstream resource.
#[derive(Debug, Default)]
struct CachedResource {
    /// When the last fetch was *started*, epoch milliseconds. Set before the
    /// network call as stampede protection; not reset on failure.
    last_fetch_ms: i64,

    /// Last successfully decoded payload. Never partially overwritten: a
    /// failed refresh leaves it intact.
    payload: Option<Value>,

    /// When `payload` was committed, epoch milliseconds.
    fetched_at_ms: i64,

    /// Upstream-reported observation marker of `payload`, used by the
    /// two-stage freshness check.
    marker: Option<i64>,
}

/// A read-only view of a cache entry handed to collectors.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    /// The decoded upstream payload.
    pub payload: Value,

    /// When the payload was fetched, epoch milliseconds.
    pub fetched_at_ms: i64,
}

struct CacheState {
    entries: HashMap<String, CachedResource>,
    counters: RequestCounters,
}

/// Per-source response cache.
pub struct ResponseCache {
    state: Mutex<CacheState>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                counters: RequestCounters::default(),
            }),
        }
    }

    /// Current hit/miss counters.
    pub fn counters(&self) -> RequestCounters {
        self.state.lock().counters
    }

    /// Fetch-or-reuse the payload for `key`.
    ///
    /// Returns the cached payload without invoking `fetch_fn` while the entry
    /// is younger than `ttl`. On a stale entry, issues one upstream request;
    /// on failure the previous payload (if any) is served unchanged.
    pub async fn fetch<F, Fut>(&self, key: &str, ttl: Duration, fetch_fn: F) -> Result<CacheSnapshot>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        self.fetch_at(current_timestamp_millis(), key, ttl, fetch_fn)
            .await
    }

    /// [`ResponseCache::fetch`] with an explicit clock.
    pub async fn fetch_at<F, Fut>(
        &self,
        now_ms: i64,
        key: &str,
        ttl: Duration,
        fetch_fn: F,
    ) -> Result<CacheSnapshot>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(snapshot) = self.begin_fetch(now_ms, key, ttl)? {
            return Ok(snapshot);
        }

        self.bump_miss();
        let fetched = fetch_fn().await;
        self.commit(now_ms, key, fetched, None)
    }

    /// Two-stage fetch-or-reuse for upstreams exposing a cheap, monotonically
    /// increasing observation marker.
    ///
    /// Once a full payload exists, a stale entry first issues `probe_fn` and
    /// compares `marker_of` on its body against the stored marker; if the
    /// marker has not advanced the expensive fetch is skipped, a hit is
    /// counted and the existing payload kept. Otherwise `fetch_fn` runs and
    /// its payload is committed together with its marker.
    pub async fn fetch_with_probe<P, PFut, F, FFut, M>(
        &self,
        key: &str,
        ttl: Duration,
        probe_fn: P,
        fetch_fn: F,
        marker_of: M,
    ) -> Result<CacheSnapshot>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<Value>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<Value>>,
        M: Fn(&Value) -> Option<i64>,
    {
        self.fetch_with_probe_at(
            current_timestamp_millis(),
            key,
            ttl,
            probe_fn,
            fetch_fn,
            marker_of,
        )
        .await
    }

    /// [`ResponseCache::fetch_with_probe`] with an explicit clock.
    pub async fn fetch_with_probe_at<P, PFut, F, FFut, M>(
        &self,
        now_ms: i64,
        key: &str,
        ttl: Duration,
        probe_fn: P,
        fetch_fn: F,
        marker_of: M,
    ) -> Result<CacheSnapshot>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<Value>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<Value>>,
        M: Fn(&Value) -> Option<i64>,
    {
        if let Some(snapshot) = self.begin_fetch(now_ms, key, ttl)? {
            return Ok(snapshot);
        }

        let prev_marker = {
            let state = self.state.lock();
            state.entries.get(key).and_then(|e| e.marker)
        };

        // Probe for a new reading before paying for the full field fetch.
        // A failed probe reads as marker 0, which also keeps the payload.
        if let Some(prev) = prev_marker {
            self.bump_miss();
            let marker = match probe_fn().await {
                Ok(body) => marker_of(&body).unwrap_or(0),
                Err(e) => {
                    debug!(key, error = %e, "Probe request failed");
                    0
                }
            };

            if marker <= prev {
                let mut guard = self.state.lock();
                let state = &mut *guard;
                if let Some(entry) = state.entries.get(key) {
                    if let Some(payload) = &entry.payload {
                        state.counters.hit += 1;
                        return Ok(CacheSnapshot {
                            payload: payload.clone(),
                            fetched_at_ms: entry.fetched_at_ms,
                        });
                    }
                }
            }
        }

        self.bump_miss();
        let fetched = fetch_fn().await;
        self.commit(now_ms, key, fetched, Some(&marker_of))
    }

    /// Freshness check and stampede mark, under one short lock.
    ///
    /// Returns `Ok(Some(..))` on a hit, `Ok(None)` when the caller should
    /// fetch, and an error on a hit against an entry that has never held a
    /// payload (a concurrent fetch is in flight).
    fn begin_fetch(
        &self,
        now_ms: i64,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<CacheSnapshot>> {
        let ttl_ms = ttl.as_millis() as i64;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let entry = state.entries.entry(key.to_string()).or_default();

        if now_ms - entry.last_fetch_ms < ttl_ms {
            state.counters.hit += 1;
            return match &entry.payload {
                Some(payload) => Ok(Some(CacheSnapshot {
                    payload: payload.clone(),
                    fetched_at_ms: entry.fetched_at_ms,
                })),
                None => Err(Error::Upstream(format!(
                    "no cached payload available yet for '{}'",
                    key
                ))),
            };
        }

        // Stampede protection: mark the entry as in flight before the
        // network call so concurrent scrapes within the TTL window skip it.
        entry.last_fetch_ms = now_ms;
        Ok(None)
    }

    fn bump_miss(&self) {
        self.state.lock().counters.miss += 1;
    }

    /// Commit a fetch result. A failure leaves the previous payload intact
    /// and serves it stale when present.
    fn commit(
        &self,
        now_ms: i64,
        key: &str,
        fetched: Result<Value>,
        marker_of: Option<&dyn Fn(&Value) -> Option<i64>>,
    ) -> Result<CacheSnapshot> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let entry = state.entries.entry(key.to_string()).or_default();

        match fetched {
            Ok(payload) => {
                entry.marker = marker_of.and_then(|f| f(&payload));
                entry.payload = Some(payload.clone());
                entry.fetched_at_ms = now_ms;
                Ok(CacheSnapshot {
                    payload,
                    fetched_at_ms: now_ms,
                })
            }
            Err(e) => match &entry.payload {
                Some(payload) => {
                    warn!(key, error = %e, "Upstream fetch failed, serving stale payload");
                    Ok(CacheSnapshot {
                        payload: payload.clone(),
                        fetched_at_ms: entry.fetched_at_ms,
                    })
                }
                None => Err(e),
            },
        }
    }
}
