//! In-memory result cache.
//!
//! ### Cache Keys
//! - SHA-256 over the operation name and its JSON-encoded input
//!   (see [`compute_cache_key`]).
//!
//! ### Bounds
//! - At most `max_size` entries; inserting past the bound evicts the entry
//!   inserted earliest. Reads never change eviction order.
//! - With a TTL, an entry older than the TTL is treated as missing and
//!   removed on the read that finds it.
//!
//! ### Concurrency
//! - All access goes through one async mutex; the lock is never held while
//!   the wrapped operation runs.
//! - Two concurrent misses on the same key both run the operation; the later
//!   insert replaces the earlier one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lazydb_core::config::CacheSettings;
use lazydb_core::hash::compute_cache_key;
use lazydb_core::Error;
use serde::Serialize;
use tokio::sync::Mutex;

use super::Operation;

/// Counters for cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.is_some_and(|ttl| now.saturating_duration_since(self.inserted_at) > ttl)
    }
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Insertion sequence to key; the first entry is the eviction candidate.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self { entries: HashMap::new(), order: BTreeMap::new(), next_seq: 0 }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn push(&mut self, key: String, value: V, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(key, CacheEntry { value, inserted_at: now, seq });
    }

    fn pop_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Bounded, optionally expiring map from cache key to result.
///
/// Clones share the same storage.
pub struct QueryCache<V> {
    state: Arc<Mutex<CacheState<V>>>,
    counters: Arc<Counters>,
    max_size: usize,
    ttl: Option<Duration>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
            max_size: self.max_size,
            ttl: self.ttl,
        }
    }
}

impl<V> std::fmt::Debug for QueryCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("max_size", &self.max_size)
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<V> QueryCache<V> {
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone + Send> QueryCache<V> {
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `max_size` is zero.
    pub fn new(max_size: usize, ttl: Option<Duration>) -> Result<Self, Error> {
        if max_size == 0 {
            return Err(Error::InvalidArgument("cache max_size must be a positive integer".into()));
        }
        Ok(Self {
            state: Arc::new(Mutex::new(CacheState::new())),
            counters: Arc::new(Counters::default()),
            max_size,
            ttl,
        })
    }

    pub fn from_settings(settings: &CacheSettings) -> Result<Self, Error> {
        Self::new(settings.max_size, settings.ttl())
    }

    /// Look up a live entry. Expired entries are removed and reported missing.
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let expired = match state.entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.remove(key);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = short(key), "cache entry expired");
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value, replacing any entry under the same key.
    ///
    /// A replaced entry counts as newly inserted for eviction order.
    pub async fn insert(&self, key: String, value: V) {
        let mut state = self.state.lock().await;
        state.remove(&key);
        state.push(key, value, Instant::now());

        while state.entries.len() > self.max_size {
            match state.pop_oldest() {
                Some(evicted) => {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = short(&evicted), "cache entry evicted");
                }
                None => break,
            }
        }
    }

    /// Drop one entry; returns whether it was present.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.state.lock().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.order.clear();
    }

    /// Remove every expired entry; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(Some(ttl), now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        self.counters
            .expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Entries currently stored, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn short(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}

/// An operation whose successful results are memoised.
///
/// Failures are never cached.
pub struct Cached<Op: Operation> {
    inner: Op,
    cache: QueryCache<Op::Output>,
}

impl<Op: Operation> Cached<Op> {
    pub fn new(inner: Op, cache: QueryCache<Op::Output>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &QueryCache<Op::Output> {
        &self.cache
    }
}

#[async_trait::async_trait]
impl<Op> Operation for Cached<Op>
where
    Op: Operation,
    Op::Input: Serialize + Sync,
    Op::Output: Clone,
{
    type Input = Op::Input;
    type Output = Op::Output;

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, input: Self::Input) -> Result<Self::Output, Error> {
        let key = compute_cache_key(self.inner.name(), &input)?;
        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!(operation = self.inner.name(), key = short(&key), "cache hit");
            return Ok(hit);
        }

        let value = self.inner.call(input).await?;
        self.cache.insert(key, value.clone()).await;
        Ok(value)
    }
}
