//! In-memory TTL cache for decoded upstream responses.
//!
//! One [`TtlCache`] lives on each provider and is shared by every runner bound
//! to it. Values are cloned on the way in and on the way out, so neither the
//! writer nor any reader can observe another party's mutations.
//!
//! Expiry is lazy: nothing sweeps the map in the background. An entry past its
//! deadline is removed by the next [`Cache::get`] for its key.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// String-keyed storage with per-entry time-to-live.
///
/// Implementations must be safe to share between threads; callers never add
/// their own locking. Operations cannot fail.
pub trait Cache<V>: Send + Sync {
    /// Returns a copy of the live value stored under `key`.
    fn get(&self, key: &str) -> Option<V>;

    /// Stores a copy of `value` under `key` for `ttl`.
    ///
    /// A zero TTL stores an entry that is already expired.
    fn set(&self, key: &str, value: V, ttl: Duration);
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// A [`Cache`] backed by a `HashMap` behind a single reader/writer lock.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tilefetch::cache::{Cache, TtlCache};
///
/// let cache = TtlCache::new();
/// cache.set("k", vec![1, 2, 3], Duration::from_secs(30));
///
/// let mut copy = cache.get("k").unwrap();
/// copy.push(4);
/// assert_eq!(cache.get("k"), Some(vec![1, 2, 3]));
///
/// cache.set("gone", vec![0], Duration::ZERO);
/// assert_eq!(cache.get("gone"), None);
/// ```
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_if_expired(&self, key: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another writer may have refreshed the key between our read and write locks.
        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()))
        {
            entries.remove(key);
            trace!(key, "evicted expired cache entry");
        }
    }
}

impl<V> Cache<V> for TtlCache<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            let entry = entries.get(key)?;
            if !entry.is_expired(Instant::now()) {
                return Some(entry.value.clone());
            }
        }
        self.evict_if_expired(key);
        None
    }

    fn set(&self, key: &str, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), Entry { value, expires_at });
    }
}
