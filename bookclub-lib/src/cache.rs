//! Short-TTL read-through caching for remote payloads.
//!
//! [`Cache`] stamps every entry with its write time and treats anything
//! older than the configured TTL as a miss, evicting it on read. The
//! underlying [`Store`] is a plain string key/value substrate so it can be
//! swapped without touching callers: [`MemoryStore`] for a session-scoped
//! cache, [`NoStore`] to degrade to always-fetch behaviour.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::trace;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A string key/value substrate for cached entries.
///
/// Write failures are part of the contract: a store that cannot persist a
/// value simply drops it and the cache degrades to fetching every time.
pub trait Store {
    /// Returns the raw value for `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Writes `value` under `key`, silently discarding it on failure.
    fn set(&self, key: &str, value: String);

    /// Removes the entry for `key`, if any.
    fn remove(&self, key: &str);
}

/// Session-scoped in-memory [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(key.to_owned(), value);
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut map) = self.inner.lock() {
            map.remove(key);
        }
    }
}

/// A [`Store`] that keeps nothing, so every read becomes a fetch.
#[derive(Debug, Default)]
pub struct NoStore;

impl Store for NoStore {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: String) {}

    fn remove(&self, _key: &str) {}
}

/// Serialized envelope around a cached payload: the data plus its write
/// timestamp in epoch milliseconds.
#[derive(Serialize, Deserialize)]
struct Stamped<T> {
    data: T,
    ts: u64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// A typed TTL cache over a [`Store`].
#[derive(Debug)]
pub struct Cache<S> {
    store: S,
    ttl: Duration,
}

impl<S: Store> Cache<S> {
    /// Creates a cache that considers entries older than `ttl` stale.
    pub const fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Returns the cached value for `key` when present and younger than
    /// the TTL.
    ///
    /// Stale or undecodable entries are evicted and reported as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key)?;
        let entry: Stamped<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(_) => {
                self.store.remove(key);
                return None;
            }
        };

        if u128::from(now_millis().saturating_sub(entry.ts)) > self.ttl.as_millis() {
            trace!("Cache entry '{key}' is stale, evicting");
            self.store.remove(key);
            return None;
        }

        Some(entry.data)
    }

    /// Stamps `data` with the current time and writes it under `key`.
    pub fn set<T: Serialize>(&self, key: &str, data: &T) {
        let entry = Stamped {
            data,
            ts: now_millis(),
        };
        if let Ok(raw) = serde_json::to_string(&entry) {
            self.store.set(key, raw);
        }
    }

    /// Drops the entry for `key`, if any.
    pub fn evict(&self, key: &str) {
        self.store.remove(key);
    }
}
