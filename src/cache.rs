use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::model::{Ms, now_ms};

/// TTL read-through cache over the store's read paths. Pure optimization:
/// it is never consulted inside a transaction and never feeds a capacity
/// decision, so its staleness window cannot cause an oversell. Writers
/// invalidate the touched key families right after each commit.
#[async_trait]
pub trait ReadCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value, ttl: Duration);
    async fn delete(&self, key: &str) -> bool;
    /// Drop every key matching a glob with a single `*` wildcard
    /// (e.g. `bookings:*`). Returns the number dropped.
    async fn invalidate_pattern(&self, pattern: &str) -> usize;
    /// Purge expired entries; returns the number purged.
    async fn sweep(&self) -> usize;
}

struct CacheSlot {
    value: Value,
    expires_at: Ms,
}

/// In-process cache, valid within one process. Multi-instance deployments
/// swap in a shared implementation of [`ReadCache`].
pub struct MemoryCache {
    entries: DashMap<String, CacheSlot>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn matches(pattern: &str, key: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            key.len() >= prefix.len() + suffix.len()
                && key.starts_with(prefix)
                && key.ends_with(suffix)
        }
        None => key == pattern,
    }
}

#[async_trait]
impl ReadCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let now = now_ms();
        let hit = self
            .entries
            .get(key)
            .filter(|slot| now <= slot.expires_at)
            .map(|slot| slot.value.clone());
        match hit {
            Some(value) => {
                metrics::counter!(crate::observability::CACHE_HITS_TOTAL).increment(1);
                Some(value)
            }
            None => {
                let _ = self.entries.remove_if(key, |_, slot| now > slot.expires_at);
                metrics::counter!(crate::observability::CACHE_MISSES_TOTAL).increment(1);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheSlot {
                value,
                expires_at: now_ms() + ttl.as_millis() as Ms,
            },
        );
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !matches(pattern, key));
        before - self.entries.len()
    }

    async fn sweep(&self) -> usize {
        let now = now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, slot| now <= slot.expires_at);
        let purged = before - self.entries.len();
        if purged > 0 {
            metrics::counter!(crate::observability::CACHE_EVICTIONS_TOTAL)
                .increment(purged as u64);
        }
        purged
    }
}
