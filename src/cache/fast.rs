//! In-process fast cache tier: a TTL map with size-capped eviction.
//!
//! Generalizes the teacher's `PromptCache` (`llm/cache.rs`) from a
//! provider-cache-awareness tracker into an actual key/value store used as
//! the gateway's first-tier lookup, adding an eviction policy the teacher
//! didn't need since it never bounded entry count.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    ttl: ChronoDuration,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Utc::now() - self.created_at > self.ttl
    }
}

/// Hit/miss/eviction counters for the fast tier.
#[derive(Debug, Clone, Default)]
pub struct FastCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entry_count: usize,
}

impl FastCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded, TTL-aware in-process cache. Eviction drops an already-expired
/// entry first (oldest-by-expiry among those); only once nothing has
/// expired does it fall back to the least recently accessed entry, same
/// tie-break the teacher's `PromptCache::cleanup` retains (oldest survives
/// shortest).
pub struct FastCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    stats: Arc<RwLock<FastCacheStats>>,
    max_size: usize,
}

impl FastCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(FastCacheStats::default())),
            max_size,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.write().await;
        let hit = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.last_accessed = Utc::now();
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        drop(entries);

        let mut stats = self.stats.write().await;
        if hit.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        hit
    }

    pub async fn set(&self, key: String, value: String, ttl_secs: u64) {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        entries.insert(
            key,
            Entry {
                value,
                created_at: now,
                last_accessed: now,
                ttl: ChronoDuration::seconds(ttl_secs as i64),
            },
        );

        if entries.len() > self.max_size {
            self.evict_one(&mut entries).await;
        }
        let entry_count = entries.len();
        drop(entries);

        let mut stats = self.stats.write().await;
        stats.entry_count = entry_count;
    }

    async fn evict_one(&self, entries: &mut HashMap<String, Entry>) {
        let victim = entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .min_by_key(|(_, e)| e.created_at + e.ttl)
            .map(|(k, _)| k.clone())
            .or_else(|| {
                entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_accessed)
                    .map(|(k, _)| k.clone())
            });

        if let Some(victim) = victim {
            entries.remove(&victim);
            let mut stats = self.stats.write().await;
            stats.evictions += 1;
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    pub async fn stats(&self) -> FastCacheStats {
        let mut stats = self.stats.read().await.clone();
        stats.entry_count = self.entries.read().await.len();
        stats
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        *self.stats.write().await = FastCacheStats::default();
    }
}
