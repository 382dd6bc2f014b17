//! Two-tier cache (C1): a fast in-process tier backed by an optional remote
//! tier, with fail-open degradation when the remote tier is unavailable.

pub mod fast;
pub mod keys;
pub mod remote;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use fast::{FastCache, FastCacheStats};
pub use remote::{DegradingRemoteCache, HttpRemoteCache, RemoteCacheBackend};

/// Combined hit/miss view across both tiers.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub fast: FastCacheStats,
    pub remote_degraded: bool,
}

/// Two-tier cache: reads check the fast tier first, fall through to the
/// remote tier on miss, and backfill the fast tier on a remote hit. Writes go
/// to both tiers; a degraded remote tier never blocks a write.
pub struct GatewayCache {
    fast: FastCache,
    remote: Option<DegradingRemoteCache>,
}

impl GatewayCache {
    pub fn new(fast_max_size: usize) -> Self {
        Self {
            fast: FastCache::new(fast_max_size),
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteCacheBackend>) -> Self {
        self.remote = Some(DegradingRemoteCache::new(remote));
        self
    }

    async fn get_raw(&self, key: &str, ttl_secs: u64) -> Option<String> {
        if let Some(value) = self.fast.get(key).await {
            return Some(value);
        }
        let remote = self.remote.as_ref()?;
        let value = remote.get(key).await?;
        self.fast.set(key.to_string(), value.clone(), ttl_secs).await;
        Some(value)
    }

    async fn set_raw(&self, key: &str, value: String, ttl_secs: u64) {
        self.fast.set(key.to_string(), value.clone(), ttl_secs).await;
        if let Some(remote) = &self.remote {
            remote.set(key, &value, ttl_secs).await;
        }
    }

    /// Fetch and deserialize a JSON-encoded value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str, ttl_secs: u64) -> Option<T> {
        let raw = self.get_raw(key, ttl_secs).await?;
        serde_json::from_str(&raw).ok()
    }

    /// Serialize and store a JSON-encoded value.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        if let Ok(raw) = serde_json::to_string(value) {
            self.set_raw(key, raw, ttl_secs).await;
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.fast.invalidate(key).await;
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            fast: self.fast.stats().await,
            remote_degraded: self.remote.as_ref().map(|r| r.is_degraded()).unwrap_or(false),
        }
    }

    /// Re-check remote health; no-op if no remote tier is configured.
    pub async fn check_remote_health(&self) -> bool {
        match &self.remote {
            Some(remote) => remote.check_health().await,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Payload {
        value: u32,
    }

    proptest! {
        /// Any JSON-serializable payload stored in the fast tier reads back
        /// byte-for-byte equal, across a spread of keys and TTLs.
        #[test]
        fn json_values_round_trip_for_arbitrary_inputs(
            value in 0u32..1_000_000,
            key in "[a-z]{1,12}",
            ttl_secs in 1u64..3600,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let cache = GatewayCache::new(100);
                let payload = Payload { value };
                cache.set_json(&key, &payload, ttl_secs).await;
                let fetched: Option<Payload> = cache.get_json(&key, ttl_secs).await;
                prop_assert_eq!(fetched, Some(payload));
                Ok(())
            })?;
        }
    }

    struct InMemoryRemote {
        store: Mutex<std::collections::HashMap<String, String>>,
    }

    #[async_trait]
    impl RemoteCacheBackend for InMemoryRemote {
        async fn get(&self, key: &str) -> crate::error::Result<Option<String>> {
            Ok(self.store.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str, _ttl_secs: u64) -> crate::error::Result<()> {
            self.store
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn health(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn json_round_trips_through_fast_tier_only() {
        let cache = GatewayCache::new(10);
        let payload = Payload { value: 42 };
        cache.set_json("k", &payload, 60).await;
        let fetched: Option<Payload> = cache.get_json("k", 60).await;
        assert_eq!(fetched, Some(payload));
    }

    #[tokio::test]
    async fn remote_hit_backfills_fast_tier() {
        let remote = Arc::new(InMemoryRemote {
            store: Mutex::new(std::collections::HashMap::new()),
        });
        remote
            .set("k", &serde_json::to_string(&Payload { value: 7 }).unwrap(), 60)
            .await
            .unwrap();

        let cache = GatewayCache::new(10).with_remote(remote);
        let fetched: Option<Payload> = cache.get_json("k", 60).await;
        assert_eq!(fetched, Some(Payload { value: 7 }));

        // Now served from the fast tier without touching the remote stub.
        let stats_before = cache.stats().await;
        let fetched_again: Option<Payload> = cache.get_json("k", 60).await;
        assert_eq!(fetched_again, Some(Payload { value: 7 }));
        assert!(cache.stats().await.fast.hits > stats_before.fast.hits);
    }

    #[tokio::test]
    async fn writes_survive_with_no_remote_tier_configured() {
        let cache = GatewayCache::new(10);
        cache.set_json("k", &Payload { value: 1 }, 60).await;
        assert!(cache.check_remote_health().await);
    }
}
