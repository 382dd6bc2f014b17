//! Remote (second) cache tier with fail-open degradation.
//!
//! The remote tier is optional: when it is unreachable or absent, the
//! gateway keeps serving off the fast tier alone rather than failing
//! requests, mirroring the teacher's posture of treating cache-layer
//! signals (`PromptCache`) as best-effort bookkeeping never a hard
//! dependency.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Uniform contract for a remote key/value cache tier.
#[async_trait]
pub trait RemoteCacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    async fn health(&self) -> bool;
}

/// HTTP-backed remote cache speaking a minimal `GET/PUT /cache/:key` API.
pub struct HttpRemoteCache {
    base_url: String,
    http: reqwest::Client,
}

impl HttpRemoteCache {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl RemoteCacheBackend for HttpRemoteCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let url = format!("{}/cache/{}", self.base_url, key);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| crate::error::Error::upstream_unavailable("remote_cache", e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(crate::error::Error::upstream_unavailable(
                "remote_cache",
                format!("status {}", response.status()),
            ));
        }
        let body = response
            .text()
            .await
            .map_err(|e| crate::error::Error::upstream_unavailable("remote_cache", e.to_string()))?;
        Ok(Some(body))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let url = format!("{}/cache/{}?ttl={}", self.base_url, key, ttl_secs);
        let response = self
            .http
            .put(&url)
            .body(value.to_string())
            .send()
            .await
            .map_err(|e| crate::error::Error::upstream_unavailable("remote_cache", e.to_string()))?;
        if !response.status().is_success() {
            return Err(crate::error::Error::upstream_unavailable(
                "remote_cache",
                format!("status {}", response.status()),
            ));
        }
        Ok(())
    }

    async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        matches!(self.http.get(&url).send().await, Ok(r) if r.status().is_success())
    }
}

/// Wraps a `RemoteCacheBackend` and tracks whether it is currently healthy,
/// downgrading every operation to a no-op `Ok` once it has been observed
/// failing so callers never block on a dead remote tier.
pub struct DegradingRemoteCache {
    inner: Arc<dyn RemoteCacheBackend>,
    degraded: AtomicBool,
}

impl DegradingRemoteCache {
    pub fn new(inner: Arc<dyn RemoteCacheBackend>) -> Self {
        Self {
            inner,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Re-check the remote tier's health and clear degraded mode if it has
    /// recovered.
    pub async fn check_health(&self) -> bool {
        let healthy = self.inner.health().await;
        self.degraded.store(!healthy, Ordering::SeqCst);
        healthy
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        if self.degraded.load(Ordering::SeqCst) {
            return None;
        }
        match self.inner.get(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "remote cache get failed, degrading");
                self.degraded.store(true, Ordering::SeqCst);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl_secs: u64) {
        if self.degraded.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.inner.set(key, value, ttl_secs).await {
            warn!(error = %err, "remote cache set failed, degrading");
            self.degraded.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FlakyBackend {
        failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl RemoteCacheBackend for FlakyBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(crate::error::Error::upstream_unavailable("flaky", "down"));
            }
            Ok(Some("value".to_string()))
        }

        async fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<()> {
            Ok(())
        }

        async fn health(&self) -> bool {
            self.failures_remaining.load(Ordering::SeqCst) == 0
        }
    }

    #[tokio::test]
    async fn failing_get_enters_degraded_mode_and_fails_open() {
        let backend = Arc::new(FlakyBackend {
            failures_remaining: AtomicU32::new(1),
        });
        let cache = DegradingRemoteCache::new(backend);

        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_degraded());

        // Degraded mode short-circuits even after the backend would
        // otherwise succeed, until health is explicitly rechecked.
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn health_recheck_clears_degraded_mode_once_recovered() {
        let backend = Arc::new(FlakyBackend {
            failures_remaining: AtomicU32::new(0),
        });
        let cache = DegradingRemoteCache::new(backend);
        cache.degraded.store(true, Ordering::SeqCst);

        assert!(cache.check_health().await);
        assert!(!cache.is_degraded());
    }
}
