//! Configuration structs for every tunable named in the gateway contract.
//!
//! Follows the teacher's pattern of small, `Default`-backed, builder-style
//! (`with_*`) config structs (`ClientConfig`, `OrchestratorConfig`,
//! `BatchConfig`) rather than a file-driven configuration crate — the
//! gateway is constructed explicitly by its embedder, same as the teacher's
//! library is constructed explicitly by its host process.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache layer configuration (C1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Remote tier connection string; `None` runs fast-tier-only.
    pub remote_url: Option<String>,
    /// Connection pool size for the remote tier.
    pub max_connections: u32,
    /// Maximum number of entries held in the fast tier.
    pub fast_cache_max_size: usize,
    /// Default TTL for routing-strategy cache entries, in seconds.
    pub routing_ttl_secs: u64,
    /// Default TTL for cached responses, in seconds.
    pub responses_ttl_secs: u64,
    /// Default TTL for cached conversation turns, in seconds.
    pub conversations_ttl_secs: u64,
    /// Timeout for a remote-tier health check.
    pub health_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            max_connections: 20,
            fast_cache_max_size: 1_000,
            routing_ttl_secs: 300,
            responses_ttl_secs: 3_600,
            conversations_ttl_secs: 86_400,
            health_timeout: Duration::from_secs(10),
        }
    }
}

impl CacheConfig {
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn with_fast_cache_max_size(mut self, size: usize) -> Self {
        self.fast_cache_max_size = size;
        self
    }
}

/// Model manager configuration (C2/C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of the local inference daemon.
    pub inference_host: String,
    /// Request timeout for a single generate call.
    pub request_timeout: Duration,
    /// Maximum retry attempts on transport/retryable errors.
    pub max_retries: u32,
    /// Default model used when no candidate survives selection.
    pub fallback_model: String,
    /// TTL for the cached `list_models` response.
    pub model_list_ttl: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            inference_host: "http://localhost:11434".to_string(),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            fallback_model: "llama3:8b".to_string(),
            model_list_ttl: Duration::from_secs(60),
        }
    }
}

/// Adaptive router configuration (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Minimum fraction of selections forced to a uniform-random arm.
    pub min_exploration_rate: f64,
    /// The fixed set of routing arms the bandit chooses between.
    pub arms: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_exploration_rate: 0.05,
            arms: vec![
                "fast_chat".to_string(),
                "search_augmented".to_string(),
                "api_fallback".to_string(),
                "hybrid_mode".to_string(),
            ],
        }
    }
}

/// Per-tier monthly/daily budget limits, in USD.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierLimits {
    pub monthly: f64,
    pub daily: f64,
}

/// Cost optimizer configuration (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub free_tier: TierLimits,
    pub pro_tier: TierLimits,
    pub enterprise_tier: TierLimits,
    /// TTL for the write-through persistence of budgets to the cache layer.
    pub budget_persist_ttl: Duration,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            free_tier: TierLimits {
                monthly: 20.0,
                daily: 5.0,
            },
            pro_tier: TierLimits {
                monthly: 500.0,
                daily: 25.0,
            },
            enterprise_tier: TierLimits {
                monthly: 10_000.0,
                daily: 200.0,
            },
            budget_persist_ttl: Duration::from_secs(86_400),
        }
    }
}

/// Graph runtime configuration (C5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Default per-node execution timeout.
    pub node_timeout: Duration,
    /// Maximum length of an execution path before the circuit breaker trips.
    pub circuit_breaker_path_length: usize,
    /// Default global request deadline.
    pub global_deadline: Duration,
    /// Default per-user rate limit, requests per minute.
    pub rate_limit_per_minute: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_timeout: Duration::from_secs(30),
            circuit_breaker_path_length: 20,
            global_deadline: Duration::from_secs(30),
            rate_limit_per_minute: 60,
        }
    }
}

/// Top-level gateway configuration bundling every component's settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub cache: CacheConfig,
    pub model: ModelConfig,
    pub router: RouterConfig,
    pub optimizer: OptimizerConfig,
    pub runtime: RuntimeConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.cache.fast_cache_max_size, 1_000);
        assert_eq!(config.cache.max_connections, 20);
        assert_eq!(config.router.min_exploration_rate, 0.05);
        assert_eq!(config.optimizer.free_tier.monthly, 20.0);
        assert_eq!(config.optimizer.free_tier.daily, 5.0);
        assert_eq!(config.runtime.circuit_breaker_path_length, 20);
        assert_eq!(config.runtime.node_timeout, Duration::from_secs(30));
    }

    #[test]
    fn cache_config_builder_overrides_defaults() {
        let config = CacheConfig::default()
            .with_remote_url("redis://localhost:6379")
            .with_fast_cache_max_size(500);
        assert_eq!(config.remote_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.fast_cache_max_size, 500);
    }
}
