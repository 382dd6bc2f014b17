//! Gateway context: the shared resource bundle handed to every graph run.
//!
//! Generalizes the teacher's pattern of a single long-lived runtime struct
//! (`Orchestrator` implementations hold their client/router/tracker behind
//! `Arc` internally) into an explicit, constructible bundle the embedder
//! wires up once and shares across every request.

use std::sync::Arc;

use crate::bandit::AdaptiveRouter;
use crate::cache::GatewayCache;
use crate::config::GatewayConfig;
use crate::cost::CostOptimizer;
use crate::model::ModelManager;
use crate::tracker::PerformanceTracker;

/// Everything a graph execution needs, shared behind `Arc` across
/// concurrent requests.
#[derive(Clone)]
pub struct GatewayContext {
    pub config: Arc<GatewayConfig>,
    pub cache: Arc<GatewayCache>,
    pub models: Arc<ModelManager>,
    pub router: Arc<AdaptiveRouter>,
    pub optimizer: Arc<CostOptimizer>,
    pub tracker: Arc<PerformanceTracker>,
}

impl GatewayContext {
    pub fn new(config: GatewayConfig, models: Arc<ModelManager>) -> Self {
        let router = Arc::new(AdaptiveRouter::new(
            config.router.arms.clone(),
            config.router.min_exploration_rate,
        ));
        let cache = Arc::new(GatewayCache::new(config.cache.fast_cache_max_size));
        let optimizer = Arc::new(CostOptimizer::new(config.optimizer.clone()));
        let tracker = Arc::new(PerformanceTracker::new(crate::tracker::DEFAULT_WINDOW_SIZE));

        Self {
            config: Arc::new(config),
            cache,
            models,
            router,
            optimizer,
            tracker,
        }
    }

    pub fn with_remote_cache(mut self, remote: Arc<dyn crate::cache::RemoteCacheBackend>) -> Self {
        let fast_cap = self.config.cache.fast_cache_max_size;
        self.cache = Arc::new(GatewayCache::new(fast_cap).with_remote(remote));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::backend::MockModelBackend;

    #[tokio::test]
    async fn context_wires_every_component_from_a_single_config() {
        let backend = Arc::new(MockModelBackend::new(Vec::new()));
        let manager = Arc::new(ModelManager::new(backend));
        let ctx = GatewayContext::new(GatewayConfig::default(), manager);

        assert!(ctx.router.select_arm().await.is_ok());
        assert_eq!(ctx.cache.stats().await.fast.entry_count, 0);
    }
}
