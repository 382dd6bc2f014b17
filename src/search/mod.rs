//! Search-augmented graph (C7): deterministic routing, provider search with
//! cache-then-provider-then-cache-write, bounded-concurrency content
//! enhancement, and response synthesis with a deterministic fallback.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use gateway_macros::NodePayload;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::bandit::{strategy_for_arm, AdaptiveRouter};
use crate::cache::{keys, GatewayCache};
use crate::cost::CostOptimizer;
use crate::error::Result;
use crate::graph::state::{Citation, GraphState};
use crate::graph::{GraphDefinition, Node, NodePayload, NodeResult};
use crate::model::{ModelManager, QualityRequirement, SelectionStrategy, TaskType};
use crate::provider::{Provider, ScrapedPage, SearchHit};

const SMART_ROUTER: &str = "smart_router";
const PROVIDER_SEARCH: &str = "provider_search";
const CONTENT_ENHANCEMENT: &str = "content_enhancement";
const RESPONSE_SYNTHESIS: &str = "response_synthesis";

/// Default bound on concurrent scrape calls during content enhancement.
pub const DEFAULT_ENHANCEMENT_CONCURRENCY: usize = 3;
/// Length a scraped page's content is truncated to when deriving a
/// citation snippet.
const CITATION_SNIPPET_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Answer directly with no external lookup.
    Direct,
    /// Fetch search hits only; snippets are enough context.
    Search,
    /// Fetch search hits, then scrape the top few for full content.
    SearchAndEnhance,
}

struct RoutingPatterns {
    needs_current_info: Regex,
    needs_depth: Regex,
}

impl RoutingPatterns {
    fn get() -> &'static Self {
        static PATTERNS: OnceLock<RoutingPatterns> = OnceLock::new();
        PATTERNS.get_or_init(|| Self {
            needs_current_info: Regex::new(
                r"(?i)\b(latest|current|today|this week|recent|now|news|price|weather|score)\b",
            )
            .unwrap(),
            needs_depth: Regex::new(r"(?i)\b(compare|comprehensive|detailed|in depth|analysis|pros and cons)\b")
                .unwrap(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, NodePayload)]
#[node_payload(name = "smart_router")]
pub struct RoutingDecision {
    pub strategy: SearchStrategy,
    pub result_count: usize,
}

/// Deterministic routing over budget, quality, and query signals, the same
/// rule order the teacher's `select_model` follows for capability filtering
/// before scoring:
///
/// 1. No current-info signal in the query at all -> `Direct`.
/// 2. Can't even afford a plain search -> `Direct`.
/// 3. Otherwise `Search` or `SearchAndEnhance` depending on whether the
///    query also asks for depth, with a result count driven by quality
///    headroom and estimated complexity rather than the strategy alone.
pub struct SmartRouterNode {
    search_cost_hint: f64,
}

impl SmartRouterNode {
    pub fn new(search_cost_hint: f64) -> Self {
        Self { search_cost_hint }
    }
}

#[async_trait]
impl Node for SmartRouterNode {
    fn name(&self) -> &str {
        SMART_ROUTER
    }

    async fn execute(&self, state: &GraphState) -> Result<NodeResult> {
        let patterns = RoutingPatterns::get();
        let needs_search = patterns.needs_current_info.is_match(&state.processed_query);
        let needs_depth = patterns.needs_depth.is_match(&state.processed_query);

        let decision = if !needs_search {
            RoutingDecision {
                strategy: SearchStrategy::Direct,
                result_count: 0,
            }
        } else if state.remaining_budget < self.search_cost_hint {
            // Can't even afford one plain search call; answer from the
            // model's own knowledge instead of erroring out.
            RoutingDecision {
                strategy: SearchStrategy::Direct,
                result_count: 0,
            }
        } else {
            let strategy = if needs_depth {
                SearchStrategy::SearchAndEnhance
            } else {
                SearchStrategy::Search
            };
            let result_count = if state.quality_requirement == QualityRequirement::Premium
                && state.remaining_budget >= self.search_cost_hint * 3.0
            {
                3
            } else if state.complexity > 0.7 {
                2
            } else if needs_depth {
                3
            } else {
                2
            };
            RoutingDecision { strategy, result_count }
        };

        let next = match decision.strategy {
            SearchStrategy::Direct => RESPONSE_SYNTHESIS,
            SearchStrategy::Search | SearchStrategy::SearchAndEnhance => PROVIDER_SEARCH,
        };
        Ok(NodeResult::next(next)
            .with_task_type(TaskType::Search)
            .with_data(&decision))
    }
}

/// Looks up search results in the cache, falling through to the provider on
/// a miss and writing the fresh results back.
pub struct ProviderSearchNode {
    provider: Arc<dyn Provider>,
    cache: Arc<GatewayCache>,
    cache_ttl_secs: u64,
}

impl ProviderSearchNode {
    pub fn new(provider: Arc<dyn Provider>, cache: Arc<GatewayCache>, cache_ttl_secs: u64) -> Self {
        Self {
            provider,
            cache,
            cache_ttl_secs,
        }
    }
}

#[async_trait]
impl Node for ProviderSearchNode {
    fn name(&self) -> &str {
        PROVIDER_SEARCH
    }

    async fn execute(&self, state: &GraphState) -> Result<NodeResult> {
        let routing = RoutingDecision::load(state).unwrap_or(RoutingDecision {
            strategy: SearchStrategy::Search,
            result_count: 2,
        });

        let key = keys::routing_key("search_hits", &state.processed_query);
        let hits: Vec<SearchHit> = match self.cache.get_json(&key, self.cache_ttl_secs).await {
            Some(cached) => cached,
            None => {
                let fetched = self
                    .provider
                    .search(&state.processed_query, routing.result_count)
                    .await?;
                self.cache.set_json(&key, &fetched, self.cache_ttl_secs).await;
                fetched
            }
        };

        let next = match routing.strategy {
            SearchStrategy::SearchAndEnhance => CONTENT_ENHANCEMENT,
            _ => RESPONSE_SYNTHESIS,
        };
        let sources = hits.iter().map(|h| h.url.clone()).collect();
        Ok(NodeResult::next(next).with_data(&hits).with_sources(sources))
    }

    fn cost_hint(&self, _state: &GraphState) -> f64 {
        self.provider.cost_per_request()
    }
}

/// Scrapes the top search hits concurrently, bounded by a semaphore so one
/// request can't fan out unbounded provider load. A failing scrape is
/// dropped rather than failing the whole node — partial content is still
/// useful to synthesis. Hits beyond `state.max_enhance` are never scraped at
/// all, regardless of how many the search step returned.
pub struct ContentEnhancementNode {
    provider: Arc<dyn Provider>,
    concurrency: usize,
}

impl ContentEnhancementNode {
    pub fn new(provider: Arc<dyn Provider>, concurrency: usize) -> Self {
        Self {
            provider,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl Node for ContentEnhancementNode {
    fn name(&self) -> &str {
        CONTENT_ENHANCEMENT
    }

    async fn execute(&self, state: &GraphState) -> Result<NodeResult> {
        let mut hits: Vec<SearchHit> = state.get_result(PROVIDER_SEARCH).unwrap_or_default();
        hits.truncate(state.max_enhance);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let tasks = hits.into_iter().map(|hit| {
            let provider = self.provider.clone();
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed unexpectedly");
                provider.scrape(&hit.url).await
            }
        });

        let results = join_all(tasks).await;
        let mut pages = Vec::new();
        let mut result = NodeResult::next(RESPONSE_SYNTHESIS);
        for outcome in results {
            match outcome {
                Ok(page) => pages.push(page),
                Err(err) => {
                    result = result.with_warning(format!("content_enhancement: {err}"));
                }
            }
        }

        Ok(result.with_data(&pages))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, NodePayload)]
#[node_payload(name = "response_synthesis")]
pub struct SynthesizedResponse {
    pub text: String,
    pub used_model: bool,
    pub citations: Vec<Citation>,
}

/// Synthesizes a final answer from whatever context the graph accumulated.
/// Falls back to a deterministic bullet-list template if the model call
/// fails, so a model outage degrades quality rather than failing the
/// request outright.
pub struct ResponseSynthesisNode {
    manager: Arc<ModelManager>,
    router: Arc<AdaptiveRouter>,
    optimizer: Arc<CostOptimizer>,
    deadline: Duration,
}

impl ResponseSynthesisNode {
    pub fn new(
        manager: Arc<ModelManager>,
        router: Arc<AdaptiveRouter>,
        optimizer: Arc<CostOptimizer>,
        deadline: Duration,
    ) -> Self {
        Self {
            manager,
            router,
            optimizer,
            deadline,
        }
    }

    fn deterministic_fallback(query: &str, hits: &[SearchHit]) -> String {
        if hits.is_empty() {
            return format!("I don't have enough information to answer: {query}");
        }
        let mut lines = vec![format!("Here is what I found about \"{query}\":")];
        for hit in hits {
            lines.push(format!("- {}: {}", hit.title, hit.snippet));
        }
        lines.join("\n")
    }

    /// Derives citations for the synthesized answer, preferring scraped
    /// pages (full content) over bare search hits when both are available
    /// for the same source.
    fn derive_citations(hits: &[SearchHit], pages: &[ScrapedPage]) -> Vec<Citation> {
        if !pages.is_empty() {
            return pages
                .iter()
                .map(|page| {
                    let title = hits
                        .iter()
                        .find(|h| h.url == page.url)
                        .map(|h| h.title.clone())
                        .unwrap_or_else(|| page.url.clone());
                    Citation {
                        title,
                        url: page.url.clone(),
                        snippet: page.content.chars().take(CITATION_SNIPPET_LEN).collect(),
                    }
                })
                .collect();
        }
        hits.iter()
            .map(|hit| Citation {
                title: hit.title.clone(),
                url: hit.url.clone(),
                snippet: hit.snippet.chars().take(CITATION_SNIPPET_LEN).collect(),
            })
            .collect()
    }
}

#[async_trait]
impl Node for ResponseSynthesisNode {
    fn name(&self) -> &str {
        RESPONSE_SYNTHESIS
    }

    async fn execute(&self, state: &GraphState) -> Result<NodeResult> {
        let hits: Vec<SearchHit> = state.get_result(PROVIDER_SEARCH).unwrap_or_default();
        let pages: Vec<ScrapedPage> = state.get_result(CONTENT_ENHANCEMENT).unwrap_or_default();
        let citations = Self::derive_citations(&hits, &pages);

        let mut prompt = state.processed_query.clone();
        if !hits.is_empty() {
            prompt.push_str("\n\nSearch results:\n");
            for hit in &hits {
                prompt.push_str(&format!("- {}: {}\n", hit.title, hit.snippet));
            }
        }
        if !pages.is_empty() {
            prompt.push_str("\nAdditional context:\n");
            for page in &pages {
                prompt.push_str(&page.content);
                prompt.push('\n');
            }
        }

        let arm = self.router.select_arm().await?;
        let decision = self
            .optimizer
            .optimize_request(
                &state.cost_optimizer_key(),
                state.user_tier,
                TaskType::Synthesis,
                state.quality_requirement,
                &self.manager,
            )
            .await?;

        if !decision.allowed {
            return Ok(NodeResult::done()
                .with_final_response("Request denied: daily or monthly budget exhausted.")
                .with_warning("cost optimizer denied request due to budget exhaustion"));
        }

        let strategy = match decision.strategy {
            SelectionStrategy::CostFirst => SelectionStrategy::CostFirst,
            _ => strategy_for_arm(&arm),
        };
        let budget_hint = decision.budget_hint.min(state.remaining_budget);

        let outcome = self
            .manager
            .generate_with_fallback(
                TaskType::Synthesis,
                state.quality_requirement,
                strategy,
                Some(budget_hint),
                &prompt,
                768,
                0.5,
                self.deadline,
            )
            .await;

        let (response, mut result, reward) = match outcome {
            Ok(outcome) => {
                let actual_cost = self.manager.estimate_cost(&outcome.model_used).await;
                self.optimizer
                    .record_execution_cost(&state.cost_optimizer_key(), state.user_tier, actual_cost)
                    .await;
                let response = SynthesizedResponse {
                    text: outcome.result.text,
                    used_model: true,
                    citations: citations.clone(),
                };
                let result = NodeResult::done()
                    .with_cost(actual_cost)
                    .with_model_used(outcome.model_used)
                    .with_citations(citations);
                (response, result, 1.0)
            }
            Err(err) => {
                let response = SynthesizedResponse {
                    text: Self::deterministic_fallback(&state.processed_query, &hits),
                    used_model: false,
                    citations: citations.clone(),
                };
                let result = NodeResult::done()
                    .with_error(format!("response_synthesis: {err}"))
                    .with_citations(citations);
                (response, result, 0.0)
            }
        };
        self.router.update(&arm, reward).await?;

        result = result.with_final_response(response.text.clone());
        Ok(result.with_data(&response))
    }

    fn cost_hint(&self, _state: &GraphState) -> f64 {
        0.001
    }
}

/// Builds the search graph: smart_router branches to either
/// provider_search or directly to response_synthesis; provider_search
/// branches to content_enhancement or response_synthesis depending on the
/// routing decision.
#[allow(clippy::too_many_arguments)]
pub fn build_search_graph(
    provider: Arc<dyn Provider>,
    cache: Arc<GatewayCache>,
    manager: Arc<ModelManager>,
    router: Arc<AdaptiveRouter>,
    optimizer: Arc<CostOptimizer>,
    deadline: Duration,
    cache_ttl_secs: u64,
    enhancement_concurrency: usize,
) -> GraphDefinition {
    let search_cost_hint = provider.cost_per_request();
    GraphDefinition::new(SMART_ROUTER)
        .with_node(Arc::new(SmartRouterNode::new(search_cost_hint)))
        .with_node(Arc::new(ProviderSearchNode::new(
            provider.clone(),
            cache,
            cache_ttl_secs,
        )))
        .with_node(Arc::new(ContentEnhancementNode::new(
            provider,
            enhancement_concurrency,
        )))
        .with_node(Arc::new(ResponseSynthesisNode::new(
            manager, router, optimizer, deadline,
        )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::GatewayCache;
    use crate::config::{OptimizerConfig, RouterConfig};
    use crate::cost::CostOptimizer;
    use crate::graph::GraphExecutor;
    use crate::model::backend::MockModelBackend;
    use crate::model::{GenerationResult, ModelDescriptor, ModelManager, ModelTier};
    use crate::provider::MockProvider;

    fn model_descriptor() -> ModelDescriptor {
        ModelDescriptor::new("fast", ModelTier::T0, 0.0005).with_capabilities([TaskType::Synthesis])
    }

    fn test_router() -> Arc<AdaptiveRouter> {
        let config = RouterConfig::default();
        Arc::new(AdaptiveRouter::new(config.arms, config.min_exploration_rate))
    }

    fn test_optimizer() -> Arc<CostOptimizer> {
        Arc::new(CostOptimizer::new(OptimizerConfig::default()))
    }

    #[test]
    fn direct_queries_skip_search_entirely() {
        let patterns = RoutingPatterns::get();
        assert!(!patterns.needs_current_info.is_match("What is a binary search tree?"));
    }

    #[test]
    fn depth_queries_request_enhancement_with_three_results() {
        let patterns = RoutingPatterns::get();
        assert!(patterns.needs_current_info.is_match("latest news on rust releases"));
        assert!(patterns.needs_depth.is_match("give me a comprehensive comparison"));
    }

    #[tokio::test]
    async fn direct_strategy_bypasses_provider_search() {
        let backend = Arc::new(MockModelBackend::new(vec![model_descriptor()]));
        backend.push_response(Ok(GenerationResult::ok("an explanation", 5, 5))).await;
        let manager = Arc::new(ModelManager::new(backend));
        manager.initialize().await.unwrap();

        let provider = Arc::new(MockProvider::new("mock"));
        let cache = Arc::new(GatewayCache::new(100));
        let graph = build_search_graph(
            provider,
            cache,
            manager,
            test_router(),
            test_optimizer(),
            Duration::from_secs(5),
            60,
            3,
        );
        let executor = GraphExecutor::new(Duration::from_secs(5), 20);
        let mut state = GraphState::new("What is a binary search tree?", 1.0);
        executor.run(&graph, &mut state).await.unwrap();

        assert_eq!(state.path_names(), vec![SMART_ROUTER, RESPONSE_SYNTHESIS]);
        let response = SynthesizedResponse::load(&state).unwrap();
        assert!(response.used_model);
    }

    #[tokio::test]
    async fn search_and_enhance_runs_the_full_pipeline_with_partial_scrape_failure() {
        let backend = Arc::new(MockModelBackend::new(vec![model_descriptor()]));
        backend.push_response(Ok(GenerationResult::ok("synthesized answer", 8, 8))).await;
        let manager = Arc::new(ModelManager::new(backend));
        manager.initialize().await.unwrap();

        let provider = Arc::new(MockProvider::new("mock"));
        provider
            .push_search_result(Ok(vec![
                SearchHit {
                    title: "A".to_string(),
                    url: "https://a.example".to_string(),
                    snippet: "about a".to_string(),
                },
                SearchHit {
                    title: "B".to_string(),
                    url: "https://b.example".to_string(),
                    snippet: "about b".to_string(),
                },
                SearchHit {
                    title: "C".to_string(),
                    url: "https://c.example".to_string(),
                    snippet: "about c".to_string(),
                },
            ]))
            .await;
        provider
            .push_scrape_result(Ok(ScrapedPage {
                url: "https://a.example".to_string(),
                content: "full content a".to_string(),
                truncated: false,
            }))
            .await;
        provider
            .push_scrape_result(Err(crate::error::Error::upstream_unavailable("mock", "down")))
            .await;
        provider
            .push_scrape_result(Ok(ScrapedPage {
                url: "https://c.example".to_string(),
                content: "full content c".to_string(),
                truncated: false,
            }))
            .await;

        let cache = Arc::new(GatewayCache::new(100));
        let graph = build_search_graph(
            provider,
            cache,
            manager,
            test_router(),
            test_optimizer(),
            Duration::from_secs(5),
            60,
            3,
        );
        let executor = GraphExecutor::new(Duration::from_secs(5), 20);
        let mut state = GraphState::new("comprehensive comparison of the latest rust releases", 1.0);
        executor.run(&graph, &mut state).await.unwrap();

        assert_eq!(
            state.path_names(),
            vec![SMART_ROUTER, PROVIDER_SEARCH, CONTENT_ENHANCEMENT, RESPONSE_SYNTHESIS]
        );
        assert_eq!(state.warnings.len(), 1);
        let pages: Vec<ScrapedPage> = state.get_result(CONTENT_ENHANCEMENT).unwrap();
        assert_eq!(pages.len(), 2);
        let response = SynthesizedResponse::load(&state).unwrap();
        assert_eq!(response.citations.len(), 2);
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_deterministic_template() {
        let backend = Arc::new(MockModelBackend::new(vec![model_descriptor()]));
        // No scripted responses: every generate call fails.
        let manager = Arc::new(ModelManager::new(backend));
        manager.initialize().await.unwrap();

        let provider = Arc::new(MockProvider::new("mock"));
        provider
            .push_search_result(Ok(vec![SearchHit {
                title: "Weather".to_string(),
                url: "https://weather.example".to_string(),
                snippet: "sunny today".to_string(),
            }]))
            .await;

        let cache = Arc::new(GatewayCache::new(100));
        let graph = build_search_graph(
            provider,
            cache,
            manager,
            test_router(),
            test_optimizer(),
            Duration::from_secs(5),
            60,
            3,
        );
        let executor = GraphExecutor::new(Duration::from_secs(5), 20);
        let mut state = GraphState::new("what is the current weather", 1.0);
        executor.run(&graph, &mut state).await.unwrap();

        let response = SynthesizedResponse::load(&state).unwrap();
        assert!(!response.used_model);
        assert!(response.text.contains("Weather"));
        assert_eq!(response.citations.len(), 1);
    }

    #[tokio::test]
    async fn budget_too_small_for_a_search_routes_direct_even_with_a_current_info_query() {
        let node = SmartRouterNode::new(0.01);
        let state = GraphState::new("what's the latest news today", 0.001);
        let result = node.execute(&state).await.unwrap();
        let decision: RoutingDecision = serde_json::from_value(result.data.unwrap()).unwrap();
        assert_eq!(decision.strategy, SearchStrategy::Direct);
        assert_eq!(result.next_nodes, vec![RESPONSE_SYNTHESIS.to_string()]);
    }

    #[tokio::test]
    async fn premium_quality_with_budget_headroom_requests_three_results() {
        let node = SmartRouterNode::new(0.01);
        let state = GraphState::new("latest news on rust releases", 1.0)
            .with_quality_requirement(QualityRequirement::Premium);
        let result = node.execute(&state).await.unwrap();
        let decision: RoutingDecision = serde_json::from_value(result.data.unwrap()).unwrap();
        assert_eq!(decision.strategy, SearchStrategy::Search);
        assert_eq!(decision.result_count, 3);
    }
}
