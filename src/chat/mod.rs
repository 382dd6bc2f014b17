//! Conversational chat graph (C6): classify intent, check cache, generate,
//! write back to cache.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use gateway_macros::NodePayload;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::bandit::{strategy_for_arm, AdaptiveRouter};
use crate::cache::{keys, GatewayCache};
use crate::cost::CostOptimizer;
use crate::error::Result;
use crate::graph::state::GraphState;
use crate::graph::{Edge, GraphDefinition, Node, NodePayload, NodeResult};
use crate::model::{ModelManager, SelectionStrategy, TaskType};

const CLASSIFY_INTENT: &str = "classify_intent";
const FETCH_CONTEXT: &str = "fetch_context";
const GENERATE_RESPONSE: &str = "generate_response";
const CACHE_UPDATE: &str = "cache_update";

struct IntentPatterns {
    greeting: Regex,
    code: Regex,
    factual: Regex,
}

impl IntentPatterns {
    fn get() -> &'static Self {
        static PATTERNS: OnceLock<IntentPatterns> = OnceLock::new();
        PATTERNS.get_or_init(|| Self {
            greeting: Regex::new(r"(?i)^\s*(hi|hello|hey|good (morning|evening|afternoon)|thanks|thank you|bye)\b").unwrap(),
            code: Regex::new(r"(?i)\b(function|class|fn |code|compile|stack trace|exception|bug|refactor|implement)\b").unwrap(),
            factual: Regex::new(r"(?i)^\s*(what|who|when|where|how many|define)\b").unwrap(),
        })
    }

    fn classify(&self, query: &str) -> TaskType {
        if self.greeting.is_match(query) {
            TaskType::Greeting
        } else if self.code.is_match(query) {
            TaskType::Code
        } else if self.factual.is_match(query) {
            TaskType::Factual
        } else {
            TaskType::Conversational
        }
    }
}

/// Classifies the incoming query's task type via a deterministic regex
/// cascade, the same shape the teacher's `QueryType::classify` uses.
pub struct ClassifyIntentNode;

#[async_trait]
impl Node for ClassifyIntentNode {
    fn name(&self) -> &str {
        CLASSIFY_INTENT
    }

    async fn execute(&self, state: &GraphState) -> Result<NodeResult> {
        let task_type = IntentPatterns::get().classify(&state.processed_query);
        Ok(NodeResult::next(FETCH_CONTEXT)
            .with_task_type(task_type)
            .with_data(&task_type))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, NodePayload)]
#[node_payload(name = "fetch_context")]
struct FetchContextOutcome {
    cache_hit: bool,
    cached_response: Option<String>,
}

/// Looks up a cached response for this model/query pair; a hit takes the
/// graph straight to the terminal cache-hit edge without spending a model
/// call.
pub struct FetchContextNode {
    cache: Arc<GatewayCache>,
    model_hint: String,
}

impl FetchContextNode {
    pub fn new(cache: Arc<GatewayCache>, model_hint: impl Into<String>) -> Self {
        Self {
            cache,
            model_hint: model_hint.into(),
        }
    }
}

#[async_trait]
impl Node for FetchContextNode {
    fn name(&self) -> &str {
        FETCH_CONTEXT
    }

    async fn execute(&self, state: &GraphState) -> Result<NodeResult> {
        let key = keys::response_key(&self.model_hint, &state.processed_query);
        let cached: Option<String> = self.cache.get_json(&key, 0).await;

        let outcome = FetchContextOutcome {
            cache_hit: cached.is_some(),
            cached_response: cached,
        };
        Ok(NodeResult::next(GENERATE_RESPONSE).with_data(&outcome))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, NodePayload)]
#[node_payload(name = "generate_response")]
pub struct ChatResponse {
    pub text: String,
    pub model_used: String,
    pub from_cache: bool,
}

/// Generates a response via the model manager's fallback chain, or reuses a
/// cache hit from `FetchContextNode` without calling a model at all.
///
/// Consults the adaptive router (C8) for a routing arm and the cost
/// optimizer (C9) for a budget-aware decision on every live generation; a
/// cache hit short-circuits both, since there is nothing to route or spend.
pub struct GenerateResponseNode {
    manager: Arc<ModelManager>,
    router: Arc<AdaptiveRouter>,
    optimizer: Arc<CostOptimizer>,
    deadline: Duration,
}

impl GenerateResponseNode {
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
}

#[async_trait]
impl Node for GenerateResponseNode {
    fn name(&self) -> &str {
        GENERATE_RESPONSE
    }

    async fn execute(&self, state: &GraphState) -> Result<NodeResult> {
        let fetch = FetchContextOutcome::load(state).unwrap_or(FetchContextOutcome {
            cache_hit: false,
            cached_response: None,
        });

        if let Some(text) = fetch.cached_response {
            let response = ChatResponse {
                text,
                model_used: "cache".to_string(),
                from_cache: true,
            };
            return Ok(NodeResult::done().with_data(&response));
        }

        let task_type = state.task_type.unwrap_or(TaskType::Conversational);
        let arm = self.router.select_arm().await?;
        let decision = self
            .optimizer
            .optimize_request(
                &state.cost_optimizer_key(),
                state.user_tier,
                task_type,
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
                task_type,
                state.quality_requirement,
                strategy,
                Some(budget_hint),
                &state.processed_query,
                512,
                0.7,
                self.deadline,
            )
            .await?;

        let actual_cost = self.manager.estimate_cost(&outcome.model_used).await;
        self.optimizer
            .record_execution_cost(&state.cost_optimizer_key(), state.user_tier, actual_cost)
            .await;
        let reward = if outcome.models_tried.len() == 1 { 1.0 } else { 0.5 };
        self.router.update(&arm, reward).await?;

        let response = ChatResponse {
            text: outcome.result.text,
            model_used: outcome.model_used.clone(),
            from_cache: false,
        };

        Ok(NodeResult::next(CACHE_UPDATE)
            .with_data(&response)
            .with_cost(actual_cost)
            .with_model_used(outcome.model_used)
            .with_final_response(response.text.clone()))
    }

    fn cost_hint(&self, _state: &GraphState) -> f64 {
        0.0005
    }
}

/// Writes a freshly generated response back into the cache for future
/// identical queries.
pub struct CacheUpdateNode {
    cache: Arc<GatewayCache>,
    model_hint: String,
    ttl_secs: u64,
}

impl CacheUpdateNode {
    pub fn new(cache: Arc<GatewayCache>, model_hint: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            cache,
            model_hint: model_hint.into(),
            ttl_secs,
        }
    }
}

#[async_trait]
impl Node for CacheUpdateNode {
    fn name(&self) -> &str {
        CACHE_UPDATE
    }

    async fn execute(&self, state: &GraphState) -> Result<NodeResult> {
        if let Some(response) = ChatResponse::load(state) {
            if !response.from_cache {
                let key = keys::response_key(&self.model_hint, &state.processed_query);
                self.cache.set_json(&key, &response.text, self.ttl_secs).await;
            }
        }
        Ok(NodeResult::done())
    }
}

/// Builds the chat graph: classify -> fetch_context -> generate_response ->
/// cache_update, with generate_response short-circuiting to done on a cache
/// hit (handled inside the node itself, since the shortcut depends on a
/// value only known after `fetch_context` runs).
pub fn build_chat_graph(
    cache: Arc<GatewayCache>,
    manager: Arc<ModelManager>,
    router: Arc<AdaptiveRouter>,
    optimizer: Arc<CostOptimizer>,
    model_hint: impl Into<String>,
    deadline: Duration,
    cache_ttl_secs: u64,
) -> GraphDefinition {
    let model_hint = model_hint.into();
    GraphDefinition::new(CLASSIFY_INTENT)
        .with_node(Arc::new(ClassifyIntentNode))
        .with_node(Arc::new(FetchContextNode::new(cache.clone(), model_hint.clone())))
        .with_node(Arc::new(GenerateResponseNode::new(manager, router, optimizer, deadline)))
        .with_node(Arc::new(CacheUpdateNode::new(cache, model_hint, cache_ttl_secs)))
        .with_edge(Edge::always(CLASSIFY_INTENT, FETCH_CONTEXT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OptimizerConfig, RouterConfig};
    use crate::graph::GraphExecutor;
    use crate::model::{backend::MockModelBackend, GenerationResult, ModelDescriptor, ModelTier};

    fn descriptor(name: &str) -> ModelDescriptor {
        ModelDescriptor::new(name, ModelTier::T0, 0.0005).with_capabilities([
            TaskType::Greeting,
            TaskType::Conversational,
            TaskType::Factual,
            TaskType::Code,
        ])
    }

    fn test_router() -> Arc<AdaptiveRouter> {
        let config = RouterConfig::default();
        Arc::new(AdaptiveRouter::new(config.arms, config.min_exploration_rate))
    }

    fn test_optimizer() -> Arc<CostOptimizer> {
        Arc::new(CostOptimizer::new(OptimizerConfig::default()))
    }

    #[test]
    fn classifies_greeting_and_code_queries() {
        let patterns = IntentPatterns::get();
        assert_eq!(patterns.classify("Hello there!"), TaskType::Greeting);
        assert_eq!(
            patterns.classify("Why does this function throw an exception?"),
            TaskType::Code
        );
        assert_eq!(patterns.classify("What is the capital of France?"), TaskType::Factual);
        assert_eq!(patterns.classify("Tell me about your day"), TaskType::Conversational);
    }

    #[tokio::test]
    async fn cache_hit_skips_the_model_call_entirely() {
        let cache = Arc::new(GatewayCache::new(100));
        let key = keys::response_key("fast", "hello");
        cache.set_json(&key, &"cached reply".to_string(), 60).await;

        let backend = Arc::new(MockModelBackend::new(vec![descriptor("fast")]));
        let manager = Arc::new(ModelManager::new(backend));
        manager.initialize().await.unwrap();

        let graph = build_chat_graph(
            cache,
            manager,
            test_router(),
            test_optimizer(),
            "fast",
            Duration::from_secs(5),
            60,
        );
        let executor = GraphExecutor::new(Duration::from_secs(5), 20);
        let mut state = GraphState::new("hello", 1.0);
        executor.run(&graph, &mut state).await.unwrap();

        let response = ChatResponse::load(&state).unwrap();
        assert!(response.from_cache);
        assert_eq!(response.text, "cached reply");
        assert!(!state.path_names().contains(&CACHE_UPDATE));
    }

    #[tokio::test]
    async fn cache_miss_generates_and_writes_back() {
        let cache = Arc::new(GatewayCache::new(100));
        let backend = Arc::new(MockModelBackend::new(vec![descriptor("fast")]));
        backend.push_response(Ok(GenerationResult::ok("hi there", 3, 3))).await;
        let manager = Arc::new(ModelManager::new(backend));
        manager.initialize().await.unwrap();

        let graph = build_chat_graph(
            cache.clone(),
            manager,
            test_router(),
            test_optimizer(),
            "fast",
            Duration::from_secs(5),
            60,
        );
        let executor = GraphExecutor::new(Duration::from_secs(5), 20);
        let mut state = GraphState::new("hello", 1.0);
        executor.run(&graph, &mut state).await.unwrap();

        let response = ChatResponse::load(&state).unwrap();
        assert!(!response.from_cache);
        assert_eq!(response.text, "hi there");
        assert_eq!(state.final_response.as_deref(), Some("hi there"));
        assert_eq!(state.models_used, vec!["fast".to_string()]);

        let key = keys::response_key("fast", "hello");
        let cached: Option<String> = cache.get_json(&key, 60).await;
        assert_eq!(cached, Some("hi there".to_string()));
    }

    #[tokio::test]
    async fn exhausted_budget_short_circuits_without_calling_the_model() {
        let cache = Arc::new(GatewayCache::new(100));
        let backend = Arc::new(MockModelBackend::new(vec![descriptor("fast")]));
        let manager = Arc::new(ModelManager::new(backend));
        manager.initialize().await.unwrap();

        let optimizer = test_optimizer();
        optimizer
            .record_execution_cost("u1", crate::cost::UserTier::Free, 100.0)
            .await;

        let graph = build_chat_graph(
            cache,
            manager,
            test_router(),
            optimizer,
            "fast",
            Duration::from_secs(5),
            60,
        );
        let executor = GraphExecutor::new(Duration::from_secs(5), 20);
        let mut state = GraphState::new("hello", 1.0).with_user_id("u1");
        executor.run(&graph, &mut state).await.unwrap();

        assert!(state.final_response.as_deref().unwrap().contains("denied"));
        assert!(!state.warnings.is_empty());
    }
}
