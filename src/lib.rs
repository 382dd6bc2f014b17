//! # gateway-core
//!
//! Orchestration core for an AI query-serving gateway: a graph execution
//! runtime, a local model manager with capability-aware selection and
//! fallback chains, an adaptive Thompson-sampling router, a cost optimizer,
//! and a two-tier cache sit behind two purpose-built graphs — conversational
//! chat and search-augmented synthesis.
//!
//! ## Core Components
//!
//! - **Graph**: node/edge execution runtime with per-node timeouts and a
//!   circuit breaker on path length
//! - **Model**: local inference daemon client, metrics, and manager
//! - **Cache**: fast in-process tier plus an optional degrading remote tier
//! - **Bandit**: adaptive routing arm selection
//! - **Cost**: per-user budget tracking and strategy selection
//! - **Tracker**: rolling latency percentiles per operation
//!
//! ## Example
//!
//! ```rust,ignore
//! use gateway_core::{Gateway, GatewayConfig};
//! use gateway_core::model::{HttpModelBackend, ModelManager};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let backend = Arc::new(HttpModelBackend::new("http://localhost:11434", Duration::from_secs(30), 3));
//! let models = Arc::new(ModelManager::new(backend));
//! let gateway = Gateway::new(GatewayConfig::default(), models);
//! ```

extern crate self as gateway_core;

pub mod bandit;
pub mod cache;
pub mod chat;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod graph;
pub mod model;
pub mod provider;
pub mod research;
pub mod search;
pub mod tracker;

use std::sync::Arc;

pub use config::GatewayConfig;
pub use context::GatewayContext;
pub use error::{Error, Result};
use graph::state::GraphState;
use graph::GraphExecutor;

/// Top-level embedder-facing API: owns a `GatewayContext` and a default
/// search provider, and runs the chat or search graph against it.
pub struct Gateway {
    context: GatewayContext,
    provider: Arc<dyn provider::Provider>,
    model_hint: String,
}

impl Gateway {
    pub fn new(config: GatewayConfig, models: Arc<model::ModelManager>, provider: Arc<dyn provider::Provider>) -> Self {
        let model_hint = config.model.fallback_model.clone();
        Self {
            context: GatewayContext::new(config, models),
            provider,
            model_hint,
        }
    }

    pub fn context(&self) -> &GatewayContext {
        &self.context
    }

    pub async fn chat(&self, query: impl Into<String>, budget: f64) -> Result<GraphState> {
        let deadline = self.context.config.runtime.node_timeout;
        let graph = chat::build_chat_graph(
            self.context.cache.clone(),
            self.context.models.clone(),
            self.context.router.clone(),
            self.context.optimizer.clone(),
            self.model_hint.clone(),
            deadline,
            self.context.config.cache.responses_ttl_secs,
        );
        self.run(&graph, GraphState::new(query, budget)).await
    }

    pub async fn search(&self, query: impl Into<String>, budget: f64) -> Result<GraphState> {
        let deadline = self.context.config.runtime.node_timeout;
        let graph = search::build_search_graph(
            self.provider.clone(),
            self.context.cache.clone(),
            self.context.models.clone(),
            self.context.router.clone(),
            self.context.optimizer.clone(),
            deadline,
            self.context.config.cache.routing_ttl_secs,
            search::DEFAULT_ENHANCEMENT_CONCURRENCY,
        );
        self.run(&graph, GraphState::new(query, budget)).await
    }

    pub async fn research(&self, request: research::ResearchRequest) -> Result<GraphState> {
        let deadline = self.context.config.runtime.node_timeout;
        let graph = search::build_search_graph(
            self.provider.clone(),
            self.context.cache.clone(),
            self.context.models.clone(),
            self.context.router.clone(),
            self.context.optimizer.clone(),
            deadline,
            self.context.config.cache.routing_ttl_secs,
            search::DEFAULT_ENHANCEMENT_CONCURRENCY,
        );
        let state = request.into_graph_state();
        self.run(&graph, state).await
    }

    async fn run(&self, graph: &graph::GraphDefinition, mut state: GraphState) -> Result<GraphState> {
        let executor = GraphExecutor::new(
            self.context.config.runtime.node_timeout,
            self.context.config.runtime.circuit_breaker_path_length,
        );
        let handle = self.context.tracker.start_operation();
        let outcome = executor.run(graph, &mut state).await;
        self.context
            .tracker
            .finish_operation("gateway_request", handle, outcome.is_ok())
            .await;
        outcome.map(|_| state)
    }
}
