//! Graph execution runtime (C5).
//!
//! Generalizes the teacher's `Orchestrator` trait (`orchestrator.rs`) — an
//! async, depth-bounded control loop over a single long-lived call — into a
//! graph of named nodes connected by static or conditional edges, each with
//! its own timeout and a circuit breaker on total path length instead of a
//! fixed recursion depth.

pub mod state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::TaskType;
pub use state::{Citation, ExecutionStep, GraphState};

/// A node output type that knows its own name in `GraphState`'s
/// `intermediate_results` map, so call sites read it without repeating the
/// node name as a string literal. Implement via `#[derive(NodePayload)]`
/// rather than by hand. `load` is read-only — nothing in this trait ever
/// takes `&mut GraphState`; writing a value back happens through the
/// `NodeResult` a node returns, merged in by `GraphExecutor::run`.
pub trait NodePayload: serde::Serialize + for<'de> serde::Deserialize<'de> + Sized {
    const NODE_NAME: &'static str;

    fn load(state: &GraphState) -> Option<Self> {
        state.get_result(Self::NODE_NAME)
    }
}

/// What a node produced and wants to happen next. Nodes only ever see a
/// shared `&GraphState`; every effect a node wants to have on the request's
/// state — a stored payload, a cost, a confidence update, a promoted
/// top-level field — travels back through this struct, and only
/// `GraphExecutor::run` ever applies it.
#[derive(Debug, Default)]
pub struct NodeResult {
    /// The node's own output, stored under its node name.
    pub data: Option<Value>,
    /// Confidence in the answer so far, if this node has an opinion.
    pub confidence: Option<f64>,
    /// Actual cost incurred running this node, in USD. Falls back to the
    /// node's `cost_hint` if left at zero.
    pub cost: f64,
    /// Node(s) to run next, in priority order; the executor follows the
    /// first entry. Empty (with `should_stop` unset) is treated the same as
    /// `should_stop`.
    pub next_nodes: Vec<String>,
    /// True once this node has produced a final answer for the request.
    pub should_stop: bool,

    pub task_type: Option<TaskType>,
    pub model_used: Option<String>,
    pub final_response: Option<String>,
    pub citations: Vec<Citation>,
    pub sources_consulted: Vec<String>,
    pub warnings: Vec<String>,
    pub node_errors: Vec<String>,
    pub escalated: bool,
}

impl NodeResult {
    pub fn next(node: impl Into<String>) -> Self {
        Self {
            next_nodes: vec![node.into()],
            ..Default::default()
        }
    }

    pub fn done() -> Self {
        Self {
            should_stop: true,
            ..Default::default()
        }
    }

    pub fn with_data<T: Serialize>(mut self, value: &T) -> Self {
        self.data = serde_json::to_value(value).ok();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_model_used(mut self, model: impl Into<String>) -> Self {
        self.model_used = Some(model.into());
        self
    }

    pub fn with_final_response(mut self, response: impl Into<String>) -> Self {
        self.final_response = Some(response.into());
        self
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources_consulted = sources;
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.node_errors.push(error.into());
        self
    }

    pub fn escalated(mut self) -> Self {
        self.escalated = true;
        self
    }
}

/// One unit of work in the graph. Implementations read `GraphState` and
/// report what changed via the returned `NodeResult`; they never see a
/// mutable reference, so a node literally cannot reach into another node's
/// state by accident.
#[async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, state: &GraphState) -> Result<NodeResult>;
    /// Per-node execution budget spent before the node runs, in USD. Most
    /// nodes are free (routing, classification); nodes that call out to a
    /// model or a paid provider override this.
    fn cost_hint(&self, _state: &GraphState) -> f64 {
        0.0
    }
}

/// An edge from one node to the next, optionally gated on a predicate over
/// the state (a "conditional edge").
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: Option<Arc<dyn Fn(&GraphState) -> bool + Send + Sync>>,
}

impl Edge {
    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    pub fn when(
        from: impl Into<String>,
        to: impl Into<String>,
        condition: impl Fn(&GraphState) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: Some(Arc::new(condition)),
        }
    }
}

/// A static graph definition: named nodes plus the edges between them.
/// `Node::execute`'s own `NodeResult::next_nodes` always takes priority over
/// a statically-declared edge — edges exist for graphs whose routing is
/// entirely data-driven rather than decided inside the node.
pub struct GraphDefinition {
    pub entry: String,
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: Vec<Edge>,
}

impl GraphDefinition {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            nodes: HashMap::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: Arc<dyn Node>) -> Self {
        self.nodes.insert(node.name().to_string(), node);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    fn node(&self, name: &str) -> Option<Arc<dyn Node>> {
        self.nodes.get(name).cloned()
    }

    /// First matching outgoing edge for a node, in declaration order.
    fn next_by_edge(&self, from: &str, state: &GraphState) -> Option<String> {
        self.edges
            .iter()
            .filter(|e| e.from == from)
            .find(|e| e.condition.as_ref().map(|c| c(state)).unwrap_or(true))
            .map(|e| e.to.clone())
    }
}

/// Runs a `GraphDefinition` to completion, enforcing per-node timeouts, a
/// circuit breaker on total path length, and budget exhaustion. The only
/// code in the graph runtime that ever holds `&mut GraphState` — every node
/// effect is applied here, from the `NodeResult` the node returned.
pub struct GraphExecutor {
    node_timeout: Duration,
    circuit_breaker_path_length: usize,
}

impl GraphExecutor {
    pub fn new(node_timeout: Duration, circuit_breaker_path_length: usize) -> Self {
        Self {
            node_timeout,
            circuit_breaker_path_length,
        }
    }

    pub async fn run(&self, graph: &GraphDefinition, state: &mut GraphState) -> Result<()> {
        let mut current = graph.entry.clone();

        loop {
            if state.path_len() >= self.circuit_breaker_path_length {
                warn!(path_len = state.path_len(), "circuit breaker tripped");
                return Err(Error::internal("execution path exceeded circuit breaker limit"));
            }

            let node = graph
                .node(&current)
                .ok_or_else(|| Error::internal(format!("unknown node: {current}")))?;

            let cost_hint = node.cost_hint(state);
            if state.remaining_budget < cost_hint {
                return Err(Error::budget_exhausted(node.name()));
            }
            state.spend(cost_hint);

            let started = Instant::now();
            let outcome = tokio::time::timeout(self.node_timeout, node.execute(state)).await;
            let elapsed = started.elapsed();

            let result = match outcome {
                Ok(result) => result,
                Err(_) => {
                    state.record_step(node.name(), elapsed, false);
                    return Err(Error::timeout(self.node_timeout.as_millis() as u64));
                }
            };

            match result {
                Ok(output) => {
                    state.record_step(node.name(), elapsed, true);
                    debug!(node = node.name(), "node completed");
                    self.merge(state, node.name(), output.cost.max(cost_hint), output.clone_minus_data());
                    let NodeResult { data, next_nodes, should_stop, .. } = output;
                    if let Some(data) = data {
                        state.merge_result(node.name(), data);
                    }
                    if should_stop || next_nodes.is_empty() {
                        return Ok(());
                    }
                    current = next_nodes[0].clone();
                }
                Err(err) => {
                    state.record_step(node.name(), elapsed, false);
                    if let Some(next) = graph.next_by_edge(&current, state) {
                        state.record_error(format!("{}: {err}", node.name()));
                        current = next;
                    } else {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Apply every non-`data` side effect a node reported.
    fn merge(&self, state: &mut GraphState, node_name: &str, cost: f64, rest: NodeResultWithoutData) {
        state.record_cost(node_name, cost);
        if let Some(confidence) = rest.confidence {
            state.update_confidence(confidence);
        }
        if let Some(task_type) = rest.task_type {
            state.task_type = Some(task_type);
        }
        if let Some(model) = rest.model_used {
            state.record_model_used(model);
        }
        if let Some(response) = rest.final_response {
            state.final_response = Some(response);
        }
        if !rest.citations.is_empty() {
            state.add_citations(rest.citations);
        }
        if !rest.sources_consulted.is_empty() {
            state.add_sources(rest.sources_consulted);
        }
        for warning in rest.warnings {
            state.record_warning(warning);
        }
        for error in rest.node_errors {
            state.record_error(error);
        }
        if rest.escalated {
            state.bump_escalation();
        }
    }
}

/// Everything in `NodeResult` except `data`, used internally so
/// `GraphExecutor::merge` can apply side effects without taking ownership
/// of the payload twice.
struct NodeResultWithoutData {
    confidence: Option<f64>,
    task_type: Option<TaskType>,
    model_used: Option<String>,
    final_response: Option<String>,
    citations: Vec<Citation>,
    sources_consulted: Vec<String>,
    warnings: Vec<String>,
    node_errors: Vec<String>,
    escalated: bool,
}

impl NodeResult {
    fn clone_minus_data(&self) -> NodeResultWithoutData {
        NodeResultWithoutData {
            confidence: self.confidence,
            task_type: self.task_type,
            model_used: self.model_used.clone(),
            final_response: self.final_response.clone(),
            citations: self.citations.clone(),
            sources_consulted: self.sources_consulted.clone(),
            warnings: self.warnings.clone(),
            node_errors: self.node_errors.clone(),
            escalated: self.escalated,
        }
    }
}
