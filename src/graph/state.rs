//! Shared state threaded through a graph execution (C5).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::cost::UserTier;
use crate::model::{QualityRequirement, TaskType};

/// Default cap on how many search hits a content-enhancement pass scrapes,
/// absent a request-specific override (e.g. from a research request's
/// depth level).
const DEFAULT_MAX_ENHANCE: usize = 3;

/// One entry in the append-only execution path, recorded every time a node
/// finishes running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub node: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub succeeded: bool,
}

/// One source backing a synthesized response, derived from a search hit or
/// an enhanced (scraped) page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Rough 0-1 estimate of how demanding a query is to answer well, from
/// surface signals alone (length, clause count, stacked questions) — the
/// same kind of cheap lexical heuristic the teacher uses for task
/// classification rather than a model call.
fn estimate_complexity(query: &str) -> f64 {
    let word_count = query.split_whitespace().count() as f64;
    let clause_markers = (query.matches(',').count()
        + query.matches(';').count()
        + query.matches(" and ").count()
        + query.matches(" or ").count()) as f64;
    let question_marks = query.matches('?').count() as f64;

    let raw = (word_count / 40.0) + (clause_markers * 0.15) + (question_marks * 0.1).min(0.2);
    raw.clamp(0.0, 1.0)
}

/// Mutable state threaded through every node of a single request's graph
/// execution. Nodes never mutate this directly: a node's `execute` takes a
/// shared reference and returns a `NodeResult` describing what changed; only
/// `GraphExecutor::run` ever holds `&mut GraphState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphState {
    pub request_id: Uuid,
    /// Cross-service tracing key. Defaults to `request_id` but can be
    /// supplied by the embedder when a request already carries one in from
    /// an upstream system.
    pub correlation_id: Uuid,
    pub conversation_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub user_tier: UserTier,

    /// The query exactly as the caller supplied it; never rewritten.
    pub original_query: String,
    /// The query nodes actually operate on — may be rewritten by an entry
    /// point (e.g. `research::ResearchRequest`) before the graph runs.
    pub processed_query: String,

    pub task_type: Option<TaskType>,
    /// 0-1 estimate of query difficulty, seeded at construction time and
    /// consulted by routing nodes alongside budget and quality.
    pub complexity: f64,
    pub quality_requirement: QualityRequirement,
    /// Cap on how many search hits a content-enhancement pass scrapes,
    /// derived from the request's depth level.
    pub max_enhance: usize,
    pub max_execution_time: Duration,

    /// Named outputs produced by nodes, keyed by node name. Kept generic
    /// (`serde_json::Value`) so any node's typed payload can be stored
    /// without the graph runtime knowing concrete node types.
    pub intermediate_results: HashMap<String, Value>,

    /// Append-only record of every node that has run, in order.
    pub execution_path: Vec<ExecutionStep>,
    /// Non-fatal errors collected along the way (e.g. a provider failing
    /// during a partially-tolerant fan-out).
    pub errors: Vec<String>,
    /// Lesser non-fatal observations (degraded quality, partial coverage)
    /// that don't rise to the level of an error.
    pub warnings: Vec<String>,

    /// Remaining budget in USD; nodes that spend money deduct from this
    /// before running and the executor aborts the request once it's gone.
    pub remaining_budget: f64,
    pub total_cost: f64,
    /// Actual cost attributed to each node that ran, keyed by node name.
    pub costs_incurred: HashMap<String, f64>,

    /// Distinct models used while answering this request, in first-use
    /// order.
    pub models_used: Vec<String>,
    /// Number of times generation escalated to a higher-tier model after a
    /// lower tier failed or was judged insufficient.
    pub escalation_count: u32,
    /// Confidence in the current best answer, folded in by whichever node
    /// last produced one.
    pub confidence_score: f64,

    /// The response a terminal node judged ready to return, mirrored here
    /// so callers don't need to know which node produced it.
    pub final_response: Option<String>,
    pub sources_consulted: Vec<String>,
    pub citations: Vec<Citation>,

    #[serde(skip)]
    pub started_at: Option<Instant>,
}

impl GraphState {
    pub fn new(query: impl Into<String>, budget: f64) -> Self {
        let query = query.into();
        let complexity = estimate_complexity(&query);
        Self {
            request_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            conversation_id: None,
            session_id: None,
            user_id: None,
            user_tier: UserTier::Free,
            original_query: query.clone(),
            processed_query: query,
            task_type: None,
            complexity,
            quality_requirement: QualityRequirement::Balanced,
            max_enhance: DEFAULT_MAX_ENHANCE,
            max_execution_time: Duration::from_secs(30),
            intermediate_results: HashMap::new(),
            execution_path: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            remaining_budget: budget,
            total_cost: 0.0,
            costs_incurred: HashMap::new(),
            models_used: Vec::new(),
            escalation_count: 0,
            confidence_score: 1.0,
            final_response: None,
            sources_consulted: Vec::new(),
            citations: Vec::new(),
            started_at: Some(Instant::now()),
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_user_tier(mut self, tier: UserTier) -> Self {
        self.user_tier = tier;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_quality_requirement(mut self, quality: QualityRequirement) -> Self {
        self.quality_requirement = quality;
        self
    }

    pub fn with_max_enhance(mut self, max_enhance: usize) -> Self {
        self.max_enhance = max_enhance.max(1);
        self
    }

    pub fn with_max_execution_time(mut self, max_execution_time: Duration) -> Self {
        self.max_execution_time = max_execution_time;
        self
    }

    /// Key used to identify this user to the cost optimizer: the caller's
    /// `user_id` if one was supplied, otherwise this request's own id so
    /// anonymous callers still get a (single-request) budget record.
    pub fn cost_optimizer_key(&self) -> String {
        self.user_id.clone().unwrap_or_else(|| self.request_id.to_string())
    }

    pub fn record_step(&mut self, node: &str, duration: Duration, succeeded: bool) {
        self.execution_path.push(ExecutionStep {
            node: node.to_string(),
            started_at: Utc::now(),
            duration,
            succeeded,
        });
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn record_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Deduct a spend from the remaining budget, clamping at zero so the
    /// budget invariant (`remaining_budget >= 0`) always holds.
    pub fn spend(&mut self, amount: f64) {
        self.remaining_budget = (self.remaining_budget - amount).max(0.0);
    }

    /// Attribute an actual cost to the node that just ran, folding it into
    /// both the running total and the per-node breakdown.
    pub fn record_cost(&mut self, node: &str, amount: f64) {
        self.total_cost += amount;
        *self.costs_incurred.entry(node.to_string()).or_insert(0.0) += amount;
    }

    pub fn record_model_used(&mut self, model: impl Into<String>) {
        let model = model.into();
        if !self.models_used.contains(&model) {
            self.models_used.push(model);
        }
    }

    pub fn bump_escalation(&mut self) {
        self.escalation_count += 1;
    }

    pub fn update_confidence(&mut self, confidence: f64) {
        self.confidence_score = confidence.clamp(0.0, 1.0);
    }

    pub fn add_citations(&mut self, mut citations: Vec<Citation>) {
        self.citations.append(&mut citations);
    }

    pub fn add_sources(&mut self, sources: Vec<String>) {
        for source in sources {
            if !self.sources_consulted.contains(&source) {
                self.sources_consulted.push(source);
            }
        }
    }

    pub fn is_budget_exhausted(&self) -> bool {
        self.remaining_budget <= 0.0
    }

    pub fn merge_result(&mut self, node: &str, value: Value) {
        self.intermediate_results.insert(node.to_string(), value);
    }

    pub fn set_result<T: Serialize>(&mut self, node: &str, value: &T) {
        if let Ok(json) = serde_json::to_value(value) {
            self.intermediate_results.insert(node.to_string(), json);
        }
    }

    pub fn get_result<T: for<'de> Deserialize<'de>>(&self, node: &str) -> Option<T> {
        self.intermediate_results
            .get(node)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn path_len(&self) -> usize {
        self.execution_path.len()
    }

    pub fn path_names(&self) -> Vec<&str> {
        self.execution_path.iter().map(|s| s.node.as_str()).collect()
    }
}
