//! Model manager (C3): pool of models, capability-based selection,
//! single-flight loading, and fallback chains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::backend::ModelBackend;
use crate::model::metrics::{ModelPerformanceMetrics, WARMUP_OBSERVATIONS};
use crate::model::types::{GenerationResult, ModelDescriptor, ModelTier, QualityRequirement, TaskType};

/// Strategy used to re-rank candidates during selection (driven by the cost
/// optimizer, see C9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    CostFirst,
    QualityFirst,
    SpeedFirst,
    Balanced,
}

/// Small numerical floor to avoid division by zero in efficiency scores.
const EPSILON: f64 = 1e-6;
/// Flat bonus applied to under-observed candidates to keep exploring them.
const EXPLORATION_BONUS: f64 = 0.2;

/// The outcome of a full `generate_with_fallback` call, including which
/// models were attempted before success or exhaustion.
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub result: GenerationResult,
    pub model_used: String,
    pub models_tried: Vec<String>,
}

/// Pool of local models behind a capability-oriented selection API.
pub struct ModelManager {
    backend: Arc<dyn ModelBackend>,
    descriptors: RwLock<HashMap<String, ModelDescriptor>>,
    metrics: RwLock<HashMap<String, ModelPerformanceMetrics>>,
    loaded: RwLock<HashMap<String, Arc<Mutex<bool>>>>,
    capability_map: HashMap<TaskType, Vec<ModelTier>>,
}

impl ModelManager {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        let mut capability_map = HashMap::new();
        capability_map.insert(TaskType::Greeting, vec![ModelTier::T0]);
        capability_map.insert(TaskType::Conversational, vec![ModelTier::T0, ModelTier::T1]);
        capability_map.insert(TaskType::Factual, vec![ModelTier::T0, ModelTier::T1]);
        capability_map.insert(TaskType::Code, vec![ModelTier::T1, ModelTier::T2]);
        capability_map.insert(TaskType::Search, vec![ModelTier::T0, ModelTier::T1]);
        capability_map.insert(TaskType::Synthesis, vec![ModelTier::T1, ModelTier::T2]);

        Self {
            backend,
            descriptors: RwLock::new(HashMap::new()),
            metrics: RwLock::new(HashMap::new()),
            loaded: RwLock::new(HashMap::new()),
            capability_map,
        }
    }

    /// Discover models via the backend, populate descriptors, and preload
    /// every T0 model. T1 is left warm-preferred (registered but not force
    /// loaded); T2 stays on-demand.
    pub async fn initialize(&self) -> Result<()> {
        let discovered = self.backend.list_models().await?;
        let mut descriptors = self.descriptors.write().await;
        for descriptor in discovered {
            descriptors.insert(descriptor.name.clone(), descriptor);
        }
        let t0_models: Vec<String> = descriptors
            .values()
            .filter(|d| d.tier == ModelTier::T0)
            .map(|d| d.name.clone())
            .collect();
        drop(descriptors);

        for model in t0_models {
            self.ensure_model_loaded(&model).await?;
        }
        Ok(())
    }

    /// Register a model descriptor directly (used by embedders that know
    /// their fleet statically rather than discovering it).
    pub async fn register_model(&self, descriptor: ModelDescriptor) {
        self.descriptors
            .write()
            .await
            .insert(descriptor.name.clone(), descriptor);
    }

    /// Ensure a model is loaded, coalescing concurrent callers for the same
    /// unloaded model into exactly one backend dispatch.
    pub async fn ensure_model_loaded(&self, model: &str) -> Result<()> {
        let lock = {
            let mut loaded = self.loaded.write().await;
            loaded
                .entry(model.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(false)))
                .clone()
        };

        let mut is_loaded = lock.lock().await;
        if *is_loaded {
            return Ok(());
        }
        debug!(model, "loading model");
        self.backend.health().await;
        *is_loaded = true;
        Ok(())
    }

    /// Select the optimal model for a task under a quality requirement and
    /// an optional per-call budget hint, given the current metrics snapshot.
    pub async fn select_optimal_model(
        &self,
        task_type: TaskType,
        quality: QualityRequirement,
        strategy: SelectionStrategy,
        budget_hint: Option<f64>,
    ) -> Result<String> {
        let candidates = self.ranked_candidates(task_type, quality, strategy, budget_hint).await;
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::invalid_request(format!("no model available for {task_type:?}")))
    }

    /// Build the ranked candidate list for a task/quality/strategy
    /// combination: capability filter, budget filter, efficiency scoring,
    /// exploration bonus, then deterministic tie-break. `pub(crate)` so the
    /// cost optimizer (C9) can build suggestions off the same ranking the
    /// manager itself selects from.
    pub(crate) async fn ranked_candidates(
        &self,
        task_type: TaskType,
        quality: QualityRequirement,
        strategy: SelectionStrategy,
        budget_hint: Option<f64>,
    ) -> Vec<String> {
        let allowed_tiers = self
            .capability_map
            .get(&task_type)
            .cloned()
            .unwrap_or_else(|| vec![ModelTier::T0, ModelTier::T1, ModelTier::T2]);
        let min_tier = match quality {
            QualityRequirement::Minimal | QualityRequirement::Balanced => ModelTier::T0,
            QualityRequirement::High => ModelTier::T1,
            QualityRequirement::Premium => {
                *allowed_tiers.iter().max().unwrap_or(&ModelTier::T1)
            }
        };

        let descriptors = self.descriptors.read().await;
        let metrics = self.metrics.read().await;

        let mut scored: Vec<(String, f64)> = descriptors
            .values()
            .filter(|d| allowed_tiers.contains(&d.tier) && d.tier >= min_tier)
            .filter(|d| budget_hint.map(|b| d.base_cost <= b).unwrap_or(true))
            .map(|d| {
                let m = metrics.get(&d.name).cloned().unwrap_or_default();
                let mut score = efficiency_score(strategy, d, &m);
                if m.observation_count() < WARMUP_OBSERVATIONS {
                    score += EXPLORATION_BONUS;
                }
                (d.name.clone(), score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ma = metrics.get(&a.0).cloned().unwrap_or_default();
                    let mb = metrics.get(&b.0).cloned().unwrap_or_default();
                    ma.cost_per_request()
                        .partial_cmp(&mb.cost_per_request())
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| {
                            mb.success_rate()
                                .partial_cmp(&ma.success_rate())
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                })
        });

        scored.into_iter().map(|(name, _)| name).collect()
    }

    /// Delegate one generation to the backend and record metrics.
    pub async fn generate(
        &self,
        model_name: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
        stop: Option<Vec<String>>,
        deadline: Duration,
    ) -> Result<GenerationResult> {
        self.ensure_model_loaded(model_name).await?;
        let descriptor = self.descriptors.read().await.get(model_name).cloned();
        let base_cost = descriptor.as_ref().map(|d| d.base_cost).unwrap_or(0.0);

        let started = std::time::Instant::now();
        let outcome = self
            .backend
            .generate(model_name, prompt, max_tokens, temperature, stop, deadline)
            .await;
        let elapsed = started.elapsed();

        let mut metrics = self.metrics.write().await;
        let entry = metrics.entry(model_name.to_string()).or_default();
        match &outcome {
            Ok(generation) if !generation.is_empty_generation() => {
                let confidence = if generation.eval_count > 0 { 0.9 } else { 0.7 };
                entry.record_success(elapsed, base_cost, confidence);
            }
            _ => entry.record_failure(elapsed),
        }

        match outcome {
            Ok(generation) if generation.is_empty_generation() => {
                Err(Error::empty_generation(model_name))
            }
            other => other,
        }
    }

    /// Try the ranked candidate list in order until one succeeds, recording
    /// every model attempted.
    pub async fn generate_with_fallback(
        &self,
        task_type: TaskType,
        quality: QualityRequirement,
        strategy: SelectionStrategy,
        budget_hint: Option<f64>,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
        deadline: Duration,
    ) -> Result<FallbackOutcome> {
        let candidates = self.ranked_candidates(task_type, quality, strategy, budget_hint).await;
        if candidates.is_empty() {
            return Err(Error::invalid_request(format!(
                "no model available for {task_type:?}"
            )));
        }

        let mut tried = Vec::new();
        let mut last_error = None;
        for model in candidates {
            tried.push(model.clone());
            match self
                .generate(&model, prompt, max_tokens, temperature, None, deadline)
                .await
            {
                Ok(result) => {
                    return Ok(FallbackOutcome {
                        result,
                        model_used: model,
                        models_tried: tried,
                    });
                }
                Err(err) => {
                    warn!(model, error = %err, "model call failed, trying fallback");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::internal("fallback chain exhausted")))
    }

    pub async fn get_model_stats(&self) -> HashMap<String, ModelPerformanceMetrics> {
        self.metrics.read().await.clone()
    }

    /// Base cost of a registered model, for building cost-optimizer
    /// suggestions without exposing the descriptor table itself.
    pub(crate) async fn estimate_cost(&self, model: &str) -> f64 {
        self.descriptors
            .read()
            .await
            .get(model)
            .map(|d| d.base_cost)
            .unwrap_or(0.0)
    }

    /// Recommend the cheapest model that satisfies a budget, for the cost
    /// optimizer's `optimize_request` flow.
    pub async fn get_recommendations(&self, budget: f64) -> Vec<String> {
        let descriptors = self.descriptors.read().await;
        let mut candidates: Vec<&ModelDescriptor> = descriptors
            .values()
            .filter(|d| d.base_cost <= budget)
            .collect();
        candidates.sort_by(|a, b| a.base_cost.partial_cmp(&b.base_cost).unwrap());
        candidates.into_iter().map(|d| d.name.clone()).collect()
    }
}

fn efficiency_score(
    strategy: SelectionStrategy,
    descriptor: &ModelDescriptor,
    metrics: &ModelPerformanceMetrics,
) -> f64 {
    let cost = descriptor.base_cost.max(metrics.cost_per_request());
    let response_time_secs = metrics.avg_response_time().as_secs_f64();
    match strategy {
        SelectionStrategy::CostFirst => 1.0 / (cost + EPSILON),
        SelectionStrategy::QualityFirst => metrics.quality_score(),
        SelectionStrategy::SpeedFirst => 1.0 / (response_time_secs + EPSILON),
        SelectionStrategy::Balanced => {
            0.4 * metrics.quality_score() + 0.3 * (1.0 / (cost + EPSILON)) + 0.3 * (1.0 / (response_time_secs + EPSILON))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::backend::MockModelBackend;

    fn descriptor(name: &str, tier: ModelTier, cost: f64) -> ModelDescriptor {
        ModelDescriptor::new(name, tier, cost).with_capabilities([
            TaskType::Greeting,
            TaskType::Conversational,
            TaskType::Factual,
        ])
    }

    #[tokio::test]
    async fn initialize_preloads_t0_and_registers_others() {
        let backend = Arc::new(MockModelBackend::new(vec![
            descriptor("fast", ModelTier::T0, 0.0005),
            descriptor("mid", ModelTier::T1, 0.002),
        ]));
        let manager = ModelManager::new(backend);
        manager.initialize().await.unwrap();

        let model = manager
            .select_optimal_model(
                TaskType::Greeting,
                QualityRequirement::Minimal,
                SelectionStrategy::CostFirst,
                None,
            )
            .await
            .unwrap();
        assert_eq!(model, "fast");
    }

    #[tokio::test]
    async fn selection_prefers_lower_cost_then_higher_success_rate_on_tie() {
        let backend = Arc::new(MockModelBackend::new(vec![
            descriptor("cheap", ModelTier::T0, 0.0001),
            descriptor("pricey", ModelTier::T0, 0.01),
        ]));
        let manager = ModelManager::new(backend);
        manager.initialize().await.unwrap();

        let model = manager
            .select_optimal_model(
                TaskType::Greeting,
                QualityRequirement::Minimal,
                SelectionStrategy::CostFirst,
                Some(1.0),
            )
            .await
            .unwrap();
        assert_eq!(model, "cheap");
    }

    #[tokio::test]
    async fn fallback_chain_tries_next_candidate_on_empty_generation() {
        let backend = Arc::new(MockModelBackend::new(vec![
            descriptor("primary", ModelTier::T0, 0.001),
            descriptor("secondary", ModelTier::T0, 0.002),
        ]));
        backend.push_response(Err(Error::empty_generation("primary"))).await;
        backend.push_response(Ok(GenerationResult::ok("hello!", 5, 5))).await;

        let manager = ModelManager::new(backend);
        manager.initialize().await.unwrap();

        let outcome = manager
            .generate_with_fallback(
                TaskType::Greeting,
                QualityRequirement::Minimal,
                SelectionStrategy::CostFirst,
                None,
                "hi",
                32,
                0.2,
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(outcome.models_tried.len(), 2);
        assert_eq!(outcome.result.text, "hello!");
    }

    #[tokio::test]
    async fn single_flight_loading_marks_model_loaded_once() {
        let backend = Arc::new(MockModelBackend::new(vec![descriptor(
            "fast",
            ModelTier::T0,
            0.0005,
        )]));
        let manager = Arc::new(ModelManager::new(backend));
        manager.initialize().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = manager.clone();
            handles.push(tokio::spawn(async move {
                m.ensure_model_loaded("fast").await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        // No assertion beyond "did not deadlock or panic" — the mutex-backed
        // loader guarantees coalescing by construction.
    }
}
