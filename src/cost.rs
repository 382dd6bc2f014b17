//! Cost optimizer and per-user budget tracking (C9).

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::{OptimizerConfig, TierLimits};
use crate::error::Result;
use crate::model::manager::ModelManager;
use crate::model::{QualityRequirement, SelectionStrategy, TaskType};

/// Subscription tier, determining monthly/daily budget ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTier {
    Free,
    Pro,
    Enterprise,
}

/// Fraction of the remaining daily budget below which the optimizer forces
/// cost-first model selection regardless of the requested quality.
const DAILY_COST_PRESSURE_THRESHOLD: f64 = 0.2;
/// A single request is never allowed to claim more than this fraction of the
/// remaining daily budget, so one expensive call can't exhaust the day.
const MAX_SINGLE_REQUEST_FRACTION: f64 = 0.25;
/// Fraction of recent requests hitting budget exhaustion above which a tier
/// upgrade is recommended.
const UPGRADE_RECOMMENDATION_EXHAUSTION_RATE: f64 = 0.3;

/// Per-user rolling spend against monthly and daily limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostBudget {
    pub tier: UserTier,
    pub monthly_limit: f64,
    pub daily_limit: f64,
    pub monthly_spent: f64,
    pub daily_spent: f64,
    pub month_start: DateTime<Utc>,
    pub day_start: DateTime<Utc>,
    pub exhaustion_events: u64,
    pub total_requests: u64,
}

impl CostBudget {
    pub fn new(tier: UserTier, limits: TierLimits) -> Self {
        let now = Utc::now();
        Self {
            tier,
            monthly_limit: limits.monthly,
            daily_limit: limits.daily,
            monthly_spent: 0.0,
            daily_spent: 0.0,
            month_start: now,
            day_start: now,
            exhaustion_events: 0,
            total_requests: 0,
        }
    }

    fn roll_periods(&mut self) {
        let now = Utc::now();
        if now.date_naive() != self.day_start.date_naive() {
            self.daily_spent = 0.0;
            self.day_start = now;
        }
        if now.month() != self.month_start.month() || now.year() != self.month_start.year() {
            self.monthly_spent = 0.0;
            self.month_start = now;
        }
    }

    pub fn remaining_daily(&self) -> f64 {
        (self.daily_limit - self.daily_spent).max(0.0)
    }

    pub fn remaining_monthly(&self) -> f64 {
        (self.monthly_limit - self.monthly_spent).max(0.0)
    }

    pub fn remaining(&self) -> f64 {
        self.remaining_daily().min(self.remaining_monthly())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() <= 0.0
    }

    fn record_spend(&mut self, amount: f64) {
        self.roll_periods();
        self.daily_spent += amount;
        self.monthly_spent += amount;
        self.total_requests += 1;
    }

    fn record_exhaustion(&mut self) {
        self.roll_periods();
        self.exhaustion_events += 1;
        self.total_requests += 1;
    }

    pub fn exhaustion_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.exhaustion_events as f64 / self.total_requests as f64
        }
    }
}

/// One model the optimizer considers worth routing this request to, with the
/// reasoning a caller (or a log line) can surface to the user.
#[derive(Debug, Clone)]
pub struct ModelSuggestion {
    pub model: String,
    pub estimated_cost: f64,
    pub reasoning: String,
}

/// The optimizer's full verdict on a request: whether it's allowed to
/// proceed at all, the strategy and per-request spend cap to use if so, and
/// the model manager's top candidates under that strategy.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub strategy: SelectionStrategy,
    pub budget_hint: f64,
    pub suggestions: Vec<ModelSuggestion>,
}

/// Tracks per-user budgets and picks a model-selection strategy under cost
/// pressure.
pub struct CostOptimizer {
    config: OptimizerConfig,
    budgets: RwLock<HashMap<String, CostBudget>>,
}

impl CostOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            budgets: RwLock::new(HashMap::new()),
        }
    }

    fn limits_for(&self, tier: UserTier) -> TierLimits {
        match tier {
            UserTier::Free => self.config.free_tier,
            UserTier::Pro => self.config.pro_tier,
            UserTier::Enterprise => self.config.enterprise_tier,
        }
    }

    /// Five-step strategy selection: (1) load or create the user's budget,
    /// (2) refuse (without erroring) if already exhausted, (3) pick a
    /// strategy from remaining budget and the requested quality, (4) cap the
    /// per-request spend, (5) ask the model manager (C3) for the top
    /// candidates under that strategy and budget so the caller gets a
    /// concrete `(model, estimated_cost, reasoning)` short list rather than
    /// just a strategy name.
    pub async fn optimize_request(
        &self,
        user_id: &str,
        tier: UserTier,
        task_type: TaskType,
        quality: QualityRequirement,
        manager: &ModelManager,
    ) -> Result<Decision> {
        let mut budgets = self.budgets.write().await;
        let budget = budgets
            .entry(user_id.to_string())
            .or_insert_with(|| CostBudget::new(tier, self.limits_for(tier)));
        budget.roll_periods();

        if budget.is_exhausted() {
            budget.record_exhaustion();
            return Ok(Decision {
                allowed: false,
                strategy: SelectionStrategy::CostFirst,
                budget_hint: 0.0,
                suggestions: Vec::new(),
            });
        }

        let cost_pressure = budget.remaining_daily() < budget.daily_limit * DAILY_COST_PRESSURE_THRESHOLD;
        let strategy = if cost_pressure {
            SelectionStrategy::CostFirst
        } else {
            match quality {
                QualityRequirement::Premium => SelectionStrategy::QualityFirst,
                QualityRequirement::High => SelectionStrategy::QualityFirst,
                QualityRequirement::Minimal => {
                    if task_type == TaskType::Greeting {
                        SelectionStrategy::SpeedFirst
                    } else {
                        SelectionStrategy::Balanced
                    }
                }
                QualityRequirement::Balanced => SelectionStrategy::Balanced,
            }
        };

        let budget_hint = budget.remaining_daily() * MAX_SINGLE_REQUEST_FRACTION;
        drop(budgets);

        let candidates = manager
            .ranked_candidates(task_type, quality, strategy, Some(budget_hint))
            .await;
        let mut suggestions = Vec::new();
        for (rank, model) in candidates.into_iter().take(3).enumerate() {
            let estimated_cost = manager.estimate_cost(&model).await;
            suggestions.push(ModelSuggestion {
                reasoning: format!(
                    "ranked #{} under {strategy:?} for {task_type:?} at {quality:?} quality",
                    rank + 1
                ),
                model,
                estimated_cost,
            });
        }

        Ok(Decision {
            allowed: true,
            strategy,
            budget_hint,
            suggestions,
        })
    }

    pub async fn record_execution_cost(&self, user_id: &str, tier: UserTier, cost: f64) {
        let mut budgets = self.budgets.write().await;
        let budget = budgets
            .entry(user_id.to_string())
            .or_insert_with(|| CostBudget::new(tier, self.limits_for(tier)));
        budget.record_spend(cost);
    }

    pub async fn get_budget(&self, user_id: &str) -> Option<CostBudget> {
        self.budgets.read().await.get(user_id).cloned()
    }

    /// Recommend a tier upgrade once a user's exhaustion rate crosses the
    /// threshold — a consistent signal their usage has outgrown the tier
    /// rather than a single unlucky day.
    pub async fn recommend_tier_upgrade(&self, user_id: &str) -> bool {
        self.budgets
            .read()
            .await
            .get(user_id)
            .map(|b| b.total_requests >= 10 && b.exhaustion_rate() > UPGRADE_RECOMMENDATION_EXHAUSTION_RATE)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::backend::MockModelBackend;
    use crate::model::{ModelDescriptor, ModelTier};
    use std::sync::Arc;

    fn test_config() -> OptimizerConfig {
        OptimizerConfig::default()
    }

    async fn test_manager() -> ModelManager {
        let backend = Arc::new(MockModelBackend::new(vec![
            ModelDescriptor::new("fast", ModelTier::T0, 0.0005).with_capabilities([
                TaskType::Greeting,
                TaskType::Factual,
                TaskType::Synthesis,
            ]),
            ModelDescriptor::new("mid", ModelTier::T1, 0.002).with_capabilities([
                TaskType::Greeting,
                TaskType::Factual,
                TaskType::Synthesis,
            ]),
        ]));
        let manager = ModelManager::new(backend);
        manager.initialize().await.unwrap();
        manager
    }

    #[tokio::test]
    async fn exhausted_budget_rejects_further_requests() {
        let optimizer = CostOptimizer::new(test_config());
        let manager = test_manager().await;
        optimizer
            .record_execution_cost("u1", UserTier::Free, 20.0)
            .await;

        let decision = optimizer
            .optimize_request(
                "u1",
                UserTier::Free,
                TaskType::Factual,
                QualityRequirement::Balanced,
                &manager,
            )
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert!(decision.suggestions.is_empty());
    }

    #[tokio::test]
    async fn cost_pressure_forces_cost_first_even_for_premium_quality() {
        let optimizer = CostOptimizer::new(test_config());
        let manager = test_manager().await;
        // Free tier: daily limit 5.0; spend down to below the 20% floor.
        optimizer
            .record_execution_cost("u1", UserTier::Free, 4.2)
            .await;

        let decision = optimizer
            .optimize_request(
                "u1",
                UserTier::Free,
                TaskType::Synthesis,
                QualityRequirement::Premium,
                &manager,
            )
            .await
            .unwrap();
        assert!(decision.allowed);
        assert!(matches!(decision.strategy, SelectionStrategy::CostFirst));
    }

    #[tokio::test]
    async fn premium_quality_without_cost_pressure_prefers_quality_first_and_suggests_models() {
        let optimizer = CostOptimizer::new(test_config());
        let manager = test_manager().await;
        let decision = optimizer
            .optimize_request(
                "u1",
                UserTier::Pro,
                TaskType::Synthesis,
                QualityRequirement::Premium,
                &manager,
            )
            .await
            .unwrap();
        assert!(matches!(decision.strategy, SelectionStrategy::QualityFirst));
        assert!(!decision.suggestions.is_empty());
        assert!(decision.suggestions.iter().all(|s| !s.reasoning.is_empty()));
    }

    #[tokio::test]
    async fn budget_hint_never_exceeds_the_per_request_fraction() {
        let optimizer = CostOptimizer::new(test_config());
        let manager = test_manager().await;
        let decision = optimizer
            .optimize_request(
                "u1",
                UserTier::Pro,
                TaskType::Greeting,
                QualityRequirement::Minimal,
                &manager,
            )
            .await
            .unwrap();
        assert!(decision.budget_hint <= optimizer.limits_for(UserTier::Pro).daily * MAX_SINGLE_REQUEST_FRACTION + 1e-9);
    }

    #[tokio::test]
    async fn repeated_exhaustion_triggers_an_upgrade_recommendation() {
        let optimizer = CostOptimizer::new(test_config());
        let manager = test_manager().await;
        optimizer
            .record_execution_cost("u1", UserTier::Free, 20.0)
            .await;
        for _ in 0..15 {
            let _ = optimizer
                .optimize_request(
                    "u1",
                    UserTier::Free,
                    TaskType::Factual,
                    QualityRequirement::Balanced,
                    &manager,
                )
                .await;
        }
        assert!(optimizer.recommend_tier_upgrade("u1").await);
    }
}
