//! Static model metadata and generation result types.

use serde::{Deserialize, Serialize};

/// Model tier, cheapest/smallest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Always preloaded; small, cheap, fast.
    T0,
    /// Warm-preferred; balanced capability and cost.
    T1,
    /// On-demand only; largest, most capable, most expensive.
    T2,
}

/// Task type used for capability-oriented model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Greeting,
    Conversational,
    Code,
    Factual,
    Search,
    Synthesis,
}

/// Quality requirement attached to a request, driving both routing and
/// cost-optimizer strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityRequirement {
    Minimal,
    Balanced,
    High,
    Premium,
}

/// Static, discovered metadata for one local model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub tier: ModelTier,
    /// Approximate resident memory footprint, in bytes.
    pub memory_footprint: u64,
    pub capability_tags: Vec<TaskType>,
    /// Flat cost per request, in USD, used for budget comparisons.
    pub base_cost: f64,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, tier: ModelTier, base_cost: f64) -> Self {
        Self {
            name: name.into(),
            tier,
            memory_footprint: 0,
            capability_tags: Vec::new(),
            base_cost,
        }
    }

    pub fn with_capabilities(mut self, tags: impl IntoIterator<Item = TaskType>) -> Self {
        self.capability_tags = tags.into_iter().collect();
        self
    }

    pub fn with_memory_footprint(mut self, bytes: u64) -> Self {
        self.memory_footprint = bytes;
        self
    }

    pub fn supports(&self, task: TaskType) -> bool {
        self.capability_tags.contains(&task)
    }
}

/// Result of one `generate` call against a model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub success: bool,
    pub text: String,
    pub tokens_generated: u64,
    pub eval_count: u64,
    pub total_duration: std::time::Duration,
    pub error: Option<String>,
}

impl GenerationResult {
    pub fn ok(text: impl Into<String>, tokens_generated: u64, eval_count: u64) -> Self {
        Self {
            success: true,
            text: text.into(),
            tokens_generated,
            eval_count,
            total_duration: std::time::Duration::default(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            text: String::new(),
            tokens_generated: 0,
            eval_count: 0,
            total_duration: std::time::Duration::default(),
            error: Some(error.into()),
        }
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.total_duration = duration;
        self
    }

    /// True when the backend reported success but produced no text — a
    /// distinct failure mode from a transport error.
    pub fn is_empty_generation(&self) -> bool {
        self.success && self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_descriptor_reports_supported_tasks() {
        let descriptor = ModelDescriptor::new("fast-model", ModelTier::T0, 0.0005)
            .with_capabilities([TaskType::Greeting, TaskType::Conversational]);
        assert!(descriptor.supports(TaskType::Greeting));
        assert!(!descriptor.supports(TaskType::Code));
    }

    #[test]
    fn empty_generation_is_distinguished_from_transport_failure() {
        let empty = GenerationResult::ok("", 0, 0);
        assert!(empty.is_empty_generation());

        let failed = GenerationResult::failed("connection reset");
        assert!(!failed.is_empty_generation());
        assert!(!failed.success);
    }
}
