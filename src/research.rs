//! Research entry point.
//!
//! Deep-dive research requests don't get a separate graph: they seed a
//! `GraphState` for the search graph with a larger budget and a query
//! rewritten to request depth, so the same deterministic routing in
//! `search::SmartRouterNode` naturally selects `SearchAndEnhance`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::graph::state::GraphState;
use crate::model::QualityRequirement;

/// The angle a research request takes on its topic, shaping both the query
/// rewrite handed to the search graph and (via `depth_level`) the quality
/// bar and enhancement depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchMethodology {
    /// Broad, open-ended survey of the topic.
    Exploratory,
    /// Weighs named alternatives against each other.
    Comparative,
    /// Exhaustive sweep intended to surface every major source.
    SystematicReview,
}

impl ResearchMethodology {
    fn query_verb(self) -> &'static str {
        match self {
            ResearchMethodology::Exploratory => "exploratory overview of",
            ResearchMethodology::Comparative => "comparative analysis of",
            ResearchMethodology::SystematicReview => "systematic review of",
        }
    }
}

/// How deep the research pass should go, driving the budget multiplier,
/// quality requirement, and scrape count the distilled request is translated
/// into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthLevel {
    Overview,
    Standard,
    Deep,
}

impl DepthLevel {
    /// `(budget multiplier, quality requirement, max scrape count)`.
    fn profile(self) -> (f64, QualityRequirement, usize) {
        match self {
            DepthLevel::Overview => (1.5, QualityRequirement::Balanced, 1),
            DepthLevel::Standard => (3.0, QualityRequirement::High, 3),
            DepthLevel::Deep => (6.0, QualityRequirement::Premium, 5),
        }
    }
}

/// A request for in-depth research on a topic, translated into a seeded
/// `GraphState` for the search graph rather than requiring its own graph.
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub topic: String,
    pub methodology: ResearchMethodology,
    pub depth_level: DepthLevel,
    /// Wall-clock budget for the whole research pass.
    pub time_budget: Duration,
    /// Dollar budget before the depth-level multiplier is applied.
    pub cost_budget: f64,
    /// Specific sources the caller wants considered, if any; folded into the
    /// query as a hint rather than a hard filter, since the search provider
    /// has no notion of a source allow-list.
    pub sources: Vec<String>,
}

impl ResearchRequest {
    pub fn new(topic: impl Into<String>, cost_budget: f64) -> Self {
        Self {
            topic: topic.into(),
            methodology: ResearchMethodology::Exploratory,
            depth_level: DepthLevel::Standard,
            time_budget: Duration::from_secs(120),
            cost_budget,
            sources: Vec::new(),
        }
    }

    pub fn with_methodology(mut self, methodology: ResearchMethodology) -> Self {
        self.methodology = methodology;
        self
    }

    pub fn with_depth_level(mut self, depth_level: DepthLevel) -> Self {
        self.depth_level = depth_level;
        self
    }

    pub fn with_time_budget(mut self, time_budget: Duration) -> Self {
        self.time_budget = time_budget;
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    /// Build the seeded `GraphState` the search graph should run with:
    /// query rewritten from `methodology` and `sources`, budget scaled by
    /// `depth_level`'s multiplier, quality and scrape depth set from the
    /// same depth level.
    pub fn into_graph_state(self) -> GraphState {
        let (multiplier, quality, max_enhance) = self.depth_level.profile();

        let mut query = format!("{} {}", self.methodology.query_verb(), self.topic);
        if !self.sources.is_empty() {
            query.push_str(&format!(" (consider sources: {})", self.sources.join(", ")));
        }

        GraphState::new(query, self.cost_budget * multiplier)
            .with_quality_requirement(quality)
            .with_max_execution_time(self.time_budget)
            .with_max_enhance(max_enhance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exploratory_overview_gets_the_smallest_multiplier_and_quality_bar() {
        let request = ResearchRequest::new("rust async runtimes", 0.01)
            .with_methodology(ResearchMethodology::Exploratory)
            .with_depth_level(DepthLevel::Overview);
        let state = request.into_graph_state();

        assert!(state.processed_query.contains("exploratory overview of"));
        assert!(state.processed_query.contains("rust async runtimes"));
        assert_eq!(state.remaining_budget, 0.015);
        assert_eq!(state.quality_requirement, QualityRequirement::Balanced);
        assert_eq!(state.max_enhance, 1);
    }

    #[test]
    fn deep_systematic_review_maximizes_budget_quality_and_enhancement() {
        let request = ResearchRequest::new("vector database tradeoffs", 0.02)
            .with_methodology(ResearchMethodology::SystematicReview)
            .with_depth_level(DepthLevel::Deep)
            .with_sources(vec!["arxiv.org".to_string()]);
        let state = request.into_graph_state();

        assert!(state.processed_query.contains("systematic review of"));
        assert!(state.processed_query.contains("arxiv.org"));
        assert_eq!(state.remaining_budget, 0.12);
        assert_eq!(state.quality_requirement, QualityRequirement::Premium);
        assert_eq!(state.max_enhance, 5);
    }

    #[test]
    fn default_request_uses_standard_depth() {
        let request = ResearchRequest::new("topic", 0.01);
        let state = request.into_graph_state();
        assert_eq!(state.remaining_budget, 0.03);
        assert_eq!(state.quality_requirement, QualityRequirement::High);
        assert_eq!(state.max_enhance, 3);
    }
}
