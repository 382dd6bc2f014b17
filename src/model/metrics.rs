//! Rolling per-model performance metrics (part of C3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exponential moving average smoothing factor applied to `avg_confidence`
/// once a model has accumulated enough observations to trust the average.
const EMA_ALPHA: f64 = 0.1;
/// Observation count below which a model is still "warming up" and a
/// selection exploration bonus applies.
pub const WARMUP_OBSERVATIONS: u64 = 5;

/// Rolling performance stats for one model, updated after every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPerformanceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub total_execution_time: std::time::Duration,
    pub total_cost: f64,
    pub avg_confidence: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for ModelPerformanceMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            total_execution_time: std::time::Duration::default(),
            total_cost: 0.0,
            avg_confidence: 0.0,
            last_updated: Utc::now(),
        }
    }
}

impl ModelPerformanceMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    pub fn avg_response_time(&self) -> std::time::Duration {
        if self.total_requests == 0 {
            std::time::Duration::default()
        } else {
            self.total_execution_time / self.total_requests as u32
        }
    }

    pub fn cost_per_request(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_cost / self.total_requests as f64
        }
    }

    /// A single scalar quality signal blending success rate and confidence,
    /// used by the quality-first selection strategy.
    pub fn quality_score(&self) -> f64 {
        0.5 * self.success_rate() + 0.5 * self.avg_confidence
    }

    /// Record a successful call: accumulate duration/cost and fold
    /// confidence into the running EMA (or seed it on the first call).
    pub fn record_success(&mut self, duration: std::time::Duration, cost: f64, confidence: f64) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.total_execution_time += duration;
        self.total_cost += cost;

        self.avg_confidence = if self.total_requests <= WARMUP_OBSERVATIONS {
            // Seed with a plain running average until warmed up, then
            // switch to EMA so recent behavior dominates.
            let n = self.total_requests as f64;
            self.avg_confidence + (confidence - self.avg_confidence) / n
        } else {
            EMA_ALPHA * confidence + (1.0 - EMA_ALPHA) * self.avg_confidence
        };
        self.last_updated = Utc::now();
    }

    /// Record a failed call: counted toward `total_requests` but not
    /// `successful_requests`, which moves `success_rate` down.
    pub fn record_failure(&mut self, duration: std::time::Duration) {
        self.total_requests += 1;
        self.total_execution_time += duration;
        self.last_updated = Utc::now();
    }

    pub fn observation_count(&self) -> u64 {
        self.total_requests
    }
}
