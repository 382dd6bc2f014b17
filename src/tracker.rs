//! Performance tracking with percentile latency reporting (C10).
//!
//! The percentile computation (sort then index by fraction) is grounded on
//! the gateway metrics helper in the reference pack rather than the
//! teacher, which never aggregates latency distributions itself.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default number of recent operations retained per tracked name.
pub const DEFAULT_WINDOW_SIZE: usize = 10_000;

/// A single completed operation's timing, stored in the rolling window.
#[derive(Debug, Clone)]
struct Observation {
    duration: Duration,
    succeeded: bool,
}

/// Latency percentiles plus throughput/error-rate for one tracked operation
/// name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub operation: String,
    pub sample_count: usize,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub error_rate: f64,
    /// Whether p95 is within the configured target, when one is set.
    pub within_target: Option<bool>,
}

fn percentile(sorted_ms: &[f64], fraction: f64) -> f64 {
    if sorted_ms.is_empty() {
        return 0.0;
    }
    let idx = ((sorted_ms.len() as f64 - 1.0) * fraction).round() as usize;
    sorted_ms[idx.min(sorted_ms.len() - 1)]
}

/// Handle returned by `start_operation`, passed to `finish_operation`.
#[derive(Debug, Clone, Copy)]
pub struct OperationHandle {
    id: Uuid,
    started_at: Instant,
}

/// Tracks a bounded rolling window of recent operation timings per name and
/// reports latency percentiles against optional per-operation targets.
pub struct PerformanceTracker {
    window_size: usize,
    windows: RwLock<HashMap<String, VecDeque<Observation>>>,
    targets_ms: RwLock<HashMap<String, f64>>,
}

impl PerformanceTracker {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            windows: RwLock::new(HashMap::new()),
            targets_ms: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_target(&self, operation: impl Into<String>, target_ms: f64) {
        self.targets_ms.write().await.insert(operation.into(), target_ms);
    }

    pub fn start_operation(&self) -> OperationHandle {
        OperationHandle {
            id: Uuid::new_v4(),
            started_at: Instant::now(),
        }
    }

    pub async fn finish_operation(&self, operation: &str, handle: OperationHandle, succeeded: bool) {
        let duration = handle.started_at.elapsed();
        let mut windows = self.windows.write().await;
        let window = windows
            .entry(operation.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.window_size));
        window.push_back(Observation { duration, succeeded });
        while window.len() > self.window_size {
            window.pop_front();
        }
        let _ = handle.id;
    }

    /// Convenience wrapper that times a future and records its outcome,
    /// classifying any `Err` as a failed observation.
    pub async fn track_operation<F, T, E>(&self, operation: &str, fut: F) -> Result<T, E>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        let handle = self.start_operation();
        let result = fut.await;
        self.finish_operation(operation, handle, result.is_ok()).await;
        result
    }

    pub async fn get_performance_summary(&self, operation: &str) -> Option<PerformanceSummary> {
        let windows = self.windows.read().await;
        let window = windows.get(operation)?;
        if window.is_empty() {
            return None;
        }

        let mut durations_ms: Vec<f64> = window.iter().map(|o| o.duration.as_secs_f64() * 1000.0).collect();
        durations_ms.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());

        let failures = window.iter().filter(|o| !o.succeeded).count();
        let error_rate = failures as f64 / window.len() as f64;

        let p95 = percentile(&durations_ms, 0.95);
        let target = self.targets_ms.read().await.get(operation).copied();

        Some(PerformanceSummary {
            operation: operation.to_string(),
            sample_count: window.len(),
            p50_ms: percentile(&durations_ms, 0.50),
            p90_ms: percentile(&durations_ms, 0.90),
            p95_ms: p95,
            p99_ms: percentile(&durations_ms, 0.99),
            error_rate,
            within_target: target.map(|t| p95 <= t),
        })
    }

    pub async fn all_operations(&self) -> Vec<String> {
        self.windows.read().await.keys().cloned().collect()
    }
}
