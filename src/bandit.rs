//! Adaptive Thompson-sampling router (C8).
//!
//! No example repo in this codebase's lineage draws from a Beta
//! distribution, so this module reaches past `rand` (the teacher's existing
//! dependency, used for `backoff_with_jitter`) to `rand_distr::Beta`, the
//! standard companion crate for exactly this kind of sampling.

use std::collections::HashMap;

use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::SelectionStrategy;

/// Maps a routing arm's name to the model-selection strategy it stands for,
/// so the bandit's exploration/exploitation choice drives a live request
/// instead of only being recorded. Arms outside this set (or future ones
/// loaded from persisted state) fall back to `Balanced`.
pub fn strategy_for_arm(arm: &str) -> SelectionStrategy {
    match arm {
        "fast_chat" => SelectionStrategy::SpeedFirst,
        "api_fallback" => SelectionStrategy::CostFirst,
        "hybrid_mode" => SelectionStrategy::QualityFirst,
        _ => SelectionStrategy::Balanced,
    }
}

/// One routing arm's Beta(alpha, beta) posterior over "did this arm produce
/// a good outcome". Both parameters start at 1 (a uniform prior) and never
/// drop below 1, matching a standard Beta-Bernoulli bandit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditArm {
    pub name: String,
    pub alpha: f64,
    pub beta: f64,
    pub pulls: u64,
}

impl BanditArm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alpha: 1.0,
            beta: 1.0,
            pulls: 0,
        }
    }

    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    fn sample(&self) -> f64 {
        match Beta::new(self.alpha, self.beta) {
            Ok(dist) => dist.sample(&mut rand::thread_rng()),
            Err(_) => self.mean(),
        }
    }

    /// Fold an observed reward (clamped to `[0, 1]`) into the posterior:
    /// `alpha += reward`, `beta += (1 - reward)`.
    fn update(&mut self, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        self.alpha += reward;
        self.beta += 1.0 - reward;
        self.pulls += 1;
    }
}

/// Serializable snapshot of a router's arm state, for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterState {
    pub arms: Vec<BanditArm>,
}

/// Thompson-sampling multi-armed bandit over a fixed set of named routing
/// arms, with a forced minimum exploration rate so an early unlucky
/// streak can never permanently starve an arm.
pub struct AdaptiveRouter {
    arms: RwLock<HashMap<String, BanditArm>>,
    min_exploration_rate: f64,
}

impl AdaptiveRouter {
    pub fn new(arm_names: impl IntoIterator<Item = String>, min_exploration_rate: f64) -> Self {
        let arms = arm_names
            .into_iter()
            .map(|name| (name.clone(), BanditArm::new(name)))
            .collect();
        Self {
            arms: RwLock::new(arms),
            min_exploration_rate: min_exploration_rate.clamp(0.0, 1.0),
        }
    }

    /// Select an arm: with probability `min_exploration_rate`, pick
    /// uniformly at random; otherwise draw a Thompson sample per arm and
    /// take the argmax.
    pub async fn select_arm(&self) -> Result<String> {
        let arms = self.arms.read().await;
        if arms.is_empty() {
            return Err(Error::internal("router has no arms configured"));
        }

        let mut names: Vec<&String> = arms.keys().collect();
        names.sort();

        if rand::thread_rng().gen_bool(self.min_exploration_rate) {
            let idx = rand::thread_rng().gen_range(0..names.len());
            return Ok(names[idx].clone());
        }

        let mut best_name = names[0].clone();
        let mut best_sample = f64::MIN;
        for name in names {
            let sample = arms[name].sample();
            if sample > best_sample {
                best_sample = sample;
                best_name = name.clone();
            }
        }
        Ok(best_name)
    }

    pub async fn update(&self, arm_name: &str, reward: f64) -> Result<()> {
        let mut arms = self.arms.write().await;
        let arm = arms
            .get_mut(arm_name)
            .ok_or_else(|| Error::invalid_request(format!("unknown routing arm: {arm_name}")))?;
        arm.update(reward);
        Ok(())
    }

    pub async fn arm_means(&self) -> HashMap<String, f64> {
        self.arms
            .read()
            .await
            .values()
            .map(|arm| (arm.name.clone(), arm.mean()))
            .collect()
    }

    pub async fn save_state(&self) -> RouterState {
        RouterState {
            arms: self.arms.read().await.values().cloned().collect(),
        }
    }

    pub async fn load_state(&self, state: RouterState) {
        let mut arms = self.arms.write().await;
        for arm in state.arms {
            arms.insert(arm.name.clone(), arm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Folding in any in-range reward never moves the arm's posterior
        /// mean in the wrong direction: a reward at or above the current
        /// mean can only raise it, one at or below can only lower it.
        #[test]
        fn reward_moves_mean_in_the_consistent_direction(reward in 0.0f64..=1.0) {
            let mut arm = BanditArm::new("a");
            let before = arm.mean();
            arm.update(reward);
            let after = arm.mean();
            if reward >= before {
                prop_assert!(after >= before - 1e-9);
            }
            if reward <= before {
                prop_assert!(after <= before + 1e-9);
            }
            prop_assert!(arm.alpha >= 1.0);
            prop_assert!(arm.beta >= 1.0);
        }

        /// Rewards outside `[0, 1]` are always clamped before folding in, so
        /// the posterior mean stays within the unit interval regardless of
        /// how far out of range the input was.
        #[test]
        fn out_of_range_rewards_keep_the_mean_in_unit_interval(reward in -10.0f64..=10.0) {
            let mut arm = BanditArm::new("a");
            arm.update(reward);
            let mean = arm.mean();
            prop_assert!((0.0..=1.0).contains(&mean));
        }
    }

    #[test]
    fn arm_parameters_never_drop_below_the_uniform_prior() {
        let mut arm = BanditArm::new("a");
        arm.update(0.0);
        arm.update(0.0);
        assert!(arm.alpha >= 1.0);
        assert!(arm.beta >= 1.0);
    }

    #[test]
    fn reward_outside_unit_interval_is_clamped() {
        let mut arm = BanditArm::new("a");
        arm.update(5.0);
        assert_eq!(arm.alpha, 2.0);
        assert_eq!(arm.beta, 1.0);
    }

    #[tokio::test]
    async fn select_arm_errors_with_no_arms() {
        let router = AdaptiveRouter::new(Vec::<String>::new(), 0.05);
        assert!(router.select_arm().await.is_err());
    }

    #[tokio::test]
    async fn convergence_favors_the_consistently_rewarded_arm() {
        let router = AdaptiveRouter::new(
            vec!["good".to_string(), "bad".to_string()],
            0.0,
        );

        for _ in 0..200 {
            router.update("good", 1.0).await.unwrap();
            router.update("bad", 0.0).await.unwrap();
        }

        let means = router.arm_means().await;
        assert!(means["good"] > means["bad"]);

        let mut good_selected = 0;
        for _ in 0..50 {
            if router.select_arm().await.unwrap() == "good" {
                good_selected += 1;
            }
        }
        assert!(good_selected > 40);
    }

    #[test]
    fn strategy_for_arm_maps_known_arms_and_falls_back_to_balanced() {
        assert_eq!(strategy_for_arm("fast_chat"), SelectionStrategy::SpeedFirst);
        assert_eq!(strategy_for_arm("api_fallback"), SelectionStrategy::CostFirst);
        assert_eq!(strategy_for_arm("hybrid_mode"), SelectionStrategy::QualityFirst);
        assert_eq!(strategy_for_arm("search_augmented"), SelectionStrategy::Balanced);
        assert_eq!(strategy_for_arm("unknown_arm"), SelectionStrategy::Balanced);
    }

    #[tokio::test]
    async fn state_round_trips_through_save_and_load() {
        let router = AdaptiveRouter::new(vec!["a".to_string()], 0.05);
        router.update("a", 1.0).await.unwrap();
        let snapshot = router.save_state().await;

        let restored = AdaptiveRouter::new(vec!["a".to_string()], 0.05);
        restored.load_state(snapshot).await;
        let means = restored.arm_means().await;
        assert!(means["a"] > 0.5);
    }
}
