//! Utilization-band heuristic
//!
//! Used when no model is configured. Each resource is judged on its own
//! utilization and trend.

use super::{DecisionPolicy, PolicyOutput};
use crate::models::{FeatureVector, ResourcePair, ScalingAction};
use anyhow::Result;

/// Utilization above which a resource is scaled up
pub const HIGH_UTILIZATION: f64 = 0.8;

/// Utilization below which a resource is scaled down
pub const LOW_UTILIZATION: f64 = 0.2;

/// Utilization above which an upward trend alone triggers a scale-up
const RISING_UTILIZATION: f64 = 0.7;

const RISING_TREND: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    high: f64,
    low: f64,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            high: HIGH_UTILIZATION,
            low: LOW_UTILIZATION,
        }
    }
}

impl ThresholdPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn judge(&self, usage: f64, trend: f64) -> (ScalingAction, f64) {
        let rising = trend > RISING_TREND;
        if usage > self.high || (usage > RISING_UTILIZATION && rising) {
            let over = ((usage - RISING_UTILIZATION) / (1.0 - RISING_UTILIZATION)).clamp(0.0, 1.0);
            (ScalingAction::Increase, 0.5 + 0.5 * over)
        } else if usage < self.low && trend <= 0.0 {
            let under = ((self.low - usage) / self.low).clamp(0.0, 1.0);
            (ScalingAction::Decrease, 0.5 + 0.5 * under)
        } else {
            let half_band = (self.high - self.low) / 2.0;
            let distance = (usage - self.low).min(self.high - usage).max(0.0);
            (ScalingAction::Maintain, 0.5 + 0.5 * (distance / half_band).clamp(0.0, 1.0))
        }
    }
}

impl DecisionPolicy for ThresholdPolicy {
    fn decide(&self, features: &FeatureVector) -> Result<PolicyOutput> {
        let (cpu_action, cpu_confidence) = self.judge(features.cpu_usage, features.cpu_trend);
        let (memory_action, memory_confidence) =
            self.judge(features.memory_usage, features.memory_trend);

        Ok(PolicyOutput {
            cpu_action,
            memory_action,
            confidence: ResourcePair::new(cpu_confidence, memory_confidence),
            predicted_future_usage: ResourcePair::new(
                (features.cpu_usage + features.cpu_trend).clamp(0.0, 1.0),
                (features.memory_usage + features.memory_trend).clamp(0.0, 1.0),
            ),
            scores: None,
        })
    }

    fn name(&self) -> &str {
        "threshold"
    }
}
