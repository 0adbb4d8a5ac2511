//! Decision policies
//!
//! A policy maps a [`FeatureVector`] to one action per resource. The engine
//! treats it as an opaque capability behind [`DecisionPolicy`].

mod features;
mod onnx;
mod threshold;

pub use features::FeatureStateBuilder;
pub use onnx::{InferenceStats, OnnxPolicy, MODEL_OUTPUTS};
pub use threshold::{ThresholdPolicy, HIGH_UTILIZATION, LOW_UTILIZATION};

use crate::models::{FeatureVector, PolicyScores, ResourcePair, ScalingAction, FEATURE_DIM};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Trait for decision policy implementations
///
/// Implementations must not touch scaler state and must be deterministic
/// for a given input.
pub trait DecisionPolicy: Send + Sync {
    /// Decide CPU and memory actions for a feature vector
    fn decide(&self, features: &FeatureVector) -> Result<PolicyOutput>;

    /// Name recorded on every decision
    fn name(&self) -> &str;

    /// Description served by the model info endpoint
    fn info(&self) -> PolicyInfo {
        PolicyInfo::new(self.name())
    }
}

/// Names of the feature vector components, in input order
pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "cpu_usage",
    "memory_usage",
    "cpu_trend",
    "memory_trend",
    "hour_sin",
    "hour_cos",
    "day_sin",
    "day_cos",
];

/// What a policy consumes and produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub name: String,
    pub input_shape: Vec<usize>,
    /// Empty for policies that are not a model
    pub output_shape: Vec<usize>,
    /// Indexed by action index
    pub actions: Vec<ScalingAction>,
    pub features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Hex SHA-256 of the model file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl PolicyInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_shape: vec![1, FEATURE_DIM],
            output_shape: Vec::new(),
            actions: vec![
                ScalingAction::Decrease,
                ScalingAction::Maintain,
                ScalingAction::Increase,
            ],
            features: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            source: None,
            sha256: None,
        }
    }
}

/// Output of one policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyOutput {
    pub cpu_action: ScalingAction,
    pub memory_action: ScalingAction,
    pub confidence: ResourcePair,
    pub predicted_future_usage: ResourcePair,
    pub scores: Option<PolicyScores>,
}

impl PolicyOutput {
    /// Build from raw action indices, rejecting anything outside 0..=2
    pub fn from_indices(
        cpu_action: usize,
        memory_action: usize,
        confidence: ResourcePair,
        predicted_future_usage: ResourcePair,
    ) -> Result<Self> {
        let cpu = ScalingAction::from_index(cpu_action)
            .ok_or_else(|| anyhow::anyhow!("invalid cpu action index {}", cpu_action))?;
        let memory = ScalingAction::from_index(memory_action)
            .ok_or_else(|| anyhow::anyhow!("invalid memory action index {}", memory_action))?;
        Ok(Self {
            cpu_action: cpu,
            memory_action: memory,
            confidence,
            predicted_future_usage,
            scores: None,
        })
    }

    pub fn with_scores(mut self, scores: PolicyScores) -> Self {
        self.scores = Some(scores);
        self
    }

    /// MAINTAIN on both resources with zero confidence
    pub fn maintain() -> Self {
        Self {
            cpu_action: ScalingAction::Maintain,
            memory_action: ScalingAction::Maintain,
            confidence: ResourcePair::default(),
            predicted_future_usage: ResourcePair::default(),
            scores: None,
        }
    }
}

/// Human-readable reasoning for a decision
pub fn explain(features: &FeatureVector, output: &PolicyOutput) -> String {
    let mut reasons: Vec<&str> = Vec::new();

    if features.cpu_usage > 0.8 {
        reasons.push("High CPU utilization detected");
    } else if features.cpu_usage < 0.2 {
        reasons.push("Low CPU utilization detected");
    }
    if features.memory_usage > 0.8 {
        reasons.push("High memory utilization detected");
    } else if features.memory_usage < 0.2 {
        reasons.push("Low memory utilization detected");
    }

    if features.cpu_trend > 0.1 {
        reasons.push("CPU usage trending upward");
    } else if features.cpu_trend < -0.1 {
        reasons.push("CPU usage trending downward");
    }
    if features.memory_trend > 0.1 {
        reasons.push("Memory usage trending upward");
    } else if features.memory_trend < -0.1 {
        reasons.push("Memory usage trending downward");
    }

    let future = output.predicted_future_usage;
    if future.cpu > features.cpu_usage + 0.1 {
        reasons.push("CPU usage expected to increase");
    } else if future.cpu < features.cpu_usage - 0.1 {
        reasons.push("CPU usage expected to decrease");
    }
    if future.memory > features.memory_usage + 0.1 {
        reasons.push("Memory usage expected to increase");
    } else if future.memory < features.memory_usage - 0.1 {
        reasons.push("Memory usage expected to decrease");
    }

    reasons.push(match output.cpu_action {
        ScalingAction::Increase => "CPU scale-up recommended",
        ScalingAction::Decrease => "CPU scale-down recommended",
        ScalingAction::Maintain => "CPU maintenance recommended",
    });
    reasons.push(match output.memory_action {
        ScalingAction::Increase => "Memory scale-up recommended",
        ScalingAction::Decrease => "Memory scale-down recommended",
        ScalingAction::Maintain => "Memory maintenance recommended",
    });

    reasons.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(cpu: f64, mem: f64, cpu_trend: f64) -> FeatureVector {
        FeatureVector {
            cpu_usage: cpu,
            memory_usage: mem,
            cpu_trend,
            memory_trend: 0.0,
            hour_sin: 0.0,
            hour_cos: 1.0,
            day_sin: 0.0,
            day_cos: 1.0,
        }
    }

    #[test]
    fn test_from_indices_rejects_out_of_range() {
        let ok = PolicyOutput::from_indices(0, 2, ResourcePair::default(), ResourcePair::default())
            .unwrap();
        assert_eq!(ok.cpu_action, ScalingAction::Decrease);
        assert_eq!(ok.memory_action, ScalingAction::Increase);
        assert!(
            PolicyOutput::from_indices(3, 1, ResourcePair::default(), ResourcePair::default())
                .is_err()
        );
    }

    #[test]
    fn test_maintain_has_zero_confidence() {
        let out = PolicyOutput::maintain();
        assert_eq!(out.cpu_action, ScalingAction::Maintain);
        assert_eq!(out.memory_action, ScalingAction::Maintain);
        assert_eq!(out.confidence, ResourcePair::new(0.0, 0.0));
    }

    #[test]
    fn test_default_info() {
        let info = PolicyInfo::new("custom");
        assert_eq!(info.input_shape, vec![1, FEATURE_DIM]);
        assert_eq!(info.features.len(), FEATURE_DIM);
        assert_eq!(info.actions[0], ScalingAction::Decrease);
        assert!(info.sha256.is_none());
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("sha256").is_none());
    }

    #[test]
    fn test_explain_mentions_pressure_and_actions() {
        let out = PolicyOutput {
            cpu_action: ScalingAction::Increase,
            memory_action: ScalingAction::Maintain,
            confidence: ResourcePair::new(0.9, 0.6),
            predicted_future_usage: ResourcePair::new(1.0, 0.5),
            scores: None,
        };
        let text = explain(&features(0.85, 0.5, 0.2), &out);
        assert!(text.contains("High CPU utilization detected"));
        assert!(text.contains("CPU usage trending upward"));
        assert!(text.contains("CPU scale-up recommended"));
        assert!(text.contains("Memory maintenance recommended"));
        assert!(!text.contains("memory utilization detected"));
    }
}
