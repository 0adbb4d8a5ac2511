//! Core data models for the resource scaler

use crate::executor::ResizeState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a watched workload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
}

impl WorkloadRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace/name`, or a bare name in the `default` namespace
    pub fn parse(s: &str) -> Option<Self> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Some(Self::new(ns, name)),
            Some(_) => None,
            None if !s.is_empty() => Some(Self::new("default", s)),
            None => None,
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One observation of a workload's usage and configured limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_cores: f64,
    pub memory_mb: f64,
    pub cpu_limit_cores: f64,
    pub memory_limit_mb: f64,
}

impl ResourceSample {
    pub fn new(cpu_cores: f64, memory_mb: f64, cpu_limit_cores: f64, memory_limit_mb: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            cpu_cores,
            memory_mb,
            cpu_limit_cores,
            memory_limit_mb,
        }
    }

    /// CPU usage as a fraction of the limit, clamped to [0, 1]
    pub fn cpu_utilization(&self) -> f64 {
        normalize(self.cpu_cores, self.cpu_limit_cores)
    }

    /// Memory usage as a fraction of the limit, clamped to [0, 1]
    pub fn memory_utilization(&self) -> f64 {
        normalize(self.memory_mb, self.memory_limit_mb)
    }
}

fn normalize(usage: f64, limit: f64) -> f64 {
    if !(limit > 0.0) || !usage.is_finite() {
        return 0.0;
    }
    (usage / limit).clamp(0.0, 1.0)
}

/// Number of components in a feature vector
pub const FEATURE_DIM: usize = 8;

/// Normalized policy input
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub cpu_trend: f64,
    pub memory_trend: f64,
    pub hour_sin: f64,
    pub hour_cos: f64,
    pub day_sin: f64,
    pub day_cos: f64,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f32; FEATURE_DIM] {
        [
            self.cpu_usage as f32,
            self.memory_usage as f32,
            self.cpu_trend as f32,
            self.memory_trend as f32,
            self.hour_sin as f32,
            self.hour_cos as f32,
            self.day_sin as f32,
            self.day_cos as f32,
        ]
    }
}

/// Per-resource scaling action chosen by a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScalingAction {
    Decrease,
    Maintain,
    Increase,
}

impl ScalingAction {
    /// Map a policy action index (0, 1, 2)
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Decrease),
            1 => Some(Self::Maintain),
            2 => Some(Self::Increase),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Decrease => 0,
            Self::Maintain => 1,
            Self::Increase => 2,
        }
    }

    /// Multiplier applied to the current allocation
    pub fn multiplier(&self, scale_factor: f64) -> f64 {
        match self {
            Self::Decrease => 1.0 - scale_factor,
            Self::Maintain => 1.0,
            Self::Increase => 1.0 + scale_factor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decrease => "DECREASE",
            Self::Maintain => "MAINTAIN",
            Self::Increase => "INCREASE",
        }
    }
}

impl fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value per managed resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcePair {
    pub cpu: f64,
    pub memory: f64,
}

impl ResourcePair {
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self { cpu, memory }
    }
}

/// One value per action, keyed by action name
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionValues {
    pub decrease: f64,
    pub maintain: f64,
    pub increase: f64,
}

impl ActionValues {
    /// From values ordered by action index
    pub fn from_slice(values: &[f64; 3]) -> Self {
        Self {
            decrease: values[0],
            maintain: values[1],
            increase: values[2],
        }
    }

    pub fn get(&self, action: ScalingAction) -> f64 {
        match action {
            ScalingAction::Decrease => self.decrease,
            ScalingAction::Maintain => self.maintain,
            ScalingAction::Increase => self.increase,
        }
    }
}

/// Raw Q-values and their softmax for one resource head
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionScores {
    pub q_values: ActionValues,
    pub probabilities: ActionValues,
}

/// Per-action scores from policies that expose them
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyScores {
    pub cpu: ActionScores,
    pub memory: ActionScores,
}

/// Proposed change for one resource
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub action: ScalingAction,
    pub current: f64,
    pub proposed: f64,
    pub change_percent: f64,
}

/// Proposed changes for both resources (CPU in cores, memory in MB)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProposedChanges {
    pub cpu: ResourceChange,
    pub memory: ResourceChange,
}

/// Audit record of one policy evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub workload: WorkloadRef,
    pub timestamp: DateTime<Utc>,
    pub cpu_action: ScalingAction,
    pub memory_action: ScalingAction,
    pub confidence: ResourcePair,
    pub predicted_future_usage: ResourcePair,
    pub proposed_changes: ProposedChanges,
    pub eligible_to_apply: bool,
    pub features: FeatureVector,
    /// Absent for policies without per-action scores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<PolicyScores>,
    pub policy: String,
    pub reasoning: String,
}

impl Decision {
    pub fn is_maintain(&self) -> bool {
        self.cpu_action == ScalingAction::Maintain && self.memory_action == ScalingAction::Maintain
    }
}

/// Strategy used to apply a resource change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationMethod {
    InPlace,
    ControllerPatch,
    None,
}

impl MutationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InPlace => "in_place",
            Self::ControllerPatch => "controller_patch",
            Self::None => "none",
        }
    }
}

/// Explicit limits for a manual resize; an omitted resource keeps its current limit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResizeRequest {
    /// CPU limit quantity such as `500m` or `1.5`
    #[serde(default)]
    pub cpu: Option<String>,
    /// Memory limit quantity such as `512Mi` or `1Gi`
    #[serde(default)]
    pub memory: Option<String>,
}

/// Requests and limits sent to the control plane
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceTarget {
    pub cpu_limit_cores: f64,
    pub cpu_request_cores: f64,
    pub memory_limit_mb: f64,
    pub memory_request_mb: f64,
}

/// Reference to the controller that owns a workload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ControllerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Diagnostic details attached to a mutation result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationDetails {
    pub target: Option<ResourceTarget>,
    pub states: Vec<ResizeState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Terminal outcome of one mutation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResult {
    pub workload: WorkloadRef,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub method: MutationMethod,
    pub details: MutationDetails,
    pub message: String,
}

/// What happened to a workload in one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    NoActionNeeded,
    Cooldown,
    DryRun,
    Applied,
    Failed,
    SkippedInFlight,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoActionNeeded => "no_action_needed",
            Self::Cooldown => "cooldown",
            Self::DryRun => "dry_run",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::SkippedInFlight => "skipped_in_flight",
        }
    }
}

/// Decision plus whatever the engine did about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingOutcome {
    pub workload: WorkloadRef,
    pub status: OutcomeStatus,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation: Option<MutationResult>,
    pub message: String,
}
