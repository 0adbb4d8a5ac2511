//! Error kinds raised by the scaling pipeline

use crate::models::WorkloadRef;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the policy, the control plane and the executor
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScalerError {
    /// The decision policy failed; callers degrade to MAINTAIN
    #[error("policy unavailable: {0}")]
    PolicyUnavailable(String),

    /// The workload cannot be resized in place
    #[error("in-place resize unsupported: {0}")]
    CapabilityUnsupported(String),

    /// The control plane hard-rejected the requested values
    #[error("resize infeasible: {0}")]
    MutationInfeasible(String),

    #[error("no controller to patch for {0}")]
    ControllerNotFound(WorkloadRef),

    #[error("workload {0} not found")]
    WorkloadNotFound(WorkloadRef),

    /// Another mutation of the workload has not finished yet
    #[error("a resize of {0} is already in flight")]
    ResizeInFlight(WorkloadRef),

    #[error("resize not confirmed within {0:?}")]
    VerificationTimeout(Duration),

    /// Network or availability error talking to the cluster
    #[error("control plane error: {0}")]
    TransientControlPlane(String),

    #[error("{operation} timed out after {budget:?}")]
    Timeout {
        operation: &'static str,
        budget: Duration,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A workload evaluation panicked; the cycle carries on
    #[error("evaluation panicked: {0}")]
    EvaluationPanicked(String),
}

impl ScalerError {
    /// Stable label for metrics and audit records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PolicyUnavailable(_) => "policy_unavailable",
            Self::CapabilityUnsupported(_) => "capability_unsupported",
            Self::MutationInfeasible(_) => "mutation_infeasible",
            Self::ControllerNotFound(_) => "controller_not_found",
            Self::WorkloadNotFound(_) => "workload_not_found",
            Self::ResizeInFlight(_) => "resize_in_flight",
            Self::VerificationTimeout(_) => "verification_timeout",
            Self::TransientControlPlane(_) => "transient_control_plane",
            Self::Timeout { .. } => "timeout",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidRequest(_) => "invalid_request",
            Self::EvaluationPanicked(_) => "evaluation_panicked",
        }
    }

    /// Whether a retry on a later cycle may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientControlPlane(_) | Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, ScalerError>;

impl From<kube::Error> for ScalerError {
    fn from(err: kube::Error) -> Self {
        Self::TransientControlPlane(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(
            ScalerError::MutationInfeasible("cpu".into()).kind(),
            "mutation_infeasible"
        );
        assert_eq!(
            ScalerError::ControllerNotFound(WorkloadRef::new("ns", "pod")).to_string(),
            "no controller to patch for ns/pod"
        );
        assert_eq!(
            ScalerError::WorkloadNotFound(WorkloadRef::new("ns", "gone")).kind(),
            "workload_not_found"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(ScalerError::TransientControlPlane("reset".into()).is_transient());
        assert!(ScalerError::Timeout {
            operation: "get_spec",
            budget: Duration::from_secs(5)
        }
        .is_transient());
        assert!(!ScalerError::MutationInfeasible("x".into()).is_transient());
        assert!(!ScalerError::WorkloadNotFound(WorkloadRef::new("ns", "p")).is_transient());
    }
}
