//! Resize state machine
//!
//! ```text
//! CHECK_CAPABILITY -> ATTEMPT_IN_PLACE -> VERIFY -> SUCCESS
//!        |                  |               |
//!        |                  |               +-> FAILURE (infeasible)
//!        |                  +-> FAILURE (infeasible)
//!        +-> FAILURE (spec unreadable)
//!        v                  v
//!  ATTEMPT_CONTROLLER_PATCH -> SUCCESS | FAILURE
//! ```
//!
//! Each non-terminal state has one observation type and one pure
//! transition function. The executor performs the I/O and feeds the
//! observation back in.

use crate::error::ScalerError;
use crate::models::ControllerRef;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResizeState {
    CheckCapability,
    AttemptInPlace,
    Verify,
    AttemptControllerPatch,
    Success,
    Failure,
}

impl ResizeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// What CHECK_CAPABILITY found
#[derive(Debug, Clone, PartialEq)]
pub enum Capability {
    InPlaceSupported,
    Unsupported(String),
    /// The workload spec could not be read
    Unavailable(ScalerError),
}

/// What ATTEMPT_IN_PLACE got back
#[derive(Debug, Clone)]
pub enum InPlaceAttempt {
    Accepted,
    Infeasible(String),
    /// Unsupported or failed for any reason other than infeasibility
    Failed(ScalerError),
}

/// One VERIFY poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyObservation {
    Converged,
    Infeasible,
    Pending,
    TimedOut,
}

#[derive(Debug, Clone)]
pub enum ControllerPatchAttempt {
    Patched(ControllerRef),
    NoController,
    Failed(ScalerError),
}

pub fn after_capability(capability: &Capability) -> ResizeState {
    match capability {
        Capability::InPlaceSupported => ResizeState::AttemptInPlace,
        Capability::Unsupported(_) => ResizeState::AttemptControllerPatch,
        Capability::Unavailable(_) => ResizeState::Failure,
    }
}

/// Infeasibility is terminal; every other failure falls back to the controller
pub fn after_in_place(attempt: &InPlaceAttempt) -> ResizeState {
    match attempt {
        InPlaceAttempt::Accepted => ResizeState::Verify,
        InPlaceAttempt::Infeasible(_) => ResizeState::Failure,
        InPlaceAttempt::Failed(ScalerError::MutationInfeasible(_)) => ResizeState::Failure,
        InPlaceAttempt::Failed(_) => ResizeState::AttemptControllerPatch,
    }
}

/// A verification timeout counts as success
pub fn after_verify(observation: VerifyObservation) -> ResizeState {
    match observation {
        VerifyObservation::Converged | VerifyObservation::TimedOut => ResizeState::Success,
        VerifyObservation::Infeasible => ResizeState::Failure,
        VerifyObservation::Pending => ResizeState::Verify,
    }
}

pub fn after_controller_patch(attempt: &ControllerPatchAttempt) -> ResizeState {
    match attempt {
        ControllerPatchAttempt::Patched(_) => ResizeState::Success,
        ControllerPatchAttempt::NoController | ControllerPatchAttempt::Failed(_) => {
            ResizeState::Failure
        }
    }
}
