//! Resource mutation with verification and fallback
//!
//! [`ResizeExecutor::execute`] drives the [`state`] machine against a
//! [`ControlPlane`] and always returns exactly one [`MutationResult`].
//! Every control-plane call runs under a fixed time budget.

pub mod state;

pub use state::ResizeState;

use crate::cluster::{ControlPlane, PatchOutcome, ResizeStatus};
use crate::config::ScalerConfig;
use crate::error::{Result, ScalerError};
use crate::models::{MutationDetails, MutationMethod, MutationResult, ResourceTarget, WorkloadRef};
use chrono::Utc;
use state::{
    after_capability, after_controller_patch, after_in_place, after_verify, Capability,
    ControllerPatchAttempt, InPlaceAttempt, VerifyObservation,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// CPU request as a fraction of the new CPU limit
pub const CPU_REQUEST_RATIO: f64 = 0.5;

/// Memory request as a fraction of the new memory limit
pub const MEMORY_REQUEST_RATIO: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on waiting for an in-place resize to converge
    pub verify_timeout: Duration,
    pub poll_interval: Duration,
    /// Budget for each individual control-plane call
    pub call_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            verify_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Limits clamped into the configured bounds, requests derived from them
pub fn resize_target(
    cpu_limit_cores: f64,
    memory_limit_mb: f64,
    config: &ScalerConfig,
) -> ResourceTarget {
    let cpu_limit_cores = config.clamp_cpu(cpu_limit_cores);
    let memory_limit_mb = config.clamp_memory(memory_limit_mb);
    ResourceTarget {
        cpu_limit_cores,
        cpu_request_cores: cpu_limit_cores * CPU_REQUEST_RATIO,
        memory_limit_mb,
        memory_request_mb: memory_limit_mb * MEMORY_REQUEST_RATIO,
    }
}

/// Applies resource targets through in-place resize or controller patch
pub struct ResizeExecutor {
    control_plane: Arc<dyn ControlPlane>,
    config: ExecutorConfig,
}

impl ResizeExecutor {
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: ExecutorConfig) -> Self {
        Self {
            control_plane,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ScalerError::Timeout {
                operation,
                budget: self.config.call_timeout,
            }),
        }
    }

    async fn check_capability(&self, workload: &WorkloadRef) -> Capability {
        match self
            .call("get_spec", self.control_plane.get_spec(workload))
            .await
        {
            Ok(spec) => match spec.in_place_blocker() {
                None => Capability::InPlaceSupported,
                Some(reason) => Capability::Unsupported(reason),
            },
            Err(e) => Capability::Unavailable(e),
        }
    }

    async fn attempt_in_place(
        &self,
        workload: &WorkloadRef,
        target: &ResourceTarget,
    ) -> InPlaceAttempt {
        match self
            .call(
                "patch_in_place",
                self.control_plane.patch_in_place(workload, target),
            )
            .await
        {
            Ok(PatchOutcome::Accepted) => InPlaceAttempt::Accepted,
            Ok(PatchOutcome::Infeasible(reason)) => InPlaceAttempt::Infeasible(reason),
            Err(e) => InPlaceAttempt::Failed(e),
        }
    }

    /// One poll; pending past the deadline becomes a timeout
    async fn verify_once(
        &self,
        workload: &WorkloadRef,
        target: &ResourceTarget,
        deadline: Instant,
    ) -> VerifyObservation {
        let observation = match self
            .call("get_spec", self.control_plane.get_spec(workload))
            .await
        {
            Ok(spec) if spec.resize_status == ResizeStatus::Infeasible => {
                VerifyObservation::Infeasible
            }
            Ok(spec) if spec.all_ready() && spec.limits_match(target) => {
                VerifyObservation::Converged
            }
            Ok(spec) => {
                debug!(
                    workload = %workload,
                    resize_status = ?spec.resize_status,
                    "Resize not converged yet"
                );
                VerifyObservation::Pending
            }
            Err(e) => {
                debug!(workload = %workload, error = %e, "Verification poll failed");
                VerifyObservation::Pending
            }
        };

        if observation == VerifyObservation::Pending && Instant::now() >= deadline {
            VerifyObservation::TimedOut
        } else {
            observation
        }
    }

    async fn attempt_controller_patch(
        &self,
        workload: &WorkloadRef,
        target: &ResourceTarget,
    ) -> ControllerPatchAttempt {
        let controller = match self
            .call("find_controller", self.control_plane.find_controller(workload))
            .await
        {
            Ok(Some(c)) => c,
            Ok(None) => return ControllerPatchAttempt::NoController,
            Err(e) => return ControllerPatchAttempt::Failed(e),
        };

        match self
            .call(
                "patch_controller",
                self.control_plane.patch_controller(&controller, target),
            )
            .await
        {
            Ok(()) => ControllerPatchAttempt::Patched(controller),
            Err(e) => ControllerPatchAttempt::Failed(e),
        }
    }

    /// Run the state machine to a terminal state
    pub async fn execute(&self, workload: &WorkloadRef, target: ResourceTarget) -> MutationResult {
        let mut details = MutationDetails {
            target: Some(target),
            ..Default::default()
        };
        let mut method = MutationMethod::None;
        let mut message = String::new();
        let mut fallback_reason: Option<String> = None;
        let mut verify_deadline = Instant::now();
        let mut state = ResizeState::CheckCapability;

        loop {
            if details.states.last() != Some(&state) {
                details.states.push(state);
            }

            state = match state {
                ResizeState::CheckCapability => {
                    let capability = self.check_capability(workload).await;
                    match &capability {
                        Capability::InPlaceSupported => {}
                        Capability::Unsupported(reason) => {
                            debug!(
                                workload = %workload,
                                reason = %reason,
                                "In-place resize unsupported"
                            );
                            fallback_reason = Some(reason.clone());
                        }
                        Capability::Unavailable(e) => {
                            details.error_kind = Some(e.kind().to_string());
                            message = format!("Could not read workload spec: {}", e);
                        }
                    }
                    after_capability(&capability)
                }

                ResizeState::AttemptInPlace => {
                    let attempt = self.attempt_in_place(workload, &target).await;
                    match &attempt {
                        InPlaceAttempt::Accepted => {
                            verify_deadline = Instant::now() + self.config.verify_timeout;
                        }
                        InPlaceAttempt::Infeasible(reason)
                        | InPlaceAttempt::Failed(ScalerError::MutationInfeasible(reason)) => {
                            details.error_kind = Some("mutation_infeasible".to_string());
                            message = format!("In-place resize infeasible: {}", reason);
                        }
                        InPlaceAttempt::Failed(e) => {
                            debug!(
                                workload = %workload,
                                error = %e,
                                "In-place resize failed, falling back"
                            );
                            fallback_reason = Some(e.to_string());
                        }
                    }
                    after_in_place(&attempt)
                }

                ResizeState::Verify => {
                    let observation = self.verify_once(workload, &target, verify_deadline).await;
                    match observation {
                        VerifyObservation::Converged => {
                            method = MutationMethod::InPlace;
                            message = "Resized in place and verified".to_string();
                        }
                        VerifyObservation::TimedOut => {
                            let timeout =
                                ScalerError::VerificationTimeout(self.config.verify_timeout);
                            warn!(
                                workload = %workload,
                                "In-place resize accepted but not confirmed"
                            );
                            method = MutationMethod::InPlace;
                            details.error_kind = Some(timeout.kind().to_string());
                            details.warning = Some(timeout.to_string());
                            message =
                                "Resize accepted in place, verification timed out".to_string();
                        }
                        VerifyObservation::Infeasible => {
                            details.error_kind = Some("mutation_infeasible".to_string());
                            message =
                                "Control plane reported the resize as infeasible".to_string();
                        }
                        VerifyObservation::Pending => {
                            let remaining =
                                verify_deadline.saturating_duration_since(Instant::now());
                            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;
                        }
                    }
                    after_verify(observation)
                }

                ResizeState::AttemptControllerPatch => {
                    let attempt = self.attempt_controller_patch(workload, &target).await;
                    match &attempt {
                        ControllerPatchAttempt::Patched(controller) => {
                            method = MutationMethod::ControllerPatch;
                            details.controller = Some(controller.clone());
                            details.warning = fallback_reason
                                .take()
                                .map(|r| format!("in-place resize unavailable: {}", r));
                            message = format!("Patched {}; takes effect on rollout", controller);
                        }
                        ControllerPatchAttempt::NoController => {
                            let err = ScalerError::ControllerNotFound(workload.clone());
                            details.error_kind = Some(err.kind().to_string());
                            message = "no controller to patch".to_string();
                        }
                        ControllerPatchAttempt::Failed(e) => {
                            details.error_kind = Some(e.kind().to_string());
                            message = format!("Controller patch failed: {}", e);
                        }
                    }
                    after_controller_patch(&attempt)
                }

                ResizeState::Success | ResizeState::Failure => break,
            };
        }

        let success = state == ResizeState::Success;
        if success {
            info!(workload = %workload, method = method.as_str(), "Mutation succeeded");
        } else {
            warn!(workload = %workload, message = %message, "Mutation failed");
        }

        MutationResult {
            workload: workload.clone(),
            timestamp: Utc::now(),
            success,
            method,
            details,
            message,
        }
    }
}
