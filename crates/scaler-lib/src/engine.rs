//! Per-workload decision pipeline
//!
//! One evaluation appends the sample, builds features, asks the policy,
//! records the decision, and when the decision is actionable, eligible and
//! not a dry run, hands the target to the [`ResizeExecutor`]. Explicit
//! targets from the API skip the policy through [`DecisionEngine::apply_manual`].

use crate::cluster::quantity::{parse_cpu, parse_memory};
use crate::cluster::{ContainerResources, ControlPlane, MetricsSource, WorkloadSpec};
use crate::config::ScalerConfig;
use crate::cooldown::CooldownTracker;
use crate::error::{Result, ScalerError};
use crate::executor::{resize_target, ExecutorConfig, ResizeExecutor};
use crate::health::{components, HealthRegistry};
use crate::history::DecisionHistoryStore;
use crate::models::{
    Decision, FeatureVector, MutationResult, OutcomeStatus, ProposedChanges, ResizeRequest,
    ResourceChange, ResourceSample, ScalingAction, ScalingOutcome, WorkloadRef,
};
use crate::observability::{ScalerMetrics, StructuredLogger};
use crate::policy::{explain, DecisionPolicy, FeatureStateBuilder, PolicyInfo, PolicyOutput};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Budget for one policy call before falling back to MAINTAIN
pub const POLICY_TIMEOUT: Duration = Duration::from_secs(2);

/// Proposed value for one resource: `current × multiplier`, clamped
pub fn propose_change(
    action: ScalingAction,
    current: f64,
    scale_factor: f64,
    clamp: impl Fn(f64) -> f64,
) -> ResourceChange {
    let proposed = clamp(current * action.multiplier(scale_factor));
    let change_percent = if current > 0.0 {
        (proposed - current) / current * 100.0
    } else {
        0.0
    };
    ResourceChange {
        action,
        current,
        proposed,
        change_percent,
    }
}

/// Parse an optional quantity that must be positive when present
fn parse_requested(
    quantity: Option<&str>,
    resource: &str,
    parse: fn(&str) -> Option<f64>,
) -> Result<Option<f64>> {
    let Some(quantity) = quantity else {
        return Ok(None);
    };
    match parse(quantity) {
        Some(value) if value > 0.0 => Ok(Some(value)),
        _ => Err(ScalerError::InvalidRequest(format!(
            "invalid {} quantity {:?}",
            resource, quantity
        ))),
    }
}

/// Removes the workload from the in-flight set when dropped
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<WorkloadRef, ()>,
    workload: WorkloadRef,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.workload);
    }
}

/// Builder-style wiring for [`DecisionEngine`]
pub struct EngineParts {
    pub policy: Arc<dyn DecisionPolicy>,
    pub control_plane: Arc<dyn ControlPlane>,
    pub metrics_source: Arc<dyn MetricsSource>,
    pub executor_config: ExecutorConfig,
    pub sample_window: usize,
    pub decision_history: usize,
    pub health: HealthRegistry,
}

pub struct DecisionEngine {
    policy: Arc<dyn DecisionPolicy>,
    control_plane: Arc<dyn ControlPlane>,
    metrics_source: Arc<dyn MetricsSource>,
    executor: ResizeExecutor,
    features: FeatureStateBuilder,
    cooldown: CooldownTracker,
    history: DecisionHistoryStore,
    in_flight: DashMap<WorkloadRef, ()>,
    health: HealthRegistry,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
    policy_timeout: Duration,
    call_timeout: Duration,
}

impl DecisionEngine {
    pub fn new(parts: EngineParts) -> Self {
        let call_timeout = parts.executor_config.call_timeout;
        Self {
            policy: parts.policy,
            control_plane: Arc::clone(&parts.control_plane),
            metrics_source: parts.metrics_source,
            executor: ResizeExecutor::new(parts.control_plane, parts.executor_config),
            features: FeatureStateBuilder::new(),
            cooldown: CooldownTracker::new(),
            history: DecisionHistoryStore::new(parts.sample_window, parts.decision_history),
            in_flight: DashMap::new(),
            health: parts.health,
            metrics: ScalerMetrics::new(),
            logger: StructuredLogger::new("engine"),
            policy_timeout: POLICY_TIMEOUT,
            call_timeout,
        }
    }

    pub fn with_policy_timeout(mut self, timeout: Duration) -> Self {
        self.policy_timeout = timeout;
        self
    }

    pub fn history(&self) -> &DecisionHistoryStore {
        &self.history
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    pub fn policy_info(&self) -> PolicyInfo {
        self.policy.info()
    }

    /// Drop history and cooldown state of workloads not in `live`
    pub async fn forget_missing(&self, live: &HashSet<WorkloadRef>) -> usize {
        let dropped = self.history.retain(live).await;
        self.cooldown.retain(live).await;
        if dropped > 0 {
            debug!(dropped, "Dropped state of departed workloads");
        }
        dropped
    }

    /// Fetch usage and process it; `Ok(None)` when the source has no sample
    pub async fn evaluate(
        &self,
        workload: &WorkloadRef,
        config: &ScalerConfig,
    ) -> Result<Option<ScalingOutcome>> {
        let sample = match self.current_usage(workload).await {
            Ok(Some(sample)) => {
                self.health.set_healthy(components::METRICS_SOURCE).await;
                sample
            }
            Ok(None) => {
                debug!(workload = %workload, "No usage sample, skipping");
                return Ok(None);
            }
            Err(e) => {
                self.metrics.inc_control_plane_errors(e.kind());
                self.health
                    .set_degraded(components::METRICS_SOURCE, e.to_string())
                    .await;
                return Err(e);
            }
        };

        Ok(Some(self.process(workload, sample, config).await))
    }

    /// Latest usage from the metrics source, within the call budget
    pub async fn current_usage(&self, workload: &WorkloadRef) -> Result<Option<ResourceSample>> {
        tokio::time::timeout(self.call_timeout, self.metrics_source.get_usage(workload))
            .await
            .unwrap_or(Err(ScalerError::Timeout {
                operation: "get_usage",
                budget: self.call_timeout,
            }))
    }

    pub async fn workload_spec(&self, workload: &WorkloadRef) -> Result<WorkloadSpec> {
        tokio::time::timeout(self.call_timeout, self.control_plane.get_spec(workload))
            .await
            .unwrap_or(Err(ScalerError::Timeout {
                operation: "get_spec",
                budget: self.call_timeout,
            }))
    }

    /// Resize to explicit limits without consulting the policy
    ///
    /// Ignores cooldown and `dry_run` but not the configured bounds, and
    /// starts a cooldown when it succeeds. A failed resize is returned as
    /// an unsuccessful [`MutationResult`], not as an error.
    pub async fn apply_manual(
        &self,
        workload: &WorkloadRef,
        request: &ResizeRequest,
        config: &ScalerConfig,
    ) -> Result<MutationResult> {
        let cpu = parse_requested(request.cpu.as_deref(), "cpu", parse_cpu)?;
        let memory = parse_requested(request.memory.as_deref(), "memory", parse_memory)?;
        if cpu.is_none() && memory.is_none() {
            return Err(ScalerError::InvalidRequest(
                "at least one of cpu or memory is required".to_string(),
            ));
        }

        let _guard = self
            .claim(workload)
            .ok_or_else(|| ScalerError::ResizeInFlight(workload.clone()))?;

        let spec = match (cpu, memory) {
            (Some(_), Some(_)) => None,
            _ => Some(self.workload_spec(workload).await?),
        };
        let current = |limit: fn(&ContainerResources) -> Option<f64>, resource: &str| {
            spec.as_ref()
                .and_then(|s| s.primary())
                .and_then(limit)
                .ok_or_else(|| {
                    ScalerError::InvalidRequest(format!(
                        "{} declares no {} limit, both values are required",
                        workload, resource
                    ))
                })
        };
        let cpu = match cpu {
            Some(v) => v,
            None => current(|c| c.cpu_limit_cores, "cpu")?,
        };
        let memory = match memory {
            Some(v) => v,
            None => current(|c| c.memory_limit_mb, "memory")?,
        };

        let target = resize_target(cpu, memory, config);
        info!(
            workload = %workload,
            cpu_limit_cores = target.cpu_limit_cores,
            memory_limit_mb = target.memory_limit_mb,
            "Manual resize requested"
        );
        let result = self.executor.execute(workload, target).await;
        if result.success {
            self.cooldown.record_applied(workload).await;
        }
        self.history.record_mutation(result.clone()).await;
        self.metrics.record_mutation(&result);
        self.logger.log_mutation(&result);
        Ok(result)
    }

    /// Run one sample through the full pipeline
    pub async fn process(
        &self,
        workload: &WorkloadRef,
        sample: ResourceSample,
        config: &ScalerConfig,
    ) -> ScalingOutcome {
        let samples = self.history.record_sample(workload, sample.clone()).await;
        let features = self.features.build(&sample, &samples);
        let output = self.decide(workload, features).await;

        let proposed_changes = ProposedChanges {
            cpu: propose_change(
                output.cpu_action,
                sample.cpu_limit_cores,
                config.scale_factor,
                |v| config.clamp_cpu(v),
            ),
            memory: propose_change(
                output.memory_action,
                sample.memory_limit_mb,
                config.scale_factor,
                |v| config.clamp_memory(v),
            ),
        };
        let eligible_to_apply = self.cooldown.is_eligible(workload, config.cooldown()).await;

        let decision = Decision {
            workload: workload.clone(),
            timestamp: Utc::now(),
            cpu_action: output.cpu_action,
            memory_action: output.memory_action,
            confidence: output.confidence,
            predicted_future_usage: output.predicted_future_usage,
            proposed_changes,
            eligible_to_apply,
            features,
            scores: output.scores,
            policy: self.policy.name().to_string(),
            reasoning: explain(&features, &output),
        };
        self.history.record_decision(decision.clone()).await;
        self.metrics.record_decision(&decision);
        self.logger.log_decision(&decision);

        let outcome = self.act(decision, config).await;
        self.history.record_outcome(&outcome).await;
        self.metrics.record_outcome(outcome.status.as_str());
        outcome
    }

    async fn act(&self, decision: Decision, config: &ScalerConfig) -> ScalingOutcome {
        let workload = decision.workload.clone();
        let outcome = |status: OutcomeStatus, decision: Decision, message: String| ScalingOutcome {
            workload: decision.workload.clone(),
            status,
            decision,
            mutation: None,
            message,
        };

        if decision.is_maintain() {
            return outcome(
                OutcomeStatus::NoActionNeeded,
                decision,
                "Both resources at MAINTAIN".to_string(),
            );
        }
        if !decision.eligible_to_apply {
            return outcome(
                OutcomeStatus::Cooldown,
                decision,
                format!(
                    "In cooldown for {} minutes after the last change",
                    config.cooldown_minutes
                ),
            );
        }
        if config.dry_run {
            let changes = &decision.proposed_changes;
            let message = format!(
                "Dry run: would set CPU limit {:.3} -> {:.3} cores \
                 and memory limit {:.0} -> {:.0} MB",
                changes.cpu.current,
                changes.cpu.proposed,
                changes.memory.current,
                changes.memory.proposed
            );
            return outcome(OutcomeStatus::DryRun, decision, message);
        }

        let Some(_guard) = self.claim(&workload) else {
            return outcome(
                OutcomeStatus::SkippedInFlight,
                decision,
                "Another mutation for this workload is in flight".to_string(),
            );
        };

        // Another caller may have finished a mutation since the decision was made
        if !self.cooldown.is_eligible(&workload, config.cooldown()).await {
            return outcome(
                OutcomeStatus::Cooldown,
                decision,
                "Cooldown started while the decision was being made".to_string(),
            );
        }

        let target = resize_target(
            decision.proposed_changes.cpu.proposed,
            decision.proposed_changes.memory.proposed,
            config,
        );
        let result = self.executor.execute(&workload, target).await;
        if result.success {
            self.cooldown.record_applied(&workload).await;
        }
        self.metrics.record_mutation(&result);
        self.logger.log_mutation(&result);

        let status = if result.success {
            OutcomeStatus::Applied
        } else {
            OutcomeStatus::Failed
        };
        ScalingOutcome {
            workload,
            status,
            message: result.message.clone(),
            decision,
            mutation: Some(result),
        }
    }

    fn claim(&self, workload: &WorkloadRef) -> Option<InFlightGuard<'_>> {
        use dashmap::mapref::entry::Entry;
        match self.in_flight.entry(workload.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlightGuard {
                    in_flight: &self.in_flight,
                    workload: workload.clone(),
                })
            }
        }
    }

    /// Call the policy off the async runtime; any failure yields MAINTAIN
    async fn decide(&self, workload: &WorkloadRef, features: FeatureVector) -> PolicyOutput {
        let policy = Arc::clone(&self.policy);
        let started = Instant::now();
        let call = tokio::task::spawn_blocking(move || policy.decide(&features));

        let failure = match tokio::time::timeout(self.policy_timeout, call).await {
            Ok(Ok(Ok(output))) => {
                self.metrics
                    .observe_policy_latency(started.elapsed().as_secs_f64());
                self.health.set_healthy(components::POLICY).await;
                return output;
            }
            Ok(Ok(Err(e))) => ScalerError::PolicyUnavailable(e.to_string()),
            Ok(Err(join_error)) => {
                ScalerError::PolicyUnavailable(format!("policy panicked: {}", join_error))
            }
            Err(_) => ScalerError::PolicyUnavailable(format!(
                "policy exceeded {:?}",
                self.policy_timeout
            )),
        };

        warn!(workload = %workload, error = %failure, "Policy failed, defaulting to MAINTAIN");
        self.metrics.inc_policy_failures();
        self.health
            .set_degraded(components::POLICY, failure.to_string())
            .await;
        PolicyOutput::maintain()
    }
}
