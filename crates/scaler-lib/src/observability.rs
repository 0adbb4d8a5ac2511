//! Prometheus metrics and structured event logging for the scaler

use crate::config::ScalerConfig;
use crate::models::{Decision, MutationResult};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle and policy latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

static GLOBAL_METRICS: OnceLock<ScalerMetricsInner> = OnceLock::new();

struct ScalerMetricsInner {
    cycle_latency_seconds: Histogram,
    policy_latency_seconds: Histogram,
    decisions_total: IntCounterVec,
    outcomes_total: IntCounterVec,
    mutations_total: IntCounterVec,
    policy_failures_total: IntCounter,
    control_plane_errors_total: IntCounterVec,
    workloads_watched: IntGauge,
    loop_running: IntGauge,
}

impl ScalerMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "resource_scaler_cycle_latency_seconds",
                "Time spent evaluating every watched workload in one cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            policy_latency_seconds: register_histogram!(
                "resource_scaler_policy_latency_seconds",
                "Time spent in one decision policy call",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register policy_latency_seconds"),

            decisions_total: register_int_counter_vec!(
                "resource_scaler_decisions_total",
                "Decisions recorded, by action per resource",
                &["cpu_action", "memory_action"]
            )
            .expect("Failed to register decisions_total"),

            outcomes_total: register_int_counter_vec!(
                "resource_scaler_outcomes_total",
                "Workload evaluations, by outcome status",
                &["status"]
            )
            .expect("Failed to register outcomes_total"),

            mutations_total: register_int_counter_vec!(
                "resource_scaler_mutations_total",
                "Mutation attempts, by method and result",
                &["method", "result"]
            )
            .expect("Failed to register mutations_total"),

            policy_failures_total: register_int_counter!(
                "resource_scaler_policy_failures_total",
                "Policy calls that failed, panicked or timed out"
            )
            .expect("Failed to register policy_failures_total"),

            control_plane_errors_total: register_int_counter_vec!(
                "resource_scaler_control_plane_errors_total",
                "Errors returned by the control plane or metrics source, by kind",
                &["kind"]
            )
            .expect("Failed to register control_plane_errors_total"),

            workloads_watched: register_int_gauge!(
                "resource_scaler_workloads_watched",
                "Workloads enumerated in the most recent cycle"
            )
            .expect("Failed to register workloads_watched"),

            loop_running: register_int_gauge!(
                "resource_scaler_loop_running",
                "1 while the background loop is running"
            )
            .expect("Failed to register loop_running"),
        }
    }
}

/// Handle to the process-wide scaler metrics
///
/// Clones share the same underlying collectors, registered with the default
/// Prometheus registry on first use.
#[derive(Clone)]
pub struct ScalerMetrics {
    _private: (),
}

impl Default for ScalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScalerMetricsInner {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn observe_policy_latency(&self, duration_secs: f64) {
        self.inner().policy_latency_seconds.observe(duration_secs);
    }

    pub fn record_decision(&self, decision: &Decision) {
        self.inner()
            .decisions_total
            .with_label_values(&[decision.cpu_action.as_str(), decision.memory_action.as_str()])
            .inc();
    }

    pub fn record_outcome(&self, status: &str) {
        self.inner().outcomes_total.with_label_values(&[status]).inc();
    }

    pub fn record_mutation(&self, result: &MutationResult) {
        let outcome = if result.success { "success" } else { "failure" };
        self.inner()
            .mutations_total
            .with_label_values(&[result.method.as_str(), outcome])
            .inc();
    }

    pub fn inc_policy_failures(&self) {
        self.inner().policy_failures_total.inc();
    }

    pub fn inc_control_plane_errors(&self, kind: &str) {
        self.inner()
            .control_plane_errors_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn set_workloads_watched(&self, count: i64) {
        self.inner().workloads_watched.set(count);
    }

    pub fn set_loop_running(&self, running: bool) {
        self.inner().loop_running.set(i64::from(running));
    }
}

/// Emits the scaler's named lifecycle and audit events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, policy: &str, dry_run: bool) {
        info!(
            event = "scaler_started",
            instance = %self.instance,
            version = %version,
            policy = %policy,
            dry_run = dry_run,
            "Resource scaler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scaler_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Resource scaler shutting down"
        );
    }

    pub fn log_decision(&self, decision: &Decision) {
        info!(
            event = "decision_recorded",
            instance = %self.instance,
            workload = %decision.workload,
            policy = %decision.policy,
            cpu_action = %decision.cpu_action,
            memory_action = %decision.memory_action,
            cpu_confidence = decision.confidence.cpu,
            memory_confidence = decision.confidence.memory,
            proposed_cpu_cores = decision.proposed_changes.cpu.proposed,
            proposed_memory_mb = decision.proposed_changes.memory.proposed,
            eligible = decision.eligible_to_apply,
            "Scaling decision recorded"
        );
    }

    pub fn log_mutation(&self, result: &MutationResult) {
        if result.success {
            info!(
                event = "mutation_applied",
                instance = %self.instance,
                workload = %result.workload,
                method = result.method.as_str(),
                warning = ?result.details.warning,
                message = %result.message,
                "Resource change applied"
            );
        } else {
            warn!(
                event = "mutation_failed",
                instance = %self.instance,
                workload = %result.workload,
                method = result.method.as_str(),
                error_kind = ?result.details.error_kind,
                message = %result.message,
                "Resource change failed"
            );
        }
    }

    pub fn log_config_updated(&self, config: &ScalerConfig) {
        info!(
            event = "config_updated",
            instance = %self.instance,
            enabled = config.enabled,
            dry_run = config.dry_run,
            interval_secs = config.interval_secs,
            scale_factor = config.scale_factor,
            cooldown_minutes = config.cooldown_minutes,
            namespaces = ?config.namespaces,
            "Scaler configuration updated"
        );
    }

    pub fn log_cycle(&self, workloads: usize, applied: usize, failed: usize, elapsed_ms: u128) {
        info!(
            event = "cycle_completed",
            instance = %self.instance,
            workloads = workloads,
            applied = applied,
            failed = failed,
            elapsed_ms = elapsed_ms as u64,
            "Scaling cycle completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle_is_shared() {
        let a = ScalerMetrics::new();
        let b = a.clone();
        a.observe_cycle_latency(0.5);
        b.observe_policy_latency(0.001);
        a.record_outcome("dry_run");
        b.inc_policy_failures();
        a.inc_control_plane_errors("timeout");
        b.set_workloads_watched(3);
        a.set_loop_running(true);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "resource_scaler_outcomes_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("scaler-0");
        assert_eq!(logger.instance, "scaler-0");
    }
}
