//! Background autoscaling loop
//!
//! STOPPED -> RUNNING -> STOPPED. Each cycle takes one config snapshot,
//! enumerates the watched namespaces minus exclusions and evaluates the
//! workloads one after another, each on its own task so a panic fails only
//! that workload. Stop requests are honoured between workloads and between
//! cycles, never in the middle of a mutation. While disabled the loop stays
//! alive and wakes on the next config change.

use crate::cluster::{ControlPlane, WorkloadInfo};
use crate::config::{ConfigStore, ScalerConfig};
use crate::engine::DecisionEngine;
use crate::error::{Result, ScalerError};
use crate::health::{components, HealthRegistry};
use crate::models::{OutcomeStatus, ScalingOutcome, WorkloadRef};
use crate::observability::{ScalerMetrics, StructuredLogger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a failed cycle
pub const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// A workload whose evaluation failed during a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadFailure {
    pub workload: WorkloadRef,
    pub kind: String,
    pub message: String,
}

/// Summary of one pass over every watched workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub workloads: usize,
    /// Workloads without a usage sample this cycle
    pub skipped: usize,
    pub outcomes: Vec<ScalingOutcome>,
    pub failures: Vec<WorkloadFailure>,
    /// Set when a stop request ended the cycle early
    pub interrupted: bool,
    pub elapsed_ms: u64,
}

impl CycleReport {
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopStatus {
    pub enabled: bool,
    pub running: bool,
    pub interval_secs: u64,
    pub dry_run: bool,
}

struct LoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct AutoScaler {
    engine: Arc<DecisionEngine>,
    control_plane: Arc<dyn ControlPlane>,
    config: ConfigStore,
    health: HealthRegistry,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
    /// Serializes start and stop
    transition: Mutex<()>,
    lifecycle: Mutex<Option<LoopHandle>>,
    error_backoff: Duration,
}

impl AutoScaler {
    pub fn new(
        engine: Arc<DecisionEngine>,
        control_plane: Arc<dyn ControlPlane>,
        config: ConfigStore,
        health: HealthRegistry,
    ) -> Self {
        Self {
            engine,
            control_plane,
            config,
            health,
            metrics: ScalerMetrics::new(),
            logger: StructuredLogger::new("autoscaler"),
            transition: Mutex::new(()),
            lifecycle: Mutex::new(None),
            error_backoff: ERROR_BACKOFF,
        }
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Spawn the loop; returns false when it is already running
    pub async fn start(self: &Arc<Self>) -> bool {
        let _transition = self.transition.lock().await;
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(handle) = lifecycle.as_ref() {
            if !handle.task.is_finished() {
                info!("Autoscaler already running");
                return false;
            }
        }

        let (shutdown, rx) = watch::channel(false);
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run(rx).await });
        *lifecycle = Some(LoopHandle { shutdown, task });

        self.metrics.set_loop_running(true);
        info!("Autoscaler started");
        true
    }

    /// Ask the loop to exit and wait for the current cycle to finish
    ///
    /// Status queries do not wait on the cycle; they report the loop as
    /// stopped as soon as the stop request is taken.
    pub async fn stop(&self) -> bool {
        let _transition = self.transition.lock().await;
        let Some(handle) = self.lifecycle.lock().await.take() else {
            info!("Autoscaler not running");
            return false;
        };

        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.task.await {
            warn!(error = %e, "Autoscaler task ended abnormally");
        }
        self.metrics.set_loop_running(false);
        info!("Autoscaler stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle
            .lock()
            .await
            .as_ref()
            .map(|h| !h.task.is_finished())
            .unwrap_or(false)
    }

    pub async fn status(&self) -> LoopStatus {
        let config = self.config.snapshot().await;
        LoopStatus {
            enabled: config.enabled,
            running: self.is_running().await,
            interval_secs: config.interval_secs,
            dry_run: config.dry_run,
        }
    }

    /// Watched workloads after exclusions
    pub async fn list_workloads(&self, config: &ScalerConfig) -> Result<Vec<WorkloadInfo>> {
        let mut workloads = Vec::new();
        for namespace in &config.namespaces {
            let listed = match self.control_plane.list_workloads(namespace).await {
                Ok(listed) => listed,
                Err(e) => {
                    self.metrics.inc_control_plane_errors(e.kind());
                    self.health
                        .set_degraded(components::CONTROL_PLANE, e.to_string())
                        .await;
                    return Err(e);
                }
            };
            workloads.extend(listed.into_iter().filter(|w| {
                let excluded = config.is_excluded(&w.workload, w.controller.as_deref(), &w.labels);
                if excluded {
                    debug!(workload = %w.workload, "Workload excluded");
                }
                !excluded
            }));
        }
        self.health.set_healthy(components::CONTROL_PLANE).await;
        Ok(workloads)
    }

    /// Evaluate one workload now with the current configuration
    pub async fn evaluate_workload(
        &self,
        workload: &WorkloadRef,
    ) -> Result<Option<ScalingOutcome>> {
        let config = self.config.snapshot().await;
        self.evaluate_isolated(workload, &config).await
    }

    /// Run one evaluation on its own task; a panic becomes an error
    async fn evaluate_isolated(
        &self,
        workload: &WorkloadRef,
        config: &ScalerConfig,
    ) -> Result<Option<ScalingOutcome>> {
        let engine = Arc::clone(&self.engine);
        let target = workload.clone();
        let config = config.clone();
        let task = tokio::spawn(async move { engine.evaluate(&target, &config).await });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(workload = %workload, error = %e, "Workload evaluation panicked");
                Err(ScalerError::EvaluationPanicked(e.to_string()))
            }
        }
    }

    /// One full pass now, regardless of the enabled flag
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let config = self.config.snapshot().await;
        self.cycle(&config, None).await
    }

    async fn cycle(
        &self,
        config: &ScalerConfig,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<CycleReport> {
        let started = Instant::now();
        let started_at = Utc::now();
        let workloads = self.list_workloads(config).await?;
        self.metrics.set_workloads_watched(workloads.len() as i64);

        let mut report = CycleReport {
            started_at,
            workloads: workloads.len(),
            skipped: 0,
            outcomes: Vec::new(),
            failures: Vec::new(),
            interrupted: false,
            elapsed_ms: 0,
        };

        for info in &workloads {
            if shutdown.map(|rx| *rx.borrow()).unwrap_or(false) {
                info!("Stop requested, ending cycle early");
                report.interrupted = true;
                break;
            }
            match self.evaluate_isolated(&info.workload, config).await {
                Ok(Some(outcome)) => report.outcomes.push(outcome),
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(workload = %info.workload, error = %e, "Workload evaluation failed");
                    report.failures.push(WorkloadFailure {
                        workload: info.workload.clone(),
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let live: HashSet<WorkloadRef> = workloads.into_iter().map(|w| w.workload).collect();
        self.engine.forget_missing(&live).await;

        let elapsed = started.elapsed();
        report.elapsed_ms = elapsed.as_millis() as u64;
        self.metrics.observe_cycle_latency(elapsed.as_secs_f64());
        self.logger.log_cycle(
            report.workloads,
            report.count(OutcomeStatus::Applied),
            report.count(OutcomeStatus::Failed) + report.failures.len(),
            elapsed.as_millis(),
        );
        Ok(report)
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Autoscaler loop running");
        let mut changes = self.config.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }

            changes.borrow_and_update();
            let config = self.config.snapshot().await;
            let wait = if !config.enabled {
                debug!("Autoscaling disabled, skipping cycle");
                config.interval()
            } else {
                match self.cycle(&config, Some(&shutdown)).await {
                    Ok(_) => {
                        self.health.set_healthy(components::SCALER_LOOP).await;
                        config.interval()
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            backoff_secs = self.error_backoff.as_secs(),
                            "Scaling cycle failed"
                        );
                        self.health
                            .set_degraded(components::SCALER_LOOP, e.to_string())
                            .await;
                        self.error_backoff
                    }
                }
            };

            // A disabled loop re-checks as soon as the config changes
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {}
                Ok(()) = changes.changed(), if !config.enabled => {}
            }
        }
        info!("Autoscaler loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigUpdate;
    use crate::engine::EngineParts;
    use crate::error::ScalerError;
    use crate::executor::ExecutorConfig;
    use crate::models::{ResourceSample, ScalingAction};
    use crate::testing::{
        running_spec, ControlPlaneCall, FakeControlPlane, ScriptedPolicy, StaticMetricsSource,
    };
    use std::collections::BTreeMap;

    struct Fixture {
        scaler: Arc<AutoScaler>,
        control_plane: Arc<FakeControlPlane>,
        metrics: Arc<StaticMetricsSource>,
        health: HealthRegistry,
    }

    fn fixture(config: ScalerConfig) -> Fixture {
        let control_plane = Arc::new(FakeControlPlane::new());
        let metrics = Arc::new(StaticMetricsSource::new());
        let health = HealthRegistry::new();
        let engine = DecisionEngine::new(EngineParts {
            policy: Arc::new(ScriptedPolicy::always(
                ScalingAction::Increase,
                ScalingAction::Maintain,
            )),
            control_plane: control_plane.clone(),
            metrics_source: metrics.clone(),
            executor_config: ExecutorConfig {
                verify_timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(10),
                call_timeout: Duration::from_millis(500),
            },
            sample_window: config.sample_window,
            decision_history: config.decision_history,
            health: health.clone(),
        });
        let scaler = AutoScaler::new(
            Arc::new(engine),
            control_plane.clone(),
            ConfigStore::new(config),
            health.clone(),
        )
        .with_error_backoff(Duration::from_millis(20));

        Fixture {
            scaler: Arc::new(scaler),
            control_plane,
            metrics,
            health,
        }
    }

    fn add(
        f: &Fixture,
        name: &str,
        controller: Option<&str>,
        labels: &[(&str, &str)],
    ) -> WorkloadRef {
        let workload = WorkloadRef::new("default", name);
        f.control_plane.add_workload(
            WorkloadInfo {
                workload: workload.clone(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
                controller: controller.map(str::to_string),
            },
            running_spec(1.0, 1024.0),
        );
        f.metrics
            .set(&workload, ResourceSample::new(0.9, 512.0, 1.0, 1024.0));
        workload
    }

    impl Fixture {
        async fn engine_applied(&self, workload: &WorkloadRef) -> bool {
            self.scaler
                .engine()
                .cooldown()
                .last_applied(workload)
                .await
                .is_some()
        }
    }

    fn list_calls(f: &Fixture) -> usize {
        f.control_plane
            .calls()
            .iter()
            .filter(|c| matches!(c, ControlPlaneCall::ListWorkloads(_)))
            .count()
    }

    #[tokio::test]
    async fn test_cycle_respects_exclusions() {
        let f = fixture(ScalerConfig::default());
        let api = add(&f, "api-1", Some("api"), &[]);
        add(&f, "redis", None, &[]);
        add(&f, "cache-0", Some("cache"), &[("app", "redis")]);
        add(&f, "load-generator-5d8f-abc", Some("load-generator"), &[]);

        let report = f.scaler.run_cycle().await.unwrap();

        assert_eq!(report.workloads, 1);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].workload, api);
        assert_eq!(report.outcomes[0].status, OutcomeStatus::DryRun);
        assert_eq!(f.control_plane.mutation_calls(), 0);
    }

    #[tokio::test]
    async fn test_cycle_continues_past_missing_metrics() {
        let f = fixture(ScalerConfig {
            dry_run: false,
            ..Default::default()
        });
        let a = add(&f, "a", None, &[]);
        add(&f, "b", None, &[]);
        f.metrics.remove(&a);

        let report = f.scaler.run_cycle().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.count(OutcomeStatus::Applied), 1);
    }

    #[tokio::test]
    async fn test_workload_errors_are_collected() {
        let f = fixture(ScalerConfig::default());
        add(&f, "a", None, &[]);
        add(&f, "b", None, &[]);
        f.metrics
            .fail_with(Some(ScalerError::TransientControlPlane("metrics down".into())));

        let report = f.scaler.run_cycle().await.unwrap();

        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].kind, "transient_control_plane");
    }

    #[tokio::test]
    async fn test_listing_failure_fails_cycle() {
        let f = fixture(ScalerConfig::default());
        f.control_plane
            .fail_listing(Some(ScalerError::TransientControlPlane("apiserver down".into())));
        tokio_test::assert_err!(f.scaler.run_cycle().await);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let f = fixture(ScalerConfig::default());
        add(&f, "api-1", None, &[]);

        assert!(f.scaler.start().await);
        assert!(!f.scaler.start().await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(f.scaler.is_running().await);
        // Default interval is 30s, so one loop means exactly one listing
        assert_eq!(list_calls(&f), 1);

        assert!(f.scaler.stop().await);
        assert!(!f.scaler.is_running().await);
        assert!(!f.scaler.stop().await);
    }

    #[tokio::test]
    async fn test_stop_halts_cycles() {
        let f = fixture(ScalerConfig {
            interval_secs: 1,
            ..Default::default()
        });
        add(&f, "api-1", None, &[]);

        f.scaler.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.scaler.stop().await;
        let after_stop = list_calls(&f);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(list_calls(&f), after_stop);
    }

    #[tokio::test]
    async fn test_disabled_loop_skips_cycles() {
        let f = fixture(ScalerConfig {
            enabled: false,
            ..Default::default()
        });
        add(&f, "api-1", None, &[]);

        f.scaler.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(list_calls(&f), 0);
        assert!(f.scaler.status().await.running);
        f.scaler.stop().await;
    }

    #[tokio::test]
    async fn test_failed_cycle_degrades_and_retries() {
        let f = fixture(ScalerConfig::default());
        f.control_plane
            .fail_listing(Some(ScalerError::TransientControlPlane("apiserver down".into())));

        f.scaler.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            f.health.status_of(components::SCALER_LOOP).await,
            Some(crate::health::ComponentStatus::Degraded)
        );
        // 20ms backoff means several retries within 100ms
        assert!(list_calls(&f) > 1);

        f.control_plane.fail_listing(None);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            f.health.status_of(components::SCALER_LOOP).await,
            Some(crate::health::ComponentStatus::Healthy)
        );
        f.scaler.stop().await;
    }

    #[tokio::test]
    async fn test_status_reflects_config() {
        let f = fixture(ScalerConfig::default());
        f.scaler
            .config()
            .update(ConfigUpdate {
                interval_secs: Some(45),
                ..Default::default()
            })
            .await
            .unwrap();
        let status = f.scaler.status().await;
        assert_eq!(status.interval_secs, 45);
        assert!(!status.running);
        assert!(status.dry_run);
    }

    #[tokio::test]
    async fn test_panicking_workload_does_not_abort_cycle() {
        let f = fixture(ScalerConfig::default());
        let bad = add(&f, "a", None, &[]);
        let good = add(&f, "b", None, &[]);
        f.metrics.panic_on(&bad);

        let report = f.scaler.run_cycle().await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].workload, bad);
        assert_eq!(report.failures[0].kind, "evaluation_panicked");
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].workload, good);

        let err = tokio_test::assert_err!(f.scaler.evaluate_workload(&bad).await);
        assert_eq!(err.kind(), "evaluation_panicked");
    }

    #[tokio::test]
    async fn test_loop_survives_panicking_workload() {
        let f = fixture(ScalerConfig {
            interval_secs: 1,
            ..Default::default()
        });
        let bad = add(&f, "a", None, &[]);
        add(&f, "b", None, &[]);
        f.metrics.panic_on(&bad);

        f.scaler.start().await;
        tokio::time::sleep(Duration::from_millis(1300)).await;

        assert!(f.scaler.is_running().await);
        assert!(list_calls(&f) >= 2);
        f.scaler.stop().await;
    }

    #[tokio::test]
    async fn test_enabling_at_runtime_starts_cycles() {
        let f = fixture(ScalerConfig {
            enabled: false,
            ..Default::default()
        });
        add(&f, "api-1", None, &[]);

        f.scaler.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(list_calls(&f), 0);

        // Default interval is 30s; the config change wakes the loop
        f.scaler.config().set_enabled(true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(list_calls(&f), 1);
        assert_eq!(f.scaler.engine().history().stats().await.total_decisions, 1);
        f.scaler.stop().await;
    }

    #[tokio::test]
    async fn test_status_does_not_wait_for_stopping_cycle() {
        let f = fixture(ScalerConfig {
            dry_run: false,
            ..Default::default()
        });
        add(&f, "api-1", None, &[]);
        f.control_plane.set_patch_delay(Duration::from_millis(400));

        f.scaler.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.control_plane.in_place_calls(), 1);

        let scaler = Arc::clone(&f.scaler);
        let stopping = tokio::spawn(async move { scaler.stop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let status = tokio::time::timeout(Duration::from_millis(100), f.scaler.status()).await;
        let status = tokio_test::assert_ok!(status);
        assert!(!status.running);
        assert!(!stopping.is_finished());

        assert!(stopping.await.unwrap());
        // The in-flight mutation was allowed to finish
        assert!(f.engine_applied(&WorkloadRef::new("default", "api-1")).await);
    }

    #[tokio::test]
    async fn test_cycle_forgets_departed_workloads() {
        let f = fixture(ScalerConfig::default());
        let kept = add(&f, "api-1", None, &[]);
        let gone = add(&f, "api-2", None, &[]);

        f.scaler.run_cycle().await.unwrap();
        assert_eq!(f.scaler.engine().history().workloads().await.len(), 2);

        f.control_plane.remove_workload(&gone);
        f.scaler.run_cycle().await.unwrap();

        assert_eq!(f.scaler.engine().history().workloads().await, vec![kept]);
        assert!(f.scaler.engine().history().decisions(&gone).await.is_empty());
    }
}
