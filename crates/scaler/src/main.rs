//! Resource Scaler - per-workload CPU and memory autoscaler
//!
//! Runs the scaling loop against the cluster and serves the control,
//! health and metrics API.

use anyhow::{Context, Result};
use resource_scaler::{api, config::ProcessConfig};
use scaler_lib::{
    cluster::{KubeControlPlane, KubeMetricsSource},
    executor::ExecutorConfig,
    health::components,
    policy::{DecisionPolicy, OnnxPolicy, ThresholdPolicy},
    AutoScaler, ConfigStore, DecisionEngine, EngineParts, HealthRegistry, ScalerMetrics,
    StructuredLogger,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

fn load_policy(config: &ProcessConfig) -> Result<Arc<dyn DecisionPolicy>> {
    match &config.model_path {
        Some(path) => {
            let policy = OnnxPolicy::from_file(path, config.model_sha256.as_deref())
                .with_context(|| format!("failed to load policy model {}", path.display()))?;
            Ok(Arc::new(policy))
        }
        None => {
            info!("No model configured, using threshold policy");
            Ok(Arc::new(ThresholdPolicy::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting resource-scaler");

    let config = ProcessConfig::load()?;
    info!(
        api_port = config.api_port,
        namespaces = ?config.scaling.namespaces,
        dry_run = config.scaling.dry_run,
        "Scaler configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = ScalerMetrics::new();
    metrics.set_loop_running(false);

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let control_plane = Arc::new(KubeControlPlane::new(client.clone()));
    let metrics_source = Arc::new(KubeMetricsSource::new(client));

    let policy = load_policy(&config)?;
    let logger = StructuredLogger::new("resource-scaler");
    logger.log_startup(SCALER_VERSION, policy.name(), config.scaling.dry_run);

    let engine = DecisionEngine::new(EngineParts {
        policy,
        control_plane: control_plane.clone(),
        metrics_source,
        executor_config: ExecutorConfig::default(),
        sample_window: config.scaling.sample_window,
        decision_history: config.scaling.decision_history,
        health: health_registry.clone(),
    });

    let scaler = Arc::new(AutoScaler::new(
        Arc::new(engine),
        control_plane,
        ConfigStore::new(config.scaling.clone()),
        health_registry.clone(),
    ));

    // Always running; cycles are skipped while `enabled` is false
    scaler.start().await;
    health_registry.set_healthy(components::SCALER_LOOP).await;
    health_registry.set_ready(true).await;

    let app_state = Arc::new(api::AppState::new(scaler.clone()));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
    };
    api::serve(config.api_port, app_state, shutdown).await?;

    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    scaler.stop().await;
    info!("Shutdown complete");

    Ok(())
}
