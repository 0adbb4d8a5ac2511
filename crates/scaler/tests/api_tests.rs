//! Integration tests for the scaler API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use resource_scaler::api::{create_router, AppState};
use scaler_lib::{
    cluster::WorkloadInfo,
    executor::ExecutorConfig,
    health::components,
    testing::{
        running_spec, FakeControlPlane, InPlaceBehavior, ScriptedPolicy, StaticMetricsSource,
    },
    AutoScaler, ConfigStore, DecisionEngine, EngineParts, HealthRegistry, ResourceSample,
    ScalerConfig, ScalingAction, WorkloadRef,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    control_plane: Arc<FakeControlPlane>,
    metrics: Arc<StaticMetricsSource>,
}

async fn setup_test_app() -> TestApp {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let control_plane = Arc::new(FakeControlPlane::new());
    let metrics = Arc::new(StaticMetricsSource::new());
    let config = ScalerConfig::default();

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
        health: health_registry.clone(),
    });
    let scaler = Arc::new(AutoScaler::new(
        Arc::new(engine),
        control_plane.clone(),
        ConfigStore::new(config),
        health_registry,
    ));

    let state = Arc::new(AppState::new(scaler));
    TestApp {
        router: create_router(state.clone()),
        state,
        control_plane,
        metrics,
    }
}

impl TestApp {
    fn add_workload(&self, name: &str, labels: &[(&str, &str)]) -> WorkloadRef {
        let workload = WorkloadRef::new("default", name);
        self.control_plane.add_workload(
            WorkloadInfo {
                workload: workload.clone(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
                controller: None,
            },
            running_spec(1.0, 1024.0),
        );
        self.metrics
            .set(&workload, ResourceSample::new(0.9, 512.0, 1.0, 1024.0));
        workload
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send("GET", uri, None).await
    }

    async fn post(&self, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send("POST", uri, body).await
    }
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app().await;

    let (status, health) = app.get("/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["components"][components::SCALER_LOOP].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_degraded(components::POLICY, "Policy timed out")
        .await;

    let (status, health) = app.get("/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_unhealthy(components::CONTROL_PLANE, "API server unreachable")
        .await;

    let (status, health) = app.get("/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_tracks_initialization() {
    let app = setup_test_app().await;

    let (status, readiness) = app.get("/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    app.state.health_registry.set_ready(true).await;
    let (status, readiness) = app.get("/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_scaler_metrics() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("resource_scaler_"));
}

#[tokio::test]
async fn test_config_round_trip_through_api() {
    let app = setup_test_app().await;

    let (status, config) = app.get("/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(config["dry_run"], true);
    assert_eq!(config["interval_secs"], 30);

    let (status, config) = app
        .post("/config", Some(json!({"dry_run": false, "cooldown_minutes": 1.5})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(config["dry_run"], false);
    assert_eq!(config["cooldown_minutes"], 1.5);

    let (_, config) = app.get("/config").await;
    assert_eq!(config["dry_run"], false);
}

#[tokio::test]
async fn test_enabling_through_config_starts_loop() {
    let app = setup_test_app().await;
    app.add_workload("api-1", &[]);

    let (_, body) = app.post("/autoscale/stop", None).await;
    assert_eq!(body["running"], false);

    let (status, config) = app.post("/config", Some(json!({"enabled": true}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(config["enabled"], true);

    let (_, body) = app.get("/autoscale/status").await;
    assert_eq!(body["running"], true);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (_, stats) = app.get("/statistics").await;
    assert_eq!(stats["total_decisions"], 1);

    app.post("/autoscale/stop", None).await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let app = setup_test_app().await;

    let (status, body) = app
        .post("/config", Some(json!({"min_cpu_cores": 4.0, "max_cpu_cores": 2.0})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_config");

    // The stored config is unchanged
    let (_, config) = app.get("/config").await;
    assert_eq!(config["max_cpu_cores"], 8.0);
}

#[tokio::test]
async fn test_unknown_config_field_is_rejected() {
    let app = setup_test_app().await;
    let (status, _) = app.post("/config", Some(json!({"replicas": 3}))).await;
    assert!(status.is_client_error());

    let config = tokio_test::assert_ok!(app.state.scaler.config().update(Default::default()).await);
    assert_eq!(config, ScalerConfig::default());
}

#[tokio::test]
async fn test_workloads_listing_applies_exclusions() {
    let app = setup_test_app().await;
    app.add_workload("api-1", &[]);
    app.add_workload("redis", &[]);
    app.add_workload("cache-0", &[("component", "redis")]);

    let (status, workloads) = app.get("/workloads").await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = workloads
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["workload"]["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["api-1"]);
}

#[tokio::test]
async fn test_scale_single_workload() {
    let app = setup_test_app().await;
    app.add_workload("api-1", &[]);

    let (status, outcome) = app.post("/scale/default/api-1", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "dry_run");
    assert_eq!(outcome["decision"]["cpu_action"], "INCREASE");
    assert_eq!(app.control_plane.mutation_calls(), 0);
}

#[tokio::test]
async fn test_scale_without_metrics_is_404() {
    let app = setup_test_app().await;

    let (status, body) = app.post("/scale/default/ghost", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("default/ghost"));
}

#[tokio::test]
async fn test_scale_all_applies_when_not_dry_run() {
    let app = setup_test_app().await;
    app.add_workload("api-1", &[]);
    app.add_workload("worker-1", &[]);
    app.post("/config", Some(json!({"dry_run": false}))).await;

    let (status, body) = app.post("/scale/all", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report"]["workloads"], 2);
    assert_eq!(body["report"]["outcomes"].as_array().unwrap().len(), 2);
    assert_eq!(body["statistics"]["total_decisions"], 2);
    assert_eq!(body["statistics"]["outcomes"]["applied"], 2);
    assert_eq!(app.control_plane.in_place_calls(), 2);
}

#[tokio::test]
async fn test_decisions_and_history() {
    let app = setup_test_app().await;
    app.add_workload("api-1", &[]);
    app.add_workload("worker-1", &[]);
    app.post("/scale/all", None).await;

    let (status, decisions) = app.get("/decisions?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decisions.as_array().unwrap().len(), 1);

    let (status, history) = app.get("/workloads/default/api-1/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["samples"].as_array().unwrap().len(), 1);
    assert_eq!(history["decisions"].as_array().unwrap().len(), 1);
    assert!(history["mutations"].as_array().unwrap().is_empty());

    let (status, _) = app.get("/workloads/default/ghost/history").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, stats) = app.get("/statistics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["outcomes"]["dry_run"], 2);
}

#[tokio::test]
async fn test_autoscale_start_and_stop() {
    let app = setup_test_app().await;

    let (status, body) = app.post("/autoscale/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);
    assert_eq!(body["running"], false);

    let (status, body) = app.post("/autoscale/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], true);
    assert_eq!(body["running"], true);

    let (_, body) = app.get("/autoscale/status").await;
    assert_eq!(body["running"], true);
    assert_eq!(body["interval_secs"], 30);

    let (_, body) = app.post("/autoscale/stop", None).await;
    assert_eq!(body["running"], false);
}

#[tokio::test]
async fn test_pod_detail_reports_usage_and_spec() {
    let app = setup_test_app().await;
    app.add_workload("api-1", &[]);

    let (status, body) = app.get("/pods/default/api-1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workload"]["name"], "api-1");
    assert_eq!(body["usage"]["cpu_cores"], 0.9);
    assert_eq!(body["spec"]["phase"], "Running");
    assert_eq!(body["spec"]["containers"][0]["cpu_limit_cores"], 1.0);

    let (status, body) = app.get("/pods/default/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "workload_not_found");
}

#[tokio::test]
async fn test_manual_resize_applies_explicit_limits() {
    let app = setup_test_app().await;
    let workload = app.add_workload("api-1", &[]);

    let (status, body) = app
        .post(
            "/api/namespaces/default/pods/api-1/resize",
            Some(json!({"cpu": "2", "memory": "2Gi"})),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["method"], "in_place");
    let spec = app.control_plane.spec(&workload).unwrap();
    assert_eq!(spec.containers[0].cpu_limit_cores, Some(2.0));
    assert_eq!(spec.containers[0].memory_limit_mb, Some(2048.0));

    let (_, history) = app.get("/workloads/default/api-1/history").await;
    assert_eq!(history["mutations"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_resize_errors() {
    let app = setup_test_app().await;
    app.add_workload("api-1", &[]);
    let uri = "/api/namespaces/default/pods/api-1/resize";

    let (status, body) = app.post(uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");

    let (status, _) = app.post(uri, Some(json!({"replicas": 3}))).await;
    assert!(status.is_client_error());

    let (status, body) = app
        .post(
            "/api/namespaces/default/pods/ghost/resize",
            Some(json!({"cpu": "500m"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "workload_not_found");

    app.control_plane
        .set_in_place_behavior(InPlaceBehavior::Infeasible("node too small".into()));
    let (status, body) = app.post(uri, Some(json!({"memory": "8Gi"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["details"]["error_kind"], "mutation_infeasible");
}

#[tokio::test]
async fn test_model_info_describes_policy() {
    let app = setup_test_app().await;

    let (status, body) = app.get("/model/info").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "scripted");
    assert_eq!(body["input_shape"], json!([1, 8]));
    assert_eq!(body["actions"], json!(["DECREASE", "MAINTAIN", "INCREASE"]));
    assert_eq!(body["features"][0], "cpu_usage");
    assert!(body.get("sha256").is_none());
}
