//! Usage from the Kubernetes metrics API
//!
//! Reads `metrics.k8s.io/v1beta1` pod metrics and the pod's declared
//! limits. Both come from the primary (first declared) container, the
//! same container the control plane resizes.

use super::quantity::{parse_cpu, parse_memory};
use super::MetricsSource;
use crate::error::{Result, ScalerError};
use crate::models::{ResourceSample, WorkloadRef};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Pod};
use kube::api::Api;
use kube::Client;
use serde_json::Value;
use tracing::debug;

/// Limit assumed for a pod that declares no CPU limit
pub const DEFAULT_CPU_LIMIT_CORES: f64 = 1.0;

/// Limit assumed for a pod that declares no memory limit
pub const DEFAULT_MEMORY_LIMIT_MB: f64 = 1024.0;

#[derive(Clone)]
pub struct KubeMetricsSource {
    client: Client,
}

impl KubeMetricsSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn pod_metrics(&self, workload: &WorkloadRef) -> Result<Option<Value>> {
        let url = format!(
            "/apis/metrics.k8s.io/v1beta1/namespaces/{}/pods/{}",
            workload.namespace, workload.name
        );
        let request = http::Request::get(&url)
            .body(Vec::new())
            .map_err(|e| ScalerError::TransientControlPlane(e.to_string()))?;

        match self.client.request_text(request).await {
            Ok(body) => serde_json::from_str(&body).map(Some).map_err(|e| {
                ScalerError::TransientControlPlane(format!("bad metrics body: {}", e))
            }),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!(workload = %workload, "No pod metrics available");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl MetricsSource for KubeMetricsSource {
    async fn get_usage(&self, workload: &WorkloadRef) -> Result<Option<ResourceSample>> {
        let Some(metrics) = self.pod_metrics(workload).await? else {
            return Ok(None);
        };
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &workload.namespace);
        let pod = pods.get(&workload.name).await?;
        let primary = primary_container(&pod);

        let usage = container_usage(&metrics, primary.map(|c| c.name.as_str()));
        let Some((cpu_cores, memory_mb)) = usage else {
            debug!(workload = %workload, "Pod metrics carry no container usage");
            return Ok(None);
        };
        let (cpu_limit_cores, memory_limit_mb) = declared_limits(primary);

        Ok(Some(ResourceSample::new(
            cpu_cores,
            memory_mb,
            cpu_limit_cores,
            memory_limit_mb,
        )))
    }
}

fn primary_container(pod: &Pod) -> Option<&Container> {
    pod.spec.as_ref()?.containers.first()
}

/// CPU cores and memory MB of the named container in a PodMetrics object,
/// or of its first entry when the name is unknown or absent
fn container_usage(metrics: &Value, name: Option<&str>) -> Option<(f64, f64)> {
    let containers = metrics.get("containers")?.as_array()?;
    let container = name
        .and_then(|n| {
            containers
                .iter()
                .find(|c| c.get("name").and_then(Value::as_str) == Some(n))
        })
        .or_else(|| containers.first())?;

    let usage = |key: &str, parse: fn(&str) -> Option<f64>| {
        container
            .get("usage")
            .and_then(|u| u.get(key))
            .and_then(Value::as_str)
            .and_then(parse)
            .unwrap_or(0.0)
    };
    Some((usage("cpu", parse_cpu), usage("memory", parse_memory)))
}

/// Declared limits of the container, with defaults when none are declared
fn declared_limits(container: Option<&Container>) -> (f64, f64) {
    let limits = container
        .and_then(|c| c.resources.as_ref())
        .and_then(|r| r.limits.as_ref());
    let limit = |key: &str, parse: fn(&str) -> Option<f64>| {
        limits
            .and_then(|l| l.get(key))
            .and_then(|q| parse(&q.0))
            .filter(|v| *v > 0.0)
    };

    (
        limit("cpu", parse_cpu).unwrap_or(DEFAULT_CPU_LIMIT_CORES),
        limit("memory", parse_memory).unwrap_or(DEFAULT_MEMORY_LIMIT_MB),
    )
}
