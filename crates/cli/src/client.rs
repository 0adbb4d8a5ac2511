//! API client for communicating with the scaler's HTTP API

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// Non-success reply from the API
#[derive(Debug, Error)]
#[error("API error ({status}): {message}")]
pub struct ApiError {
    pub status: u16,
    pub kind: Option<String>,
    pub message: String,
}

/// API client for the scaler
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        // Long enough for a full cycle with verification
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(self.url(path)?)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body).into());
        }
        response.json().await.context("Failed to parse response")
    }
}

fn api_error(status: u16, body: &str) -> ApiError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) => ApiError {
            status,
            kind: Some(err.kind),
            message: err.error,
        },
        Err(_) => ApiError {
            status,
            kind: None,
            message: body.to_string(),
        },
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopStatus {
    pub enabled: bool,
    pub running: bool,
    pub interval_secs: u64,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub dry_run: bool,
    pub scale_factor: f64,
    pub min_cpu_cores: f64,
    pub max_cpu_cores: f64,
    pub min_memory_mb: f64,
    pub max_memory_mb: f64,
    pub cooldown_minutes: f64,
    pub namespaces: Vec<String>,
    pub excluded_names: Vec<String>,
    pub excluded_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_minutes: Option<f64>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none()
            && self.interval_secs.is_none()
            && self.dry_run.is_none()
            && self.scale_factor.is_none()
            && self.cooldown_minutes.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourcePair {
    pub cpu: f64,
    pub memory: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceChange {
    pub action: String,
    pub current: f64,
    pub proposed: f64,
    pub change_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedChanges {
    pub cpu: ResourceChange,
    pub memory: ResourceChange,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActionValues {
    pub decrease: f64,
    pub maintain: f64,
    pub increase: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActionScores {
    pub q_values: ActionValues,
    pub probabilities: ActionValues,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolicyScores {
    pub cpu: ActionScores,
    pub memory: ActionScores,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub workload: WorkloadRef,
    pub timestamp: String,
    pub cpu_action: String,
    pub memory_action: String,
    pub confidence: ResourcePair,
    pub proposed_changes: ProposedChanges,
    pub eligible_to_apply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<PolicyScores>,
    pub policy: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationDetails {
    #[serde(default)]
    pub states: Vec<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResult {
    pub timestamp: String,
    pub success: bool,
    pub method: String,
    pub details: MutationDetails,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingOutcome {
    pub workload: WorkloadRef,
    pub status: String,
    pub decision: Decision,
    #[serde(default)]
    pub mutation: Option<MutationResult>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadFailure {
    pub workload: WorkloadRef,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub workloads: usize,
    pub skipped: usize,
    pub outcomes: Vec<ScalingOutcome>,
    pub failures: Vec<WorkloadFailure>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalingStats {
    pub workloads_tracked: usize,
    pub total_decisions: u64,
    pub outcomes: BTreeMap<String, u64>,
    pub mutations_by_method: BTreeMap<String, u64>,
    pub mutations_succeeded: u64,
    pub mutations_failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleAllResponse {
    pub report: CycleReport,
    pub statistics: ScalingStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSample {
    pub timestamp: String,
    pub cpu_cores: f64,
    pub memory_mb: f64,
    pub cpu_limit_cores: f64,
    pub memory_limit_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadHistory {
    pub workload: WorkloadRef,
    pub samples: Vec<ResourceSample>,
    pub decisions: Vec<Decision>,
    pub mutations: Vec<MutationResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerResources {
    pub name: String,
    pub ready: bool,
    pub cpu_request_cores: Option<f64>,
    pub cpu_limit_cores: Option<f64>,
    pub memory_request_mb: Option<f64>,
    pub memory_limit_mb: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub phase: String,
    pub containers: Vec<ContainerResources>,
    pub resize_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadDetail {
    pub workload: WorkloadRef,
    pub usage: Option<ResourceSample>,
    pub spec: WorkloadSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResizeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub name: String,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub actions: Vec<String>,
    pub features: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
}
