//! Shared runtime configuration
//!
//! The loop, the engine and the API all read the same [`ConfigStore`].
//! Readers take a full snapshot so one operation never mixes fields from
//! two different updates.

use crate::error::{Result, ScalerError};
use crate::models::WorkloadRef;
use crate::observability::StructuredLogger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// Default sample history window per workload
pub const DEFAULT_SAMPLE_WINDOW: usize = 5;

/// Default decision history capacity per workload
pub const DEFAULT_DECISION_HISTORY: usize = 50;

/// Longest accepted cycle interval (one day)
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Longest accepted cooldown (one week)
pub const MAX_COOLDOWN_MINUTES: f64 = 10_080.0;

/// Runtime scaling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
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
    pub sample_window: usize,
    pub decision_history: usize,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            dry_run: true,
            scale_factor: 0.2,
            min_cpu_cores: 0.1,
            max_cpu_cores: 8.0,
            min_memory_mb: 20.0,
            max_memory_mb: 16384.0,
            cooldown_minutes: 5.0,
            namespaces: vec!["default".to_string()],
            excluded_names: [
                "redis",
                "dqn-scaler",
                "metrics-collector",
                "load-generator",
                "dqn-scaler-dashboard",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            excluded_labels: [("app", "redis"), ("component", "redis")]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            sample_window: DEFAULT_SAMPLE_WINDOW,
            decision_history: DEFAULT_DECISION_HISTORY,
        }
    }
}

impl ScalerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Cooldown window; out-of-range values saturate instead of panicking
    pub fn cooldown(&self) -> Duration {
        let secs = self.cooldown_minutes * 60.0;
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    pub fn clamp_cpu(&self, cores: f64) -> f64 {
        cores.max(self.min_cpu_cores).min(self.max_cpu_cores)
    }

    pub fn clamp_memory(&self, mb: f64) -> f64 {
        mb.max(self.min_memory_mb).min(self.max_memory_mb)
    }

    /// Whether a workload is excluded by name, controller name or label
    pub fn is_excluded(
        &self,
        workload: &WorkloadRef,
        controller: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        let name_match = self
            .excluded_names
            .iter()
            .any(|n| n == &workload.name || Some(n.as_str()) == controller);
        let label_match = self
            .excluded_labels
            .iter()
            .any(|(k, v)| labels.get(k) == Some(v));
        name_match || label_match
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 || self.interval_secs > MAX_INTERVAL_SECS {
            return Err(ScalerError::InvalidConfig(format!(
                "interval_secs {} must be in [1, {}]",
                self.interval_secs, MAX_INTERVAL_SECS
            )));
        }
        let bounds = [
            self.min_cpu_cores,
            self.max_cpu_cores,
            self.min_memory_mb,
            self.max_memory_mb,
        ];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(ScalerError::InvalidConfig(
                "resource bounds must be finite".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.scale_factor) {
            return Err(ScalerError::InvalidConfig(format!(
                "scale_factor {} must be in [0, 1)",
                self.scale_factor
            )));
        }
        if !(self.min_cpu_cores > 0.0) || self.min_cpu_cores > self.max_cpu_cores {
            return Err(ScalerError::InvalidConfig(format!(
                "cpu bounds [{}, {}] are invalid",
                self.min_cpu_cores, self.max_cpu_cores
            )));
        }
        if !(self.min_memory_mb > 0.0) || self.min_memory_mb > self.max_memory_mb {
            return Err(ScalerError::InvalidConfig(format!(
                "memory bounds [{}, {}] are invalid",
                self.min_memory_mb, self.max_memory_mb
            )));
        }
        if !(0.0..=MAX_COOLDOWN_MINUTES).contains(&self.cooldown_minutes) {
            return Err(ScalerError::InvalidConfig(format!(
                "cooldown_minutes {} must be in [0, {}]",
                self.cooldown_minutes, MAX_COOLDOWN_MINUTES
            )));
        }
        if self.sample_window < 2 || self.decision_history == 0 {
            return Err(ScalerError::InvalidConfig(
                "sample_window must be at least 2 and decision_history positive".into(),
            ));
        }
        Ok(())
    }
}

/// Partial configuration change; absent fields keep their value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
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
    pub min_cpu_cores: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cpu_cores: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_memory_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_labels: Option<BTreeMap<String, String>>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply_to(self, config: &mut ScalerConfig) {
        macro_rules! merge {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field { config.$field = v; })*
            };
        }
        merge!(
            enabled,
            interval_secs,
            dry_run,
            scale_factor,
            min_cpu_cores,
            max_cpu_cores,
            min_memory_mb,
            max_memory_mb,
            cooldown_minutes,
            namespaces,
            excluded_names,
            excluded_labels
        );
    }
}

/// Process-wide configuration guarded by a single lock
#[derive(Debug, Clone)]
pub struct ConfigStore {
    inner: Arc<RwLock<ScalerConfig>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(ScalerConfig::default())
    }
}

impl ConfigStore {
    pub fn new(config: ScalerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            changes: Arc::new(watch::channel(0).0),
        }
    }

    /// Notified after every accepted update; the value counts updates
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Consistent copy of every field
    pub async fn snapshot(&self) -> ScalerConfig {
        self.inner.read().await.clone()
    }

    /// Merge an update, validate the result and swap it in
    ///
    /// The stored config is untouched when validation fails.
    pub async fn update(&self, update: ConfigUpdate) -> Result<ScalerConfig> {
        let mut guard = self.inner.write().await;
        let mut next = guard.clone();
        update.apply_to(&mut next);
        next.validate()?;
        *guard = next.clone();
        self.changes.send_modify(|version| *version += 1);
        StructuredLogger::new("config").log_config_updated(&next);
        Ok(next)
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<ScalerConfig> {
        self.update(ConfigUpdate {
            enabled: Some(enabled),
            ..Default::default()
        })
        .await
    }
}
