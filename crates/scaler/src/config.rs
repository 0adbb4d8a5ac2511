//! Process configuration

use anyhow::{Context, Result};
use scaler_lib::ScalerConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// Process configuration, read from `SCALER_*` environment variables
///
/// Nested scaling fields use a double underscore, e.g.
/// `SCALER_SCALING__DRY_RUN=false`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    /// API server port for control, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// ONNX policy model; the threshold policy is used when unset
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// Expected SHA-256 of the model file, hex encoded
    #[serde(default)]
    pub model_sha256: Option<String>,

    /// Initial runtime scaling configuration
    #[serde(default)]
    pub scaling: ScalerConfig,
}

fn default_api_port() -> u16 {
    8080
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("SCALER")
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("scaling.namespaces")
        .with_list_parse_key("scaling.excluded_names")
        .try_parsing(true)
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            model_path: None,
            model_sha256: None,
            scaling: ScalerConfig::default(),
        }
    }
}

impl ProcessConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_source(environment())
    }

    fn from_source(source: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(source)
            .build()
            .context("failed to read scaler configuration")?;

        let loaded: Self = config
            .try_deserialize()
            .context("failed to parse scaler configuration")?;
        loaded
            .scaling
            .validate()
            .context("invalid initial scaling configuration")?;
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(source))
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = ProcessConfig::from_source(env(&[])).unwrap();
        assert_eq!(config.api_port, 8080);
        assert!(config.model_path.is_none());
        assert_eq!(config.scaling, ScalerConfig::default());
    }

    #[test]
    fn test_nested_scaling_overrides() {
        let config = ProcessConfig::from_source(env(&[
            ("SCALER_API_PORT", "9090"),
            ("SCALER_MODEL_PATH", "/models/policy.onnx"),
            ("SCALER_SCALING__DRY_RUN", "false"),
            ("SCALER_SCALING__INTERVAL_SECS", "60"),
            ("SCALER_SCALING__NAMESPACES", "default,staging"),
        ]))
        .unwrap();

        assert_eq!(config.api_port, 9090);
        assert_eq!(
            config.model_path.as_deref(),
            Some(std::path::Path::new("/models/policy.onnx"))
        );
        assert!(!config.scaling.dry_run);
        assert_eq!(config.scaling.interval_secs, 60);
        assert_eq!(config.scaling.namespaces, vec!["default", "staging"]);
    }

    #[test]
    fn test_invalid_scaling_is_rejected() {
        let result = ProcessConfig::from_source(env(&[("SCALER_SCALING__INTERVAL_SECS", "0")]));
        assert!(result.is_err());
    }
}
