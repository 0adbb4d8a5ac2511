//! ONNX policy inference using tract
//!
//! The model takes the eight-component feature vector as a `[1, 8]` f32
//! input and emits at least eight values: three Q-values for CPU, three for
//! memory, then the predicted future CPU and memory utilization.

use super::{DecisionPolicy, PolicyInfo, PolicyOutput};
use crate::models::{
    ActionScores, ActionValues, FeatureVector, PolicyScores, ResourcePair, FEATURE_DIM,
};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

/// Minimum number of values in the model output
pub const MODEL_OUTPUTS: usize = 8;

/// Inference latency above which a warning is logged
const MAX_INFERENCE_MS: u128 = 50;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Q-network policy loaded from an ONNX file
pub struct OnnxPolicy {
    model: TractModel,
    name: String,
    sha256: String,
    output_shape: Vec<usize>,
    source: Option<String>,
    inference_count: AtomicU64,
    slow_inference_count: AtomicU64,
}

impl OnnxPolicy {
    /// Load a policy from model bytes
    pub fn new(model_bytes: &[u8], name: impl Into<String>) -> Result<Self> {
        let model = Self::load_model(model_bytes)?;
        let output_shape = model
            .model()
            .output_fact(0)
            .ok()
            .and_then(|fact| fact.shape.as_concrete().map(|dims| dims.to_vec()))
            .unwrap_or_else(|| vec![1, MODEL_OUTPUTS]);
        Ok(Self {
            model,
            name: name.into(),
            sha256: hex::encode(Sha256::digest(model_bytes)),
            output_shape,
            source: None,
            inference_count: AtomicU64::new(0),
            slow_inference_count: AtomicU64::new(0),
        })
    }

    /// Load a policy from disk, verifying the SHA-256 digest first when given
    pub fn from_file(path: impl AsRef<Path>, expected_sha256: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read model file {}", path.display()))?;

        if let Some(expected) = expected_sha256 {
            verify_checksum(&bytes, expected)?;
        }

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| format!("onnx:{}", s))
            .unwrap_or_else(|| "onnx".to_string());

        let mut policy = Self::new(&bytes, name)?;
        policy.source = Some(path.display().to_string());
        info!(path = %path.display(), policy = %policy.name, "Loaded ONNX policy");
        Ok(policy)
    }

    fn load_model(model_bytes: &[u8]) -> Result<TractModel> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact([1, FEATURE_DIM]).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")?;
        Ok(model)
    }

    fn features_to_tensor(features: &FeatureVector) -> Result<Tensor> {
        let data = features.to_array().to_vec();
        let array = tract_ndarray::Array2::from_shape_vec((1, FEATURE_DIM), data)
            .context("Failed to shape feature tensor")?;
        Ok(array.into())
    }

    pub fn stats(&self) -> InferenceStats {
        InferenceStats {
            total_inferences: self.inference_count.load(Ordering::Relaxed),
            slow_inferences: self.slow_inference_count.load(Ordering::Relaxed),
        }
    }
}

impl DecisionPolicy for OnnxPolicy {
    fn decide(&self, features: &FeatureVector) -> Result<PolicyOutput> {
        let start = Instant::now();
        let input = Self::features_to_tensor(features)?;

        let result = self.model.run(tvec!(input.into()))?;
        let output = result.first().context("No output from model")?;
        let values: Vec<f32> = output.to_array_view::<f32>()?.iter().copied().collect();

        let elapsed = start.elapsed();
        self.inference_count.fetch_add(1, Ordering::Relaxed);
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            self.slow_inference_count.fetch_add(1, Ordering::Relaxed);
            warn!(
                elapsed_ms = elapsed.as_millis(),
                "Inference exceeded {}ms target",
                MAX_INFERENCE_MS
            );
        } else {
            debug!(elapsed_us = elapsed.as_micros(), "Inference completed");
        }

        interpret_output(&values)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> PolicyInfo {
        PolicyInfo {
            output_shape: self.output_shape.clone(),
            source: self.source.clone(),
            sha256: Some(self.sha256.clone()),
            ..PolicyInfo::new(&self.name)
        }
    }
}

/// Inference statistics
#[derive(Debug, Clone)]
pub struct InferenceStats {
    pub total_inferences: u64,
    pub slow_inferences: u64,
}

/// Map raw model output to actions, confidences and future usage
pub(crate) fn interpret_output(values: &[f32]) -> Result<PolicyOutput> {
    if values.len() < MODEL_OUTPUTS {
        anyhow::bail!(
            "Model output has {} values, expected at least {}",
            values.len(),
            MODEL_OUTPUTS
        );
    }
    if values[..MODEL_OUTPUTS].iter().any(|v| !v.is_finite()) {
        anyhow::bail!("Model output contains non-finite values");
    }

    let (cpu_action, cpu_confidence) = argmax_softmax(&values[0..3]);
    let (memory_action, memory_confidence) = argmax_softmax(&values[3..6]);
    let scores = PolicyScores {
        cpu: action_scores(&values[0..3]),
        memory: action_scores(&values[3..6]),
    };

    let output = PolicyOutput::from_indices(
        cpu_action,
        memory_action,
        ResourcePair::new(cpu_confidence, memory_confidence),
        ResourcePair::new(
            (values[6] as f64).clamp(0.0, 1.0),
            (values[7] as f64).clamp(0.0, 1.0),
        ),
    )?;
    Ok(output.with_scores(scores))
}

/// Q-values of one head and their softmax
fn action_scores(q: &[f32]) -> ActionScores {
    let q = [q[0] as f64, q[1] as f64, q[2] as f64];
    let max = q.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp = q.map(|v| (v - max).exp());
    let denom: f64 = exp.iter().sum();
    ActionScores {
        q_values: ActionValues::from_slice(&q),
        probabilities: ActionValues::from_slice(&exp.map(|e| e / denom)),
    }
}

/// Index of the largest Q-value and its softmax probability
fn argmax_softmax(q: &[f32]) -> (usize, f64) {
    let mut best = 0;
    for (i, v) in q.iter().enumerate() {
        if *v > q[best] {
            best = i;
        }
    }
    let max = q[best] as f64;
    let denom: f64 = q.iter().map(|v| (*v as f64 - max).exp()).sum();
    (best, 1.0 / denom)
}

/// Compare the SHA-256 digest of `bytes` against a hex string
pub fn verify_checksum(bytes: &[u8], expected_hex: &str) -> Result<()> {
    let actual = hex::encode(Sha256::digest(bytes));
    if !actual.eq_ignore_ascii_case(expected_hex.trim()) {
        anyhow::bail!(
            "Model checksum mismatch: expected {}, got {}",
            expected_hex.trim(),
            actual
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScalingAction;
    use std::io::Write;

    #[test]
    fn test_interpret_output_argmax_per_head() {
        let out = interpret_output(&[0.1, 0.2, 3.0, 2.0, 0.5, 0.1, 0.9, 0.4]).unwrap();
        assert_eq!(out.cpu_action, ScalingAction::Increase);
        assert_eq!(out.memory_action, ScalingAction::Decrease);
        assert!(out.confidence.cpu > 0.5 && out.confidence.cpu < 1.0);
        assert!((out.predicted_future_usage.cpu - 0.9).abs() < 1e-6);
        assert!((out.predicted_future_usage.memory - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_interpret_output_reports_scores() {
        let out = interpret_output(&[0.1, 0.2, 3.0, 2.0, 0.5, 0.1, 0.9, 0.4]).unwrap();
        let scores = out.scores.unwrap();
        assert!((scores.cpu.q_values.increase - 3.0).abs() < 1e-6);
        assert!((scores.memory.q_values.decrease - 2.0).abs() < 1e-6);

        let p = scores.cpu.probabilities;
        assert!((p.decrease + p.maintain + p.increase - 1.0).abs() < 1e-9);
        assert!((p.get(out.cpu_action) - out.confidence.cpu).abs() < 1e-9);
        assert!(p.increase > p.maintain && p.maintain > p.decrease);
    }

    #[test]
    fn test_interpret_output_uniform_q_values() {
        let out = interpret_output(&[1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.5, 0.5]).unwrap();
        assert_eq!(out.cpu_action, ScalingAction::Decrease);
        assert!((out.confidence.cpu - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_interpret_output_clamps_future_usage() {
        let out = interpret_output(&[0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.7, -0.3]).unwrap();
        assert_eq!(out.predicted_future_usage, ResourcePair::new(1.0, 0.0));
    }

    #[test]
    fn test_interpret_output_rejects_short_or_nan() {
        assert!(interpret_output(&[0.0; 5]).is_err());
        let mut values = [0.0f32; 8];
        values[2] = f32::NAN;
        assert!(interpret_output(&values).is_err());
    }

    #[test]
    fn test_checksum_verification() {
        let bytes = b"model-bytes";
        let digest = hex::encode(Sha256::digest(bytes));
        assert!(verify_checksum(bytes, &digest).is_ok());
        assert!(verify_checksum(bytes, &digest.to_uppercase()).is_ok());
        assert!(verify_checksum(bytes, "deadbeef").is_err());
    }

    #[test]
    fn test_from_file_rejects_checksum_mismatch_before_parsing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not an onnx model").unwrap();
        let err = OnnxPolicy::from_file(file.path(), Some("00")).err().unwrap();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_invalid_model_bytes() {
        assert!(OnnxPolicy::new(b"garbage", "test").is_err());
    }

    #[test]
    fn test_missing_model_file() {
        assert!(OnnxPolicy::from_file("/nonexistent/policy.onnx", None).is_err());
    }
}
