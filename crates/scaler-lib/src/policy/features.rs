//! Feature state construction
//!
//! Turns a workload's latest sample and its short history into the fixed
//! eight-component vector the policy consumes: normalized usage, usage
//! trend, and cyclic hour and weekday encodings.

use crate::models::{FeatureVector, ResourceSample};
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::f64::consts::TAU;

/// Builds policy input from collected samples
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureStateBuilder;

impl FeatureStateBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build the vector at the current wall-clock time
    pub fn build(&self, sample: &ResourceSample, history: &[ResourceSample]) -> FeatureVector {
        self.build_at(sample, history, Utc::now())
    }

    /// Build the vector for an explicit evaluation time
    ///
    /// `history` is the workload's collected samples, most recent last, and
    /// already includes `sample`. Trend is the difference between the two
    /// most recent normalized values, or 0 with fewer than two samples.
    pub fn build_at(
        &self,
        sample: &ResourceSample,
        history: &[ResourceSample],
        at: DateTime<Utc>,
    ) -> FeatureVector {
        let (cpu_trend, memory_trend) = match history {
            [.., prev, last] => (
                finite_or_zero(last.cpu_utilization() - prev.cpu_utilization()),
                finite_or_zero(last.memory_utilization() - prev.memory_utilization()),
            ),
            _ => (0.0, 0.0),
        };

        let (hour_sin, hour_cos) = cyclic(at.hour() as f64, 24.0);
        let (day_sin, day_cos) = cyclic(at.weekday().num_days_from_monday() as f64, 7.0);

        FeatureVector {
            cpu_usage: sample.cpu_utilization(),
            memory_usage: sample.memory_utilization(),
            cpu_trend,
            memory_trend,
            hour_sin,
            hour_cos,
            day_sin,
            day_cos,
        }
    }
}

fn cyclic(value: f64, period: f64) -> (f64, f64) {
    let angle = TAU * value / period;
    (angle.sin(), angle.cos())
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(cpu: f64, mem: f64) -> ResourceSample {
        ResourceSample::new(cpu, mem, 1.0, 1000.0)
    }

    fn monday_midnight() -> DateTime<Utc> {
        // 2024-01-01 was a Monday
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_single_sample_has_zero_trend() {
        let builder = FeatureStateBuilder::new();
        let s = sample(0.2, 100.0);
        let f = builder.build_at(&s, &[s.clone()], monday_midnight());
        assert!((f.cpu_usage - 0.2).abs() < 1e-9);
        assert!((f.memory_usage - 0.1).abs() < 1e-9);
        assert_eq!(f.cpu_trend, 0.0);
        assert_eq!(f.memory_trend, 0.0);
    }

    #[test]
    fn test_trend_from_two_most_recent() {
        let builder = FeatureStateBuilder::new();
        let first = sample(0.2, 100.0);
        let second = sample(0.5, 300.0);
        let history = vec![first, second.clone()];
        let f = builder.build_at(&second, &history, monday_midnight());
        assert!((f.cpu_usage - 0.5).abs() < 1e-9);
        assert!((f.cpu_trend - 0.3).abs() < 1e-9);
        assert!((f.memory_trend - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_trend_ignores_older_samples() {
        let builder = FeatureStateBuilder::new();
        let history = vec![sample(0.9, 0.0), sample(0.4, 0.0), sample(0.3, 0.0)];
        let f = builder.build_at(&history[2], &history, monday_midnight());
        assert!((f.cpu_trend + 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_zero_limit_normalizes_to_zero() {
        let builder = FeatureStateBuilder::new();
        let s = ResourceSample::new(0.5, 200.0, 0.0, 0.0);
        let f = builder.build_at(&s, &[], monday_midnight());
        assert_eq!(f.cpu_usage, 0.0);
        assert_eq!(f.memory_usage, 0.0);
    }

    #[test]
    fn test_non_finite_inputs_default_to_zero() {
        let builder = FeatureStateBuilder::new();
        let s = ResourceSample::new(f64::NAN, f64::INFINITY, f64::NAN, 1.0);
        let f = builder.build_at(&s, &[s.clone(), s.clone()], monday_midnight());
        assert_eq!(f.cpu_usage, 0.0);
        assert_eq!(f.memory_usage, 0.0);
        assert_eq!(f.cpu_trend, 0.0);
        assert_eq!(f.memory_trend, 0.0);
    }

    #[test]
    fn test_time_encoding() {
        let builder = FeatureStateBuilder::new();
        let s = sample(0.1, 0.0);

        let midnight = builder.build_at(&s, &[], monday_midnight());
        assert!(midnight.hour_sin.abs() < 1e-9);
        assert!((midnight.hour_cos - 1.0).abs() < 1e-9);
        assert!(midnight.day_sin.abs() < 1e-9);
        assert!((midnight.day_cos - 1.0).abs() < 1e-9);

        // 06:00 on Wednesday
        let at = Utc.with_ymd_and_hms(2024, 1, 3, 6, 0, 0).unwrap();
        let f = builder.build_at(&s, &[], at);
        assert!((f.hour_sin - 1.0).abs() < 1e-9);
        assert!(f.hour_cos.abs() < 1e-9);
        assert!((f.day_sin - (TAU * 2.0 / 7.0).sin()).abs() < 1e-9);
    }

    #[test]
    fn test_time_encoding_is_continuous_at_midnight() {
        let builder = FeatureStateBuilder::new();
        let s = sample(0.1, 0.0);
        let late = builder.build_at(&s, &[], Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap());
        let early = builder.build_at(&s, &[], Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        let distance = ((late.hour_sin - early.hour_sin).powi(2)
            + (late.hour_cos - early.hour_cos).powi(2))
        .sqrt();
        assert!(distance < 0.3);
    }
}
