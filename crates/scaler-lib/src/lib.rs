//! Core library for the workload resource autoscaler
//!
//! This crate provides:
//! - Usage sampling and feature construction
//! - Pluggable scaling policies (ONNX model or thresholds)
//! - The resize state machine with in-place and controller fallback paths
//! - The background scaling loop, history and cooldown tracking
//! - Health checks and observability

pub mod cluster;
pub mod config;
pub mod cooldown;
pub mod engine;
pub mod error;
pub mod executor;
pub mod health;
pub mod history;
pub mod models;
pub mod observability;
pub mod policy;
pub mod scaler_loop;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ConfigStore, ConfigUpdate, ScalerConfig};
pub use engine::{DecisionEngine, EngineParts};
pub use error::{Result, ScalerError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ScalerMetrics, StructuredLogger};
pub use scaler_loop::{AutoScaler, CycleReport, LoopStatus};
