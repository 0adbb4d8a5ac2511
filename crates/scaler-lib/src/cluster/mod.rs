//! Cluster seams
//!
//! [`ControlPlane`] reads and mutates workload resources, [`MetricsSource`]
//! reports usage. Both are implemented against Kubernetes in [`kubernetes`]
//! and [`metrics`], and by in-memory fakes for tests.

pub mod kubernetes;
pub mod metrics;
pub mod quantity;

pub use kubernetes::KubeControlPlane;
pub use metrics::KubeMetricsSource;

use crate::error::Result;
use crate::models::{ControllerRef, ResourceSample, ResourceTarget, WorkloadRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Verification tolerance for CPU limits, in cores
pub const CPU_TOLERANCE_CORES: f64 = 0.01;

/// Verification tolerance for memory limits, in MB
pub const MEMORY_TOLERANCE_MB: f64 = 10.0;

/// A workload found while enumerating a namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    pub workload: WorkloadRef,
    pub labels: BTreeMap<String, String>,
    /// Name of the owning controller, if any
    pub controller: Option<String>,
}

/// Control-plane view of an in-progress resize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeStatus {
    #[default]
    None,
    InProgress,
    Deferred,
    Infeasible,
}

impl ResizeStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "InProgress" | "Proposed" => Self::InProgress,
            "Deferred" => Self::Deferred,
            "Infeasible" => Self::Infeasible,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerResources {
    pub name: String,
    pub ready: bool,
    pub cpu_request_cores: Option<f64>,
    pub cpu_limit_cores: Option<f64>,
    pub memory_request_mb: Option<f64>,
    pub memory_limit_mb: Option<f64>,
}

impl ContainerResources {
    fn declares_resources(&self) -> bool {
        self.cpu_request_cores.is_some()
            && self.cpu_limit_cores.is_some()
            && self.memory_request_mb.is_some()
            && self.memory_limit_mb.is_some()
    }
}

/// Current resource specification of a workload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub phase: String,
    pub containers: Vec<ContainerResources>,
    pub resize_status: ResizeStatus,
}

impl WorkloadSpec {
    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }

    pub fn all_ready(&self) -> bool {
        !self.containers.is_empty() && self.containers.iter().all(|c| c.ready)
    }

    /// Reason the workload cannot be resized in place, if any
    pub fn in_place_blocker(&self) -> Option<String> {
        if !self.is_running() {
            return Some(format!("workload phase is {}", self.phase));
        }
        if !self.all_ready() {
            return Some("not all containers are ready".to_string());
        }
        self.containers
            .iter()
            .find(|c| !c.declares_resources())
            .map(|c| format!("container {} does not declare requests and limits", c.name))
    }

    /// First declared container; the one the scaler reads and resizes
    pub fn primary(&self) -> Option<&ContainerResources> {
        self.containers.first()
    }

    /// Whether the primary container's limits match the target within tolerance
    pub fn limits_match(&self, target: &ResourceTarget) -> bool {
        let Some(c) = self.primary() else {
            return false;
        };
        let cpu_ok = c
            .cpu_limit_cores
            .map(|v| (v - target.cpu_limit_cores).abs() <= CPU_TOLERANCE_CORES)
            .unwrap_or(false);
        let mem_ok = c
            .memory_limit_mb
            .map(|v| (v - target.memory_limit_mb).abs() <= MEMORY_TOLERANCE_MB)
            .unwrap_or(false);
        cpu_ok && mem_ok
    }
}

/// Result of an accepted in-place patch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Accepted,
    /// The control plane hard-rejected the values
    Infeasible(String),
}

/// Cluster operations used by the scaler
///
/// Errors are classified by [`crate::error::ScalerError`]:
/// `CapabilityUnsupported` from `patch_in_place` routes to a controller
/// patch, anything transient is logged and counted by the caller.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Running workloads in a namespace
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadInfo>>;

    async fn get_spec(&self, workload: &WorkloadRef) -> Result<WorkloadSpec>;

    /// Request an in-place resize of the primary container
    async fn patch_in_place(
        &self,
        workload: &WorkloadRef,
        target: &ResourceTarget,
    ) -> Result<PatchOutcome>;

    async fn find_controller(&self, workload: &WorkloadRef) -> Result<Option<ControllerRef>>;

    /// Merge the target into the primary container of the controller's pod template
    async fn patch_controller(
        &self,
        controller: &ControllerRef,
        target: &ResourceTarget,
    ) -> Result<()>;
}

/// Usage source; `None` means no data for this cycle
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn get_usage(&self, workload: &WorkloadRef) -> Result<Option<ResourceSample>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(ready: bool, declared: bool) -> ContainerResources {
        ContainerResources {
            name: "app".to_string(),
            ready,
            cpu_request_cores: declared.then_some(0.25),
            cpu_limit_cores: declared.then_some(0.5),
            memory_request_mb: declared.then_some(179.0),
            memory_limit_mb: declared.then_some(256.0),
        }
    }

    fn spec(containers: Vec<ContainerResources>) -> WorkloadSpec {
        WorkloadSpec {
            phase: "Running".to_string(),
            containers,
            resize_status: ResizeStatus::None,
        }
    }

    #[test]
    fn test_in_place_blocker() {
        assert!(spec(vec![container(true, true)]).in_place_blocker().is_none());
        assert!(spec(vec![container(false, true)]).in_place_blocker().is_some());
        assert!(spec(vec![container(true, true), container(true, false)])
            .in_place_blocker()
            .unwrap()
            .contains("requests and limits"));

        let mut pending = spec(vec![container(true, true)]);
        pending.phase = "Pending".to_string();
        assert!(pending.in_place_blocker().is_some());
    }

    #[test]
    fn test_limits_match_tolerance() {
        let s = spec(vec![container(true, true)]);
        let target = |cpu: f64, mem: f64| ResourceTarget {
            cpu_limit_cores: cpu,
            cpu_request_cores: cpu / 2.0,
            memory_limit_mb: mem,
            memory_request_mb: mem * 0.7,
        };
        assert!(s.limits_match(&target(0.505, 250.0)));
        assert!(!s.limits_match(&target(0.52, 256.0)));
        assert!(!s.limits_match(&target(0.5, 270.0)));
        assert!(!spec(vec![]).limits_match(&target(0.5, 256.0)));

        let mut sidecar = container(true, true);
        sidecar.name = "sidecar".to_string();
        sidecar.cpu_limit_cores = Some(0.1);
        let two = spec(vec![container(true, true), sidecar]);
        assert_eq!(two.primary().unwrap().name, "app");
        assert!(two.limits_match(&target(0.5, 256.0)));
    }

    #[test]
    fn test_resize_status_parse() {
        assert_eq!(ResizeStatus::parse("Infeasible"), ResizeStatus::Infeasible);
        assert_eq!(ResizeStatus::parse("Deferred"), ResizeStatus::Deferred);
        assert_eq!(ResizeStatus::parse("InProgress"), ResizeStatus::InProgress);
        assert_eq!(ResizeStatus::parse(""), ResizeStatus::None);
    }
}
