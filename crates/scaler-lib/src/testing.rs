//! In-memory collaborators for tests
//!
//! Every fake records the calls it receives so tests can assert on what
//! the scaler did, not only on what it returned.

use crate::cluster::{
    ContainerResources, ControlPlane, MetricsSource, PatchOutcome, ResizeStatus, WorkloadInfo,
    WorkloadSpec,
};
use crate::error::{Result, ScalerError};
use crate::models::{
    ControllerRef, FeatureVector, ResourcePair, ResourceSample, ResourceTarget, ScalingAction,
    WorkloadRef,
};
use crate::policy::{DecisionPolicy, PolicyOutput};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A call received by [`FakeControlPlane`]
#[derive(Debug, Clone, PartialEq)]
pub enum ControlPlaneCall {
    ListWorkloads(String),
    GetSpec(WorkloadRef),
    PatchInPlace(WorkloadRef, ResourceTarget),
    FindController(WorkloadRef),
    PatchController(ControllerRef, ResourceTarget),
}

/// How the fake answers in-place resize requests
#[derive(Debug, Clone)]
pub enum InPlaceBehavior {
    /// Accept and apply the new values immediately
    Apply,
    /// Accept but never converge
    AcceptWithoutApplying,
    /// Accept, then report the resize as infeasible
    AcceptThenInfeasible,
    Infeasible(String),
    Reject(ScalerError),
}

struct FakeState {
    workloads: Vec<WorkloadInfo>,
    specs: HashMap<WorkloadRef, WorkloadSpec>,
    controllers: HashMap<WorkloadRef, ControllerRef>,
    in_place: InPlaceBehavior,
    controller_error: Option<ScalerError>,
    list_error: Option<ScalerError>,
    spec_error: Option<ScalerError>,
    patch_delay: Option<Duration>,
    calls: Vec<ControlPlaneCall>,
}

pub struct FakeControlPlane {
    state: Mutex<FakeState>,
}

impl Default for FakeControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                workloads: Vec::new(),
                specs: HashMap::new(),
                controllers: HashMap::new(),
                in_place: InPlaceBehavior::Apply,
                controller_error: None,
                list_error: None,
                spec_error: None,
                patch_delay: None,
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_workload(&self, info: WorkloadInfo, spec: WorkloadSpec) {
        let mut state = self.lock();
        state.specs.insert(info.workload.clone(), spec);
        state.workloads.push(info);
    }

    /// Running, ready single-container pod with declared requests and limits
    pub fn add_pod(&self, workload: &WorkloadRef, cpu_limit_cores: f64, memory_limit_mb: f64) {
        self.add_workload(
            WorkloadInfo {
                workload: workload.clone(),
                labels: BTreeMap::new(),
                controller: None,
            },
            running_spec(cpu_limit_cores, memory_limit_mb),
        );
    }

    /// The workload stops being listed, as when its pod is deleted
    pub fn remove_workload(&self, workload: &WorkloadRef) {
        let mut state = self.lock();
        state.workloads.retain(|w| &w.workload != workload);
        state.specs.remove(workload);
    }

    pub fn set_spec(&self, workload: &WorkloadRef, spec: WorkloadSpec) {
        self.lock().specs.insert(workload.clone(), spec);
    }

    pub fn spec(&self, workload: &WorkloadRef) -> Option<WorkloadSpec> {
        self.lock().specs.get(workload).cloned()
    }

    pub fn set_controller(&self, workload: &WorkloadRef, controller: ControllerRef) {
        self.lock().controllers.insert(workload.clone(), controller);
    }

    pub fn set_in_place_behavior(&self, behavior: InPlaceBehavior) {
        self.lock().in_place = behavior;
    }

    pub fn fail_controller_patch(&self, error: ScalerError) {
        self.lock().controller_error = Some(error);
    }

    pub fn fail_listing(&self, error: Option<ScalerError>) {
        self.lock().list_error = error;
    }

    pub fn fail_get_spec(&self, error: Option<ScalerError>) {
        self.lock().spec_error = error;
    }

    /// Delay every mutation call
    pub fn set_patch_delay(&self, delay: Duration) {
        self.lock().patch_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        self.lock().calls.clone()
    }

    pub fn in_place_calls(&self) -> usize {
        self.count(|c| matches!(c, ControlPlaneCall::PatchInPlace(..)))
    }

    pub fn controller_patch_calls(&self) -> usize {
        self.count(|c| matches!(c, ControlPlaneCall::PatchController(..)))
    }

    /// In-place plus controller patch calls
    pub fn mutation_calls(&self) -> usize {
        self.in_place_calls() + self.controller_patch_calls()
    }

    fn count(&self, pred: impl Fn(&ControlPlaneCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    async fn delay(&self) {
        let delay = self.lock().patch_delay;
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadInfo>> {
        let mut state = self.lock();
        state
            .calls
            .push(ControlPlaneCall::ListWorkloads(namespace.to_string()));
        if let Some(e) = state.list_error.clone() {
            return Err(e);
        }
        Ok(state
            .workloads
            .iter()
            .filter(|w| w.workload.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn get_spec(&self, workload: &WorkloadRef) -> Result<WorkloadSpec> {
        let mut state = self.lock();
        state.calls.push(ControlPlaneCall::GetSpec(workload.clone()));
        if let Some(e) = state.spec_error.clone() {
            return Err(e);
        }
        state
            .specs
            .get(workload)
            .cloned()
            .ok_or_else(|| ScalerError::WorkloadNotFound(workload.clone()))
    }

    async fn patch_in_place(
        &self,
        workload: &WorkloadRef,
        target: &ResourceTarget,
    ) -> Result<PatchOutcome> {
        self.lock()
            .calls
            .push(ControlPlaneCall::PatchInPlace(workload.clone(), *target));
        self.delay().await;

        let mut state = self.lock();
        match state.in_place.clone() {
            InPlaceBehavior::Apply => {
                if let Some(spec) = state.specs.get_mut(workload) {
                    if let Some(c) = spec.containers.first_mut() {
                        c.cpu_limit_cores = Some(target.cpu_limit_cores);
                        c.cpu_request_cores = Some(target.cpu_request_cores);
                        c.memory_limit_mb = Some(target.memory_limit_mb);
                        c.memory_request_mb = Some(target.memory_request_mb);
                    }
                }
                Ok(PatchOutcome::Accepted)
            }
            InPlaceBehavior::AcceptWithoutApplying => Ok(PatchOutcome::Accepted),
            InPlaceBehavior::AcceptThenInfeasible => {
                if let Some(spec) = state.specs.get_mut(workload) {
                    spec.resize_status = ResizeStatus::Infeasible;
                }
                Ok(PatchOutcome::Accepted)
            }
            InPlaceBehavior::Infeasible(reason) => Ok(PatchOutcome::Infeasible(reason)),
            InPlaceBehavior::Reject(e) => Err(e),
        }
    }

    async fn find_controller(&self, workload: &WorkloadRef) -> Result<Option<ControllerRef>> {
        let mut state = self.lock();
        state
            .calls
            .push(ControlPlaneCall::FindController(workload.clone()));
        Ok(state.controllers.get(workload).cloned())
    }

    async fn patch_controller(
        &self,
        controller: &ControllerRef,
        target: &ResourceTarget,
    ) -> Result<()> {
        self.lock()
            .calls
            .push(ControlPlaneCall::PatchController(controller.clone(), *target));
        self.delay().await;
        match self.lock().controller_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Running and ready single-container spec
pub fn running_spec(cpu_limit_cores: f64, memory_limit_mb: f64) -> WorkloadSpec {
    WorkloadSpec {
        phase: "Running".to_string(),
        containers: vec![ContainerResources {
            name: "app".to_string(),
            ready: true,
            cpu_request_cores: Some(cpu_limit_cores * 0.5),
            cpu_limit_cores: Some(cpu_limit_cores),
            memory_request_mb: Some(memory_limit_mb * 0.7),
            memory_limit_mb: Some(memory_limit_mb),
        }],
        resize_status: ResizeStatus::None,
    }
}

/// Running and ready pod with a primary container and an equally sized sidecar
pub fn running_spec_with_sidecar(cpu_limit_cores: f64, memory_limit_mb: f64) -> WorkloadSpec {
    let mut spec = running_spec(cpu_limit_cores, memory_limit_mb);
    let sidecar = ContainerResources {
        name: "sidecar".to_string(),
        ..spec.containers[0].clone()
    };
    spec.containers.push(sidecar);
    spec
}

/// Fixed per-workload samples
#[derive(Default)]
pub struct StaticMetricsSource {
    samples: Mutex<HashMap<WorkloadRef, ResourceSample>>,
    error: Mutex<Option<ScalerError>>,
    panics: Mutex<HashSet<WorkloadRef>>,
    calls: AtomicUsize,
}

impl StaticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, workload: &WorkloadRef, sample: ResourceSample) {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(workload.clone(), sample);
    }

    pub fn remove(&self, workload: &WorkloadRef) {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(workload);
    }

    pub fn fail_with(&self, error: Option<ScalerError>) {
        *self.error.lock().unwrap_or_else(|e| e.into_inner()) = error;
    }

    /// Panic whenever usage for this workload is requested
    pub fn panic_on(&self, workload: &WorkloadRef) {
        self.panics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(workload.clone());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn get_usage(&self, workload: &WorkloadRef) -> Result<Option<ResourceSample>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let panics = self
            .panics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(workload);
        if panics {
            panic!("metrics source panic for {}", workload);
        }
        if let Some(e) = self.error.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(e);
        }
        Ok(self
            .samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(workload)
            .map(|s| ResourceSample {
                timestamp: chrono::Utc::now(),
                ..s.clone()
            }))
    }
}

/// One scripted policy response
#[derive(Debug, Clone)]
pub enum PolicyStep {
    Output(PolicyOutput),
    Fail(String),
    Panic,
    /// Block the calling thread, then answer
    Sleep(Duration, PolicyOutput),
}

/// Policy that replays queued steps, then repeats a fallback step
pub struct ScriptedPolicy {
    queue: Mutex<VecDeque<PolicyStep>>,
    fallback: PolicyStep,
    seen: Mutex<Vec<FeatureVector>>,
    calls: AtomicUsize,
}

impl ScriptedPolicy {
    pub fn new(fallback: PolicyStep) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answer with the given actions at 0.9 confidence
    pub fn always(cpu: ScalingAction, memory: ScalingAction) -> Self {
        Self::new(PolicyStep::Output(output(cpu, memory)))
    }

    pub fn failing(message: &str) -> Self {
        Self::new(PolicyStep::Fail(message.to_string()))
    }

    pub fn then(self, step: PolicyStep) -> Self {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(step);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_features(&self) -> Vec<FeatureVector> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl DecisionPolicy for ScriptedPolicy {
    fn decide(&self, features: &FeatureVector) -> anyhow::Result<PolicyOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(*features);
        let step = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            PolicyStep::Output(out) => Ok(out),
            PolicyStep::Fail(message) => Err(anyhow::anyhow!(message)),
            PolicyStep::Panic => panic!("scripted policy panic"),
            PolicyStep::Sleep(duration, out) => {
                std::thread::sleep(duration);
                Ok(out)
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Policy output with the given actions at 0.9 confidence
pub fn output(cpu: ScalingAction, memory: ScalingAction) -> PolicyOutput {
    PolicyOutput {
        cpu_action: cpu,
        memory_action: memory,
        confidence: ResourcePair::new(0.9, 0.9),
        predicted_future_usage: ResourcePair::new(0.5, 0.5),
        scores: None,
    }
}
