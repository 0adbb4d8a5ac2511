//! Bounded per-workload history of samples, decisions and mutations
//!
//! Retention is a hard bound: each workload keeps at most `sample_window`
//! samples and `decision_capacity` decisions and mutation results, evicting
//! the oldest entry first.

use crate::models::{Decision, MutationResult, ResourceSample, ScalingOutcome, WorkloadRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

/// Fixed-capacity circular buffer
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append, returning the evicted oldest entry when full
    pub fn push(&mut self, item: T) -> Option<T> {
        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        if self.len == cap {
            let evicted = self.slots[self.head].replace(item);
            self.head = (self.head + 1) % cap;
            evicted
        } else {
            self.slots[tail] = Some(item);
            self.len += 1;
            None
        }
    }

    /// Iterate oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let cap = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % cap].as_ref())
    }

    pub fn last(&self) -> Option<&T> {
        self.iter().next_back()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

#[derive(Debug)]
struct WorkloadHistory {
    samples: RingBuffer<ResourceSample>,
    decisions: RingBuffer<Decision>,
    mutations: RingBuffer<MutationResult>,
}

impl WorkloadHistory {
    fn new(sample_window: usize, decision_capacity: usize) -> Self {
        Self {
            samples: RingBuffer::new(sample_window),
            decisions: RingBuffer::new(decision_capacity),
            mutations: RingBuffer::new(decision_capacity),
        }
    }
}

/// Aggregate counters over every evaluation since start-up
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalingStats {
    pub workloads_tracked: usize,
    pub total_decisions: u64,
    pub outcomes: BTreeMap<String, u64>,
    pub mutations_by_method: BTreeMap<String, u64>,
    pub mutations_succeeded: u64,
    pub mutations_failed: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    workloads: HashMap<WorkloadRef, WorkloadHistory>,
    stats: ScalingStats,
}

/// Per-workload ring buffers behind one lock
#[derive(Debug)]
pub struct DecisionHistoryStore {
    sample_window: usize,
    decision_capacity: usize,
    inner: RwLock<StoreInner>,
}

impl DecisionHistoryStore {
    pub fn new(sample_window: usize, decision_capacity: usize) -> Self {
        Self {
            sample_window,
            decision_capacity,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Append a sample and return the workload's samples, oldest first
    pub async fn record_sample(
        &self,
        workload: &WorkloadRef,
        sample: ResourceSample,
    ) -> Vec<ResourceSample> {
        let mut inner = self.inner.write().await;
        let history = inner
            .workloads
            .entry(workload.clone())
            .or_insert_with(|| WorkloadHistory::new(self.sample_window, self.decision_capacity));
        history.samples.push(sample);
        history.samples.to_vec()
    }

    pub async fn record_decision(&self, decision: Decision) {
        let mut inner = self.inner.write().await;
        inner.stats.total_decisions += 1;
        inner
            .workloads
            .entry(decision.workload.clone())
            .or_insert_with(|| WorkloadHistory::new(self.sample_window, self.decision_capacity))
            .decisions
            .push(decision);
    }

    /// Count an outcome and keep its mutation result, if any
    pub async fn record_outcome(&self, outcome: &ScalingOutcome) {
        let mut inner = self.inner.write().await;
        *inner
            .stats
            .outcomes
            .entry(outcome.status.as_str().to_string())
            .or_default() += 1;

        if let Some(result) = &outcome.mutation {
            self.push_mutation(&mut inner, result.clone());
        }
    }

    /// Keep a mutation that did not come out of a decision
    pub async fn record_mutation(&self, result: MutationResult) {
        let mut inner = self.inner.write().await;
        self.push_mutation(&mut inner, result);
    }

    fn push_mutation(&self, inner: &mut StoreInner, result: MutationResult) {
        *inner
            .stats
            .mutations_by_method
            .entry(result.method.as_str().to_string())
            .or_default() += 1;
        if result.success {
            inner.stats.mutations_succeeded += 1;
        } else {
            inner.stats.mutations_failed += 1;
        }
        inner
            .workloads
            .entry(result.workload.clone())
            .or_insert_with(|| WorkloadHistory::new(self.sample_window, self.decision_capacity))
            .mutations
            .push(result);
    }

    pub async fn samples(&self, workload: &WorkloadRef) -> Vec<ResourceSample> {
        let inner = self.inner.read().await;
        inner
            .workloads
            .get(workload)
            .map(|h| h.samples.to_vec())
            .unwrap_or_default()
    }

    /// Decisions for one workload, oldest first
    pub async fn decisions(&self, workload: &WorkloadRef) -> Vec<Decision> {
        let inner = self.inner.read().await;
        inner
            .workloads
            .get(workload)
            .map(|h| h.decisions.to_vec())
            .unwrap_or_default()
    }

    pub async fn mutations(&self, workload: &WorkloadRef) -> Vec<MutationResult> {
        let inner = self.inner.read().await;
        inner
            .workloads
            .get(workload)
            .map(|h| h.mutations.to_vec())
            .unwrap_or_default()
    }

    /// Most recent decisions across all workloads, newest first
    pub async fn recent_decisions(&self, limit: usize) -> Vec<Decision> {
        let inner = self.inner.read().await;
        let mut all: Vec<Decision> = inner
            .workloads
            .values()
            .flat_map(|h| h.decisions.iter().cloned())
            .collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(limit);
        all
    }

    pub async fn workloads(&self) -> Vec<WorkloadRef> {
        let inner = self.inner.read().await;
        let mut keys: Vec<_> = inner.workloads.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn stats(&self) -> ScalingStats {
        let inner = self.inner.read().await;
        ScalingStats {
            workloads_tracked: inner.workloads.len(),
            ..inner.stats.clone()
        }
    }

    /// Drop every workload not in `live`; returns how many were dropped
    ///
    /// Aggregate statistics are kept.
    pub async fn retain(&self, live: &HashSet<WorkloadRef>) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.workloads.len();
        inner.workloads.retain(|w, _| live.contains(w));
        before - inner.workloads.len()
    }
}
