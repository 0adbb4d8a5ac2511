//! Per-workload cooldown tracking

use crate::models::WorkloadRef;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Last successful mutation time per workload
///
/// A workload with no entry has never been scaled and is eligible.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_applied: RwLock<HashMap<WorkloadRef, DateTime<Utc>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_eligible(&self, workload: &WorkloadRef, cooldown: Duration) -> bool {
        self.is_eligible_at(workload, cooldown, Utc::now()).await
    }

    /// Eligible when strictly more than `cooldown` has elapsed since the last mutation
    pub async fn is_eligible_at(
        &self,
        workload: &WorkloadRef,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let last_applied = self.last_applied.read().await;
        match last_applied.get(workload) {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(*last);
                match elapsed.to_std() {
                    Ok(elapsed) => elapsed > cooldown,
                    // Clock went backwards
                    Err(_) => false,
                }
            }
        }
    }

    /// Time left before the workload becomes eligible
    pub async fn remaining(&self, workload: &WorkloadRef, cooldown: Duration) -> Option<Duration> {
        let last_applied = self.last_applied.read().await;
        let last = last_applied.get(workload)?;
        let elapsed = Utc::now().signed_duration_since(*last).to_std().ok()?;
        cooldown.checked_sub(elapsed)
    }

    /// Call only after a successful mutation
    pub async fn record_applied(&self, workload: &WorkloadRef) {
        self.record_applied_at(workload, Utc::now()).await;
    }

    pub async fn record_applied_at(&self, workload: &WorkloadRef, at: DateTime<Utc>) {
        debug!(workload = %workload, at = %at, "Recording applied mutation");
        self.last_applied.write().await.insert(workload.clone(), at);
    }

    pub async fn last_applied(&self, workload: &WorkloadRef) -> Option<DateTime<Utc>> {
        self.last_applied.read().await.get(workload).copied()
    }

    /// Forget workloads not in `live`; returns how many were forgotten
    pub async fn retain(&self, live: &HashSet<WorkloadRef>) -> usize {
        let mut last_applied = self.last_applied.write().await;
        let before = last_applied.len();
        last_applied.retain(|w, _| live.contains(w));
        before - last_applied.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_never_scaled_is_eligible() {
        let tracker = CooldownTracker::new();
        let w = WorkloadRef::new("default", "api");
        assert!(tracker.is_eligible(&w, Duration::from_secs(300)).await);
        assert!(tracker.last_applied(&w).await.is_none());
    }

    #[tokio::test]
    async fn test_cooldown_window() {
        let tracker = CooldownTracker::new();
        let w = WorkloadRef::new("default", "api");
        let t0 = Utc::now();
        tracker.record_applied_at(&w, t0).await;

        let cooldown = Duration::from_secs(300);
        assert!(
            !tracker
                .is_eligible_at(&w, cooldown, t0 + ChronoDuration::seconds(299))
                .await
        );
        // Boundary is exclusive
        assert!(
            !tracker
                .is_eligible_at(&w, cooldown, t0 + ChronoDuration::seconds(300))
                .await
        );
        assert!(
            tracker
                .is_eligible_at(&w, cooldown, t0 + ChronoDuration::seconds(301))
                .await
        );
    }

    #[tokio::test]
    async fn test_zero_cooldown() {
        let tracker = CooldownTracker::new();
        let w = WorkloadRef::new("default", "api");
        let t0 = Utc::now();
        tracker.record_applied_at(&w, t0).await;
        assert!(
            tracker
                .is_eligible_at(&w, Duration::ZERO, t0 + ChronoDuration::milliseconds(1))
                .await
        );
    }

    #[tokio::test]
    async fn test_remaining() {
        let tracker = CooldownTracker::new();
        let w = WorkloadRef::new("default", "api");
        assert!(tracker.remaining(&w, Duration::from_secs(60)).await.is_none());
        tracker.record_applied(&w).await;
        let left = tracker.remaining(&w, Duration::from_secs(60)).await.unwrap();
        assert!(left <= Duration::from_secs(60) && left > Duration::from_secs(55));
    }

    #[tokio::test]
    async fn test_workloads_are_independent() {
        let tracker = CooldownTracker::new();
        let a = WorkloadRef::new("default", "a");
        let b = WorkloadRef::new("default", "b");
        tracker.record_applied(&a).await;
        assert!(!tracker.is_eligible(&a, Duration::from_secs(60)).await);
        assert!(tracker.is_eligible(&b, Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn test_retain_forgets_departed_workloads() {
        let tracker = CooldownTracker::new();
        let a = WorkloadRef::new("default", "a");
        let b = WorkloadRef::new("default", "b");
        tracker.record_applied(&a).await;
        tracker.record_applied(&b).await;

        let live: HashSet<WorkloadRef> = [a.clone()].into_iter().collect();
        assert_eq!(tracker.retain(&live).await, 1);
        assert!(tracker.last_applied(&a).await.is_some());
        assert!(tracker.last_applied(&b).await.is_none());
    }
}
