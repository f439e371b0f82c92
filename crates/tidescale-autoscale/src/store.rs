//! Published decisions and per-target status.
//!
//! One writer per key (the target's polling task), many readers (the
//! query surface). Readers always see the last published snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use tidescale_core::{MetricSpec, ScalingDecision, ScalingTarget, TargetKey, WorkloadRef};

/// Everything known about one registered target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetStatus {
    pub key: TargetKey,
    pub workload: WorkloadRef,
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Last published decision; survives failed cycles.
    pub decision: Option<ScalingDecision>,
    /// Specs of the triggers whose scalers are currently built.
    pub metric_specs: Vec<MetricSpec>,
    /// Triggers that errored in the last cycle.
    pub failing_triggers: usize,
    /// Cycles in a row in which every trigger errored.
    pub consecutive_failures: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionStore {
    inner: Arc<RwLock<HashMap<TargetKey, TargetStatus>>>,
}

impl DecisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a target's definition, keeping any published
    /// decision.
    pub async fn upsert_target(&self, target: &ScalingTarget, metric_specs: Vec<MetricSpec>) {
        let mut inner = self.inner.write().await;
        let status = inner
            .entry(target.key.clone())
            .or_insert_with(|| TargetStatus {
                key: target.key.clone(),
                workload: target.workload.clone(),
                min_replicas: target.min_replicas,
                max_replicas: target.max_replicas,
                decision: None,
                metric_specs: Vec::new(),
                failing_triggers: 0,
                consecutive_failures: 0,
                last_error: None,
            });
        status.workload = target.workload.clone();
        status.min_replicas = target.min_replicas;
        status.max_replicas = target.max_replicas;
        status.metric_specs = metric_specs;
    }

    pub async fn set_metric_specs(&self, key: &TargetKey, metric_specs: Vec<MetricSpec>) {
        if let Some(status) = self.inner.write().await.get_mut(key) {
            status.metric_specs = metric_specs;
        }
    }

    /// Publish a cycle's decision. Returns the previously published one.
    pub async fn publish(
        &self,
        key: &TargetKey,
        decision: ScalingDecision,
        failing_triggers: usize,
        last_error: Option<String>,
    ) -> Option<ScalingDecision> {
        let mut inner = self.inner.write().await;
        let status = inner.get_mut(key)?;
        status.failing_triggers = failing_triggers;
        status.consecutive_failures = 0;
        if last_error.is_some() {
            status.last_error = last_error;
        }
        status.decision.replace(decision)
    }

    /// Record a cycle in which every trigger errored. The decision is kept.
    pub async fn record_failure(&self, key: &TargetKey, failing_triggers: usize, error: String) -> u64 {
        let mut inner = self.inner.write().await;
        match inner.get_mut(key) {
            Some(status) => {
                status.failing_triggers = failing_triggers;
                status.consecutive_failures += 1;
                status.last_error = Some(error);
                status.consecutive_failures
            }
            None => 0,
        }
    }

    pub async fn remove(&self, key: &TargetKey) -> Option<TargetStatus> {
        self.inner.write().await.remove(key)
    }

    pub async fn get(&self, key: &TargetKey) -> Option<TargetStatus> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn decision(&self, key: &TargetKey) -> Option<ScalingDecision> {
        self.inner
            .read()
            .await
            .get(key)
            .and_then(|s| s.decision.clone())
    }

    /// All statuses, ordered by key.
    pub async fn list(&self) -> Vec<TargetStatus> {
        let mut statuses: Vec<TargetStatus> = self.inner.read().await.values().cloned().collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tidescale_core::{IdlePolicy, Trigger};

    fn target(name: &str) -> ScalingTarget {
        ScalingTarget {
            key: TargetKey::new("default", name),
            workload: WorkloadRef {
                kind: "Deployment".to_string(),
                name: name.to_string(),
            },
            triggers: vec![Trigger::new("cron")],
            min_replicas: 0,
            max_replicas: 5,
            polling_interval: Duration::from_secs(30),
            cooldown_period: Duration::from_secs(60),
            idle_policy: IdlePolicy::MinReplicas,
        }
    }

    fn decision(replicas: u32) -> ScalingDecision {
        ScalingDecision {
            target_replicas: replicas,
            is_active: replicas > 0,
            last_active_at: None,
            cooldown_armed: false,
            metrics: BTreeMap::new(),
            evaluated_at: 1,
        }
    }

    #[tokio::test]
    async fn failure_keeps_last_decision() {
        let store = DecisionStore::new();
        let t = target("api");
        store.upsert_target(&t, vec![MetricSpec::average("s0-cron", 1.0)]).await;

        assert_eq!(store.publish(&t.key, decision(3), 0, None).await, None);
        assert_eq!(store.record_failure(&t.key, 1, "timeout".to_string()).await, 1);
        assert_eq!(store.record_failure(&t.key, 1, "timeout".to_string()).await, 2);

        let status = store.get(&t.key).await.unwrap();
        assert_eq!(status.decision.unwrap().target_replicas, 3);
        assert_eq!(status.last_error.as_deref(), Some("timeout"));

        store.publish(&t.key, decision(4), 0, None).await;
        assert_eq!(store.get(&t.key).await.unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn upsert_preserves_decision() {
        let store = DecisionStore::new();
        let mut t = target("api");
        store.upsert_target(&t, Vec::new()).await;
        store.publish(&t.key, decision(2), 0, None).await;

        t.max_replicas = 9;
        store.upsert_target(&t, Vec::new()).await;
        let status = store.get(&t.key).await.unwrap();
        assert_eq!(status.max_replicas, 9);
        assert_eq!(store.decision(&t.key).await.unwrap().target_replicas, 2);
    }

    #[tokio::test]
    async fn publish_to_unknown_target_is_dropped() {
        let store = DecisionStore::new();
        let key = TargetKey::new("default", "ghost");
        assert_eq!(store.publish(&key, decision(1), 0, None).await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn list_is_sorted() {
        let store = DecisionStore::new();
        for name in ["zeta", "alpha", "mid"] {
            store.upsert_target(&target(name), Vec::new()).await;
        }
        let names: Vec<String> = store.list().await.into_iter().map(|s| s.key.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);

        store.remove(&TargetKey::new("default", "mid")).await;
        assert_eq!(store.len().await, 2);
    }
}
