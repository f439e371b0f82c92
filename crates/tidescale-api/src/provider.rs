//! External metrics provider: answers metric queries from the
//! last published decisions. Never waits on a running cycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tidescale_autoscale::{DecisionStore, TargetStatus};
use tidescale_core::{MetricSpec, TargetKey};

use crate::error::{QueryError, QueryResult};

/// Label that pins a query to one target by name.
pub const TARGET_NAME_LABEL: &str = "scaledobject.tidescale.io/name";

/// Metric name plus the namespace and labels identifying a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSelector {
    pub namespace: String,
    pub metric_name: String,
    pub labels: BTreeMap<String, String>,
}

impl MetricSelector {
    pub fn new(namespace: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            metric_name: metric_name.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Parse an equality selector such as `a=b,c==d`.
    pub fn parse_labels(raw: &str) -> QueryResult<BTreeMap<String, String>> {
        let mut labels = BTreeMap::new();
        for term in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
                .ok_or_else(|| QueryError::InvalidSelector(format!("`{term}` is not key=value")))?;
            let key = key.trim();
            if key.is_empty() || key.ends_with('!') {
                return Err(QueryError::InvalidSelector(format!(
                    "`{term}` is not an equality requirement"
                )));
            }
            labels.insert(key.to_string(), value.trim().to_string());
        }
        Ok(labels)
    }
}

/// Latest value of one metric for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValue {
    pub metric_name: String,
    pub target: TargetKey,
    pub value: f64,
    /// Replica count of the decision the value belongs to.
    pub target_replicas: u32,
    pub is_active: bool,
    pub cooldown_armed: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExternalMetricsProvider {
    store: DecisionStore,
}

impl ExternalMetricsProvider {
    pub fn new(store: DecisionStore) -> Self {
        Self { store }
    }

    /// Latest published value for the selected metric.
    ///
    /// Without a target-name label, the first matching target in key order
    /// answers.
    pub async fn query(&self, selector: &MetricSelector) -> QueryResult<MetricValue> {
        let not_found = || QueryError::NotFound {
            namespace: selector.namespace.clone(),
            metric: selector.metric_name.clone(),
        };
        let wanted_name = selector.labels.get(TARGET_NAME_LABEL);

        let statuses = self.store.list().await;
        let status = statuses
            .iter()
            .filter(|s| s.key.namespace == selector.namespace)
            .filter(|s| wanted_name.is_none_or(|name| *name == s.key.name))
            .find(|s| publishes(s, &selector.metric_name))
            .ok_or_else(not_found)?;

        let decision = status.decision.as_ref().ok_or_else(not_found)?;
        let value = decision
            .metrics
            .get(&selector.metric_name)
            .copied()
            .ok_or_else(not_found)?;

        Ok(MetricValue {
            metric_name: selector.metric_name.clone(),
            target: status.key.clone(),
            value,
            target_replicas: decision.target_replicas,
            is_active: decision.is_active,
            cooldown_armed: decision.cooldown_armed,
            timestamp: DateTime::from_timestamp(decision.evaluated_at as i64, 0).unwrap_or_default(),
        })
    }

    /// Specs of every registered target's built scalers, sorted and
    /// unique by name. The first target in key order wins a name clash.
    pub async fn list_available_metrics(&self) -> Vec<MetricSpec> {
        let mut specs: Vec<MetricSpec> = self
            .store
            .list()
            .await
            .into_iter()
            .flat_map(|s| s.metric_specs)
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs.dedup_by(|a, b| a.name == b.name);
        specs
    }

    pub fn store(&self) -> &DecisionStore {
        &self.store
    }
}

fn publishes(status: &TargetStatus, metric_name: &str) -> bool {
    status.metric_specs.iter().any(|spec| spec.name == metric_name)
        || status
            .decision
            .as_ref()
            .is_some_and(|d| d.metrics.contains_key(metric_name))
}
