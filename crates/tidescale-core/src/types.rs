//! Domain types for scaling intents and evaluation results.
//!
//! `ScalingTarget` and `Trigger` describe what to scale and on which
//! signals. `ScalerResult` is the outcome of one trigger evaluation and
//! `ScalingDecision` is the reduced verdict published for a target.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

// ── Identity ───────────────────────────────────────────────────────

/// Unique key of a scaling target (`{namespace}/{name}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub namespace: String,
    pub name: String,
}

impl TargetKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The workload whose replica count is driven by a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadRef {
    /// Workload kind, e.g. "Deployment" or "StatefulSet".
    pub kind: String,
    pub name: String,
}

// ── Scaling intent ─────────────────────────────────────────────────

/// Replica count used when no trigger is active and cooldown has elapsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePolicy {
    /// Collapse to `min_replicas`.
    #[default]
    MinReplicas,
    /// Collapse to a fixed count (must lie within `[min, max]`).
    Fixed(u32),
}

/// Authentication declared on a trigger.
///
/// Every map is keyed by the parameter name the scaler expects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRef {
    /// Parameter → environment variable name.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Parameter → `secret/key` reference.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    /// Workload identity provider (e.g. "aws", "azure-workload").
    #[serde(default)]
    pub pod_identity: Option<String>,
}

/// One scaling signal source within a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// Selects the scaler implementation ("metrics-api", "cron", ...).
    pub trigger_type: String,
    /// Type-specific configuration.
    pub metadata: HashMap<String, String>,
    pub auth: Option<AuthRef>,
    /// Overrides the generated metric name suffix.
    pub metric_name: Option<String>,
}

impl Trigger {
    pub fn new(trigger_type: impl Into<String>) -> Self {
        Self {
            trigger_type: trigger_type.into(),
            metadata: HashMap::new(),
            auth: None,
            metric_name: None,
        }
    }

    /// Builder-style helper to add a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// A workload plus its triggers, replica bounds and timing policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingTarget {
    pub key: TargetKey,
    pub workload: WorkloadRef,
    /// Ordered; a trigger's index is part of its metric name.
    pub triggers: Vec<Trigger>,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub polling_interval: Duration,
    pub cooldown_period: Duration,
    pub idle_policy: IdlePolicy,
}

impl ScalingTarget {
    /// Check the invariants the handler and reducer rely on.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |reason: String| ConfigError::InvalidTarget {
            target: self.key.to_string(),
            reason,
        };

        if self.triggers.is_empty() {
            return Err(invalid("at least one trigger is required".into()));
        }
        if self.max_replicas == 0 {
            return Err(invalid("max_replicas must be at least 1".into()));
        }
        if self.max_replicas < self.min_replicas {
            return Err(invalid(format!(
                "max_replicas ({}) is below min_replicas ({})",
                self.max_replicas, self.min_replicas
            )));
        }
        if self.polling_interval.is_zero() {
            return Err(invalid("polling_interval must be positive".into()));
        }
        if let IdlePolicy::Fixed(idle) = self.idle_policy
            && (idle < self.min_replicas || idle > self.max_replicas)
        {
            return Err(invalid(format!(
                "idle replica count {idle} is outside [{}, {}]",
                self.min_replicas, self.max_replicas
            )));
        }
        for (index, trigger) in self.triggers.iter().enumerate() {
            if trigger.trigger_type.trim().is_empty() {
                return Err(invalid(format!("trigger {index} has no type")));
            }
        }
        Ok(())
    }

    /// Replica count for the idle state.
    pub fn idle_replicas(&self) -> u32 {
        match self.idle_policy {
            IdlePolicy::MinReplicas => self.min_replicas,
            IdlePolicy::Fixed(n) => n,
        }
    }

    /// Clamp a replica count into `[min_replicas, max_replicas]`.
    pub fn clamp_replicas(&self, replicas: u32) -> u32 {
        replicas.clamp(self.min_replicas, self.max_replicas.max(self.min_replicas))
    }
}

// ── Metrics ────────────────────────────────────────────────────────

/// How a metric's target value is compared against observed values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MetricTargetType {
    /// Target value per replica.
    #[default]
    AverageValue,
    /// Target value for the metric as a whole.
    Value,
}

/// Declared metric of a scaler: name and target threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    pub target_value: f64,
    pub target_type: MetricTargetType,
}

impl MetricSpec {
    pub fn average(name: impl Into<String>, target_value: f64) -> Self {
        Self {
            name: name.into(),
            target_value,
            target_type: MetricTargetType::AverageValue,
        }
    }
}

/// Outcome of evaluating one trigger once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerResult {
    pub metric_name: String,
    pub is_active: bool,
    /// `None` when the source had nothing to report.
    pub metric_value: Option<f64>,
}

impl ScalerResult {
    pub fn new(metric_name: impl Into<String>, is_active: bool, metric_value: f64) -> Self {
        Self {
            metric_name: metric_name.into(),
            is_active,
            metric_value: Some(metric_value),
        }
    }

    /// A successful query that found no signal.
    pub fn inactive(metric_name: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            is_active: false,
            metric_value: None,
        }
    }
}

/// Reduced verdict for a target at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    /// Always within `[min_replicas, max_replicas]`.
    pub target_replicas: u32,
    /// Whether any trigger reported activity this cycle.
    pub is_active: bool,
    /// Unix timestamp (seconds) of the last cycle with an active trigger.
    pub last_active_at: Option<u64>,
    /// Set while the previous count is held after the last activity.
    pub cooldown_armed: bool,
    /// Latest known value per metric name.
    pub metrics: BTreeMap<String, f64>,
    /// Unix timestamp (seconds) of the cycle that produced this decision.
    pub evaluated_at: u64,
}
