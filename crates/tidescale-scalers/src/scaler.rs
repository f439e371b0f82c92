//! The scaler capability contract.

use std::collections::HashMap;

use async_trait::async_trait;

use tidescale_core::{MetricSpec, ScalerResult, TargetKey, Trigger};

use crate::error::ScalerError;

/// Runtime evaluator for one trigger.
///
/// Implementations hold no state between polls apart from client handles.
/// Cancellation is cooperative through future drop: the handler wraps
/// every call in a deadline, so implementations must not block the
/// executor and must keep all waiting inside `.await` points.
#[async_trait]
pub trait Scaler: Send + Sync {
    /// Query the source once.
    ///
    /// `Ok` with `is_active == false` means the query succeeded and found no
    /// signal. Connectivity and authentication failures are `Err`.
    async fn get_metrics_and_activity(&self) -> Result<ScalerResult, ScalerError>;

    /// Declared metric name and target. Pure; no I/O.
    fn get_metric_spec(&self) -> MetricSpec;

    /// Release held resources. Calling more than once is a no-op.
    async fn close(&self) -> Result<(), ScalerError> {
        Ok(())
    }
}

/// Everything a factory needs to build a scaler for one trigger.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    pub target: TargetKey,
    /// Position of the trigger within its target.
    pub trigger_index: usize,
    pub trigger_type: String,
    pub metadata: HashMap<String, String>,
    /// Output of the trigger resolver.
    pub auth_params: HashMap<String, String>,
    pub metric_name: Option<String>,
}

impl ScalerConfig {
    pub fn new(
        target: &TargetKey,
        trigger_index: usize,
        trigger: &Trigger,
        auth_params: HashMap<String, String>,
    ) -> Self {
        Self {
            target: target.clone(),
            trigger_index,
            trigger_type: trigger.trigger_type.clone(),
            metadata: trigger.metadata.clone(),
            auth_params,
            metric_name: trigger.metric_name.clone(),
        }
    }

    /// Identifier used as a credential cache usage.
    pub fn consumer_id(&self) -> String {
        format!("{}#{}", self.target, self.trigger_index)
    }

    /// Look up a parameter in trigger metadata, then in resolved auth.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .or_else(|| self.auth_params.get(key))
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn required(&self, key: &str) -> Result<&str, ScalerError> {
        self.param(key)
            .ok_or_else(|| ScalerError::MissingMetadata(key.to_string()))
    }

    pub fn f64_param(&self, key: &str, default: Option<f64>) -> Result<f64, ScalerError> {
        match (self.param(key), default) {
            (Some(raw), _) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ScalerError::invalid(key, format!("`{raw}` is not a number"))),
            (None, Some(default)) => Ok(default),
            (None, None) => Err(ScalerError::MissingMetadata(key.to_string())),
        }
    }

    pub fn bool_param(&self, key: &str, default: bool) -> Result<bool, ScalerError> {
        match self.param(key) {
            Some(raw) => raw
                .trim()
                .parse::<bool>()
                .map_err(|_| ScalerError::invalid(key, format!("`{raw}` is not a boolean"))),
            None => Ok(default),
        }
    }

    /// Metric name `s{index}-{base}`, where the base is the trigger's
    /// override when set.
    pub fn metric_name(&self, base: &str) -> String {
        let base = self.metric_name.as_deref().unwrap_or(base);
        format!("s{}-{}", self.trigger_index, sanitize_metric_name(base))
    }
}

/// Lowercase and replace anything outside `[a-z0-9-]` with `-`.
pub fn sanitize_metric_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Require a strictly positive threshold.
pub(crate) fn positive(key: &str, value: f64) -> Result<f64, ScalerError> {
    if value > 0.0 {
        Ok(value)
    } else {
        Err(ScalerError::invalid(key, "must be greater than zero"))
    }
}
