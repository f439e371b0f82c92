//! The `metrics-api` scaler reads a number from a JSON HTTP endpoint.
//!
//! Metadata:
//!
//! | Key | Required | Meaning |
//! |---|---|---|
//! | `url` | yes | `http://` endpoint returning JSON |
//! | `valueLocation` | yes | dotted path to the value |
//! | `targetValue` | yes | per-replica target |
//! | `activationTargetValue` | no (0) | active when value exceeds it |
//! | `authMode` | no | `bearer` (param `token`) or `apiKey` (param `apiKey`) |
//! | `keyParamName` | no (`X-API-KEY`) | header carrying the API key |
//! | `timeout` | no (5s) | request timeout |

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use tidescale_core::{MetricSpec, ScalerResult, parse_duration};

use crate::error::ScalerError;
use crate::http::{DEFAULT_TIMEOUT, get_json, value_at};
use crate::scaler::{Scaler, ScalerConfig, positive};

pub const TRIGGER_TYPE: &str = "metrics-api";

pub struct MetricsApiScaler {
    url: String,
    value_location: String,
    target_value: f64,
    activation_target_value: f64,
    headers: Vec<(String, String)>,
    timeout: Duration,
    metric_name: String,
}

impl MetricsApiScaler {
    pub fn new(config: &ScalerConfig) -> Result<Self, ScalerError> {
        let url = config.required("url")?.to_string();
        let value_location = config.required("valueLocation")?.to_string();
        let target_value = positive("targetValue", config.f64_param("targetValue", None)?)?;
        let activation_target_value = config.f64_param("activationTargetValue", Some(0.0))?;

        let timeout = match config.param("timeout") {
            Some(raw) => parse_duration(raw).map_err(|e| ScalerError::invalid("timeout", e.to_string()))?,
            None => DEFAULT_TIMEOUT,
        };

        let mut headers = Vec::new();
        match config.param("authMode") {
            None => {}
            Some("bearer") => {
                let token = config.required("token")?;
                headers.push(("authorization".to_string(), format!("Bearer {token}")));
            }
            Some("apiKey") => {
                let key = config.required("apiKey")?;
                let header = config.param("keyParamName").unwrap_or("X-API-KEY");
                headers.push((header.to_string(), key.to_string()));
            }
            Some(other) => {
                return Err(ScalerError::invalid(
                    "authMode",
                    format!("unsupported mode `{other}` (expected bearer or apiKey)"),
                ));
            }
        }

        let metric_name = config.metric_name(&format!("metric-api-{value_location}"));

        Ok(Self {
            url,
            value_location,
            target_value,
            activation_target_value,
            headers,
            timeout,
            metric_name,
        })
    }
}

#[async_trait]
impl Scaler for MetricsApiScaler {
    async fn get_metrics_and_activity(&self) -> Result<ScalerResult, ScalerError> {
        let doc = get_json(&self.url, &self.headers, self.timeout).await?;
        let value = value_at(&doc, &self.value_location)?;
        let is_active = value > self.activation_target_value;

        debug!(url = %self.url, value, is_active, "metrics-api evaluated");
        Ok(ScalerResult::new(&self.metric_name, is_active, value))
    }

    fn get_metric_spec(&self) -> MetricSpec {
        MetricSpec::average(&self.metric_name, self.target_value)
    }
}
