//! The `prometheus` scaler evaluates an instant PromQL query.
//!
//! The query must return a single sample (vector with at most one element,
//! or a scalar). An empty vector is treated as `0` unless
//! `ignoreNullValues = "false"`, in which case it is an error.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use tidescale_core::{MetricSpec, ScalerResult, parse_duration};

use crate::error::ScalerError;
use crate::http::{DEFAULT_TIMEOUT, encode_query_component, get_json};
use crate::scaler::{Scaler, ScalerConfig, positive};

pub const TRIGGER_TYPE: &str = "prometheus";

pub struct PrometheusScaler {
    server_address: String,
    query: String,
    threshold: f64,
    activation_threshold: f64,
    ignore_null_values: bool,
    headers: Vec<(String, String)>,
    timeout: Duration,
    metric_name: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<VectorSample>),
    Scalar((f64, String)),
    Matrix(serde_json::Value),
    #[serde(rename = "string")]
    Text(serde_json::Value),
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    value: (f64, String),
}

impl PrometheusScaler {
    pub fn new(config: &ScalerConfig) -> Result<Self, ScalerError> {
        let server_address = config
            .required("serverAddress")?
            .trim_end_matches('/')
            .to_string();
        let query = config.required("query")?.to_string();
        let threshold = positive("threshold", config.f64_param("threshold", None)?)?;
        let activation_threshold = config.f64_param("activationThreshold", Some(0.0))?;
        let ignore_null_values = config.bool_param("ignoreNullValues", true)?;

        let timeout = match config.param("timeout") {
            Some(raw) => parse_duration(raw).map_err(|e| ScalerError::invalid("timeout", e.to_string()))?,
            None => DEFAULT_TIMEOUT,
        };

        let mut headers = Vec::new();
        if let Some(token) = config.auth_params.get("bearerToken") {
            headers.push(("authorization".to_string(), format!("Bearer {token}")));
        }
        if let Some(tenant) = config.param("namespace") {
            headers.push(("X-Scope-OrgID".to_string(), tenant.to_string()));
        }

        let metric_name = config.metric_name(config.param("metricName").unwrap_or("prometheus"));

        Ok(Self {
            server_address,
            query,
            threshold,
            activation_threshold,
            ignore_null_values,
            headers,
            timeout,
            metric_name,
        })
    }

    fn query_url(&self) -> String {
        format!(
            "{}/api/v1/query?query={}",
            self.server_address,
            encode_query_component(&self.query)
        )
    }

    /// Extract the single sample value from a query response.
    fn sample_value(&self, response: QueryResponse) -> Result<f64, ScalerError> {
        if response.status != "success" {
            return Err(ScalerError::Response(format!(
                "prometheus query failed: {}",
                response.error.unwrap_or(response.status)
            )));
        }

        let raw = match response.data {
            Some(QueryData::Vector(samples)) => match samples.as_slice() {
                [] if self.ignore_null_values => return Ok(0.0),
                [] => {
                    return Err(ScalerError::Response(
                        "prometheus query returned no samples".to_string(),
                    ));
                }
                [sample] => sample.value.1.clone(),
                _ => {
                    return Err(ScalerError::Response(format!(
                        "prometheus query returned {} samples, expected one",
                        samples.len()
                    )));
                }
            },
            Some(QueryData::Scalar((_, value))) => value,
            Some(other) => {
                return Err(ScalerError::Response(format!(
                    "unsupported prometheus result type: {other:?}"
                )));
            }
            None => {
                return Err(ScalerError::Response(
                    "prometheus response has no data".to_string(),
                ));
            }
        };

        let value: f64 = raw
            .parse()
            .map_err(|_| ScalerError::Response(format!("sample value `{raw}` is not a number")))?;

        if value.is_nan() {
            return if self.ignore_null_values {
                Ok(0.0)
            } else {
                Err(ScalerError::Response("prometheus sample is NaN".to_string()))
            };
        }
        if value.is_infinite() {
            return Err(ScalerError::Response("prometheus sample is infinite".to_string()));
        }
        Ok(value)
    }
}

#[async_trait]
impl Scaler for PrometheusScaler {
    async fn get_metrics_and_activity(&self) -> Result<ScalerResult, ScalerError> {
        let doc = get_json(&self.query_url(), &self.headers, self.timeout).await?;
        let response: QueryResponse = serde_json::from_value(doc)
            .map_err(|e| ScalerError::Response(format!("malformed prometheus response: {e}")))?;
        let value = self.sample_value(response)?;
        let is_active = value > self.activation_threshold;

        debug!(query = %self.query, value, is_active, "prometheus evaluated");
        Ok(ScalerResult::new(&self.metric_name, is_active, value))
    }

    fn get_metric_spec(&self) -> MetricSpec {
        MetricSpec::average(&self.metric_name, self.threshold)
    }
}
