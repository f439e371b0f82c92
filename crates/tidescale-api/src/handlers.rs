//! HTTP handlers.
//!
//! The external metrics routes answer in the `external.metrics.k8s.io`
//! list shapes; the operator routes use the `ApiResponse` wrapper.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::debug;

use tidescale_core::TargetKey;

use crate::ApiState;
use crate::error::QueryError;
use crate::provider::MetricSelector;

pub const EXTERNAL_METRICS_GROUP_VERSION: &str = "external.metrics.k8s.io/v1beta1";

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── External metrics ───────────────────────────────────────────

/// GET /apis/external.metrics.k8s.io/v1beta1
pub async fn list_external_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let resources: Vec<serde_json::Value> = state
        .provider
        .list_available_metrics()
        .await
        .into_iter()
        .map(|spec| {
            json!({
                "name": spec.name,
                "singularName": "",
                "namespaced": true,
                "kind": "ExternalMetricValueList",
                "verbs": ["get"],
                "targetValue": spec.target_value,
                "targetType": spec.target_type,
            })
        })
        .collect();

    Json(json!({
        "kind": "APIResourceList",
        "apiVersion": "v1",
        "groupVersion": EXTERNAL_METRICS_GROUP_VERSION,
        "resources": resources,
    }))
}

/// GET /apis/external.metrics.k8s.io/v1beta1/namespaces/:ns/:metric
pub async fn get_external_metric(
    State(state): State<ApiState>,
    Path((namespace, metric)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let labels = match MetricSelector::parse_labels(params.get("labelSelector").map_or("", String::as_str)) {
        Ok(labels) => labels,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response(),
    };
    let selector = MetricSelector {
        namespace,
        metric_name: metric,
        labels,
    };

    match state.provider.query(&selector).await {
        Ok(value) => Json(json!({
            "kind": "ExternalMetricValueList",
            "apiVersion": EXTERNAL_METRICS_GROUP_VERSION,
            "metadata": {},
            "items": [{
                "metricName": value.metric_name,
                "metricLabels": selector.labels,
                "timestamp": value.timestamp.to_rfc3339(),
                "value": quantity(value.value),
            }],
        }))
        .into_response(),
        Err(e @ QueryError::NotFound { .. }) => {
            debug!(namespace = %selector.namespace, metric = %selector.metric_name, "external metric not found");
            error_response(&e.to_string(), StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response(),
    }
}

/// Format a value as a Kubernetes quantity, using milli-units for
/// fractions.
pub fn quantity(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}m", (value * 1000.0).round() as i64)
    }
}

// ── Targets ────────────────────────────────────────────────────

/// GET /api/v1/targets
pub async fn list_targets(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.provider.store().list().await)
}

/// GET /api/v1/targets/:ns/:name
pub async fn get_target(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.provider.store().get(&TargetKey::new(namespace, name)).await {
        Some(status) => ApiResponse::ok(status).into_response(),
        None => error_response("target not found", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Prometheus / health ────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let statuses = state.provider.store().list().await;
    let body = crate::prometheus::render_prometheus(&statuses);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}
