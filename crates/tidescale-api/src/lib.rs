//! tidescale-api — external metrics surface for Tidescale.
//!
//! Serves the latest published scaling decisions to a horizontal
//! autoscaler and to operators. Handlers only read the decision store.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/apis/external.metrics.k8s.io/v1beta1` | List available metrics |
//! | GET | `/apis/external.metrics.k8s.io/v1beta1/namespaces/{ns}/{metric}` | Query a metric (`labelSelector`) |
//! | GET | `/api/v1/targets` | List target statuses |
//! | GET | `/api/v1/targets/{ns}/{name}` | Get one target status |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness |

pub mod error;
pub mod handlers;
pub mod prometheus;
pub mod provider;

use axum::Router;
use axum::routing::get;

use tidescale_autoscale::DecisionStore;

pub use error::{QueryError, QueryResult};
pub use prometheus::render_prometheus;
pub use provider::{ExternalMetricsProvider, MetricSelector, MetricValue, TARGET_NAME_LABEL};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub provider: ExternalMetricsProvider,
}

const EXTERNAL_METRICS_PREFIX: &str = "/apis/external.metrics.k8s.io/v1beta1";

/// Build the complete API router.
pub fn build_router(store: DecisionStore) -> Router {
    let state = ApiState {
        provider: ExternalMetricsProvider::new(store),
    };

    Router::new()
        .route(EXTERNAL_METRICS_PREFIX, get(handlers::list_external_metrics))
        .route(
            &format!("{EXTERNAL_METRICS_PREFIX}/namespaces/{{namespace}}/{{metric}}"),
            get(handlers::get_external_metric),
        )
        .route("/api/v1/targets", get(handlers::list_targets))
        .route("/api/v1/targets/{namespace}/{name}", get(handlers::get_target))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}
