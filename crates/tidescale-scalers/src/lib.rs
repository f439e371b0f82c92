//! tidescale-scalers — pluggable trigger evaluation.
//!
//! Every trigger type is implemented by a [`Scaler`] and constructed by a
//! [`ScalerFactory`] registered under the trigger's type string. The scale
//! handler only ever talks to `Arc<dyn Scaler>`.
//!
//! # Built-in Trigger Types
//!
//! | Type | Signal |
//! |---|---|
//! | `metrics-api` | Numeric value from a JSON HTTP endpoint |
//! | `prometheus` | Instant query against a Prometheus server |
//! | `cron` | Fixed replica count during a daily time window |
//! | `cloud-queue` | Queue depth, authenticated through the credential cache |

pub mod cloud_queue;
pub mod cron;
pub mod error;
pub mod http;
pub mod metrics_api;
pub mod prometheus;
pub mod registry;
pub mod scaler;

pub use cloud_queue::{CloudConfig, CloudConfigProvider, HttpQueueDepthClient, QueueDepthClient};
pub use error::ScalerError;
pub use registry::{BuiltinDeps, ScalerFactory, ScalerRegistry};
pub use scaler::{Scaler, ScalerConfig};
