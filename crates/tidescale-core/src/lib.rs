//! tidescale-core — shared types for the Tidescale autoscaler.
//!
//! Holds the scaling-intent data model (`ScalingTarget`, `Trigger`),
//! per-cycle results (`ScalerResult`, `ScalingDecision`), the
//! `tidescale.toml` parser, and the trigger credential resolver contract.
//!
//! # Data Flow
//!
//! ```text
//! tidescale.toml ──► TidescaleConfig ──► Vec<ScalingTarget>
//!                                            │
//!                         TriggerResolver ◄──┤ (per trigger)
//!                               │            │
//!                     auth params map ──► Scaler (tidescale-scalers)
//! ```

pub mod config;
pub mod duration;
pub mod error;
pub mod interpolate;
pub mod resolver;
pub mod types;

pub use config::TidescaleConfig;
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult, ResolveError};
pub use interpolate::interpolate;
pub use resolver::{StaticResolver, TriggerResolver};
pub use types::*;
