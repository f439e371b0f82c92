//! tidescale-autoscale — trigger evaluation and scaling decisions.
//!
//! The [`ScaleHandler`] runs one polling task per registered target. Each
//! cycle fans out to every bound scaler concurrently, joins the results and
//! hands them to the pure [`reduce`] function. The decision is published to
//! the [`DecisionStore`], which the external metrics surface reads.
//!
//! # Replica Arithmetic
//!
//! ```text
//! active  = OR(result.is_active for non-errored triggers)
//! need    = max(ceil(value / target_value) for non-errored triggers)
//!
//! if active:
//!     replicas = clamp(max(need, 1), min, max)
//! elif now - last_active < cooldown:
//!     replicas = previous            // cooldown armed
//! else:
//!     replicas = idle_replicas       // min, or a fixed idle count
//! ```
//!
//! If every trigger of a cycle errors, nothing is published and the
//! previous decision keeps being served.

pub mod error;
pub mod handler;
pub mod reducer;
pub mod store;

pub use error::{HandlerError, HandlerResult};
pub use handler::{DEFAULT_CYCLE_TIMEOUT_RATIO, ScaleCallback, ScaleHandler};
pub use reducer::{TriggerOutcome, reduce};
pub use store::{DecisionStore, TargetStatus};
