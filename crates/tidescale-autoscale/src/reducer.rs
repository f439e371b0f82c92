//! Decision reducer: folds one cycle's trigger results into a decision.

use std::collections::BTreeMap;

use tidescale_core::{MetricSpec, ScalerResult, ScalingDecision, ScalingTarget};
use tidescale_scalers::ScalerError;

/// Result of one trigger in one cycle.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub index: usize,
    /// `None` when the trigger's scaler could not be constructed.
    pub spec: Option<MetricSpec>,
    pub result: Result<ScalerResult, ScalerError>,
}

impl TriggerOutcome {
    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }
}

/// Reduce `outcomes` into a decision at `now` (unix seconds).
///
/// Errored triggers are excluded from activity and replica need; their
/// previously published metric value is carried over.
pub fn reduce(
    target: &ScalingTarget,
    previous: Option<&ScalingDecision>,
    outcomes: &[TriggerOutcome],
    now: u64,
) -> ScalingDecision {
    let mut metrics = BTreeMap::new();
    let mut is_active = false;
    let mut need: u32 = 0;

    for outcome in outcomes {
        let Some(spec) = &outcome.spec else {
            continue;
        };
        match &outcome.result {
            Ok(result) => {
                is_active |= result.is_active;
                let value = result.metric_value.unwrap_or(0.0);
                metrics.insert(spec.name.clone(), value);
                need = need.max(replicas_for(value, spec.target_value));
            }
            Err(_) => {
                if let Some(value) = previous.and_then(|p| p.metrics.get(&spec.name)) {
                    metrics.insert(spec.name.clone(), *value);
                }
            }
        }
    }

    if is_active {
        return ScalingDecision {
            target_replicas: target.clamp_replicas(need.max(1)),
            is_active: true,
            last_active_at: Some(now),
            cooldown_armed: false,
            metrics,
            evaluated_at: now,
        };
    }

    let last_active_at = previous.and_then(|p| p.last_active_at);
    let cooling = last_active_at
        .is_some_and(|at| now.saturating_sub(at) < target.cooldown_period.as_secs());

    let target_replicas = match (cooling, previous) {
        (true, Some(previous)) => target.clamp_replicas(previous.target_replicas),
        _ => target.idle_replicas(),
    };

    ScalingDecision {
        target_replicas,
        is_active: false,
        last_active_at,
        cooldown_armed: cooling,
        metrics,
        evaluated_at: now,
    }
}

/// `ceil(value / target)`, saturating; non-positive values need nothing.
fn replicas_for(value: f64, target: f64) -> u32 {
    if !(value > 0.0) || !(target > 0.0) {
        return 0;
    }
    // `as` saturates at u32::MAX.
    (value / target).ceil() as u32
}
