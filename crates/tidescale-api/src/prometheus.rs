//! Prometheus text exposition of target status.

use tidescale_autoscale::TargetStatus;

/// Render target statuses into Prometheus text format.
///
/// Targets without a published decision only contribute the failure
/// gauges.
pub fn render_prometheus(statuses: &[TargetStatus]) -> String {
    let mut out = String::new();

    out.push_str("# HELP tidescale_targets Number of registered scaling targets.\n");
    out.push_str("# TYPE tidescale_targets gauge\n");
    out.push_str(&format!("tidescale_targets {}\n", statuses.len()));

    out.push_str("# HELP tidescale_target_replicas Replica count of the last published decision.\n");
    out.push_str("# TYPE tidescale_target_replicas gauge\n");
    for s in statuses {
        if let Some(d) = &s.decision {
            out.push_str(&format!(
                "tidescale_target_replicas{{{}}} {}\n",
                target_labels(s),
                d.target_replicas
            ));
        }
    }

    out.push_str("# HELP tidescale_target_active Whether any trigger was active in the last decision.\n");
    out.push_str("# TYPE tidescale_target_active gauge\n");
    for s in statuses {
        if let Some(d) = &s.decision {
            out.push_str(&format!(
                "tidescale_target_active{{{}}} {}\n",
                target_labels(s),
                u8::from(d.is_active)
            ));
        }
    }

    out.push_str("# HELP tidescale_target_cooldown Whether the last decision holds replicas during cooldown.\n");
    out.push_str("# TYPE tidescale_target_cooldown gauge\n");
    for s in statuses {
        if let Some(d) = &s.decision {
            out.push_str(&format!(
                "tidescale_target_cooldown{{{}}} {}\n",
                target_labels(s),
                u8::from(d.cooldown_armed)
            ));
        }
    }

    out.push_str("# HELP tidescale_trigger_metric_value Latest value per trigger metric.\n");
    out.push_str("# TYPE tidescale_trigger_metric_value gauge\n");
    for s in statuses {
        if let Some(d) = &s.decision {
            for (metric, value) in &d.metrics {
                out.push_str(&format!(
                    "tidescale_trigger_metric_value{{{},metric=\"{}\"}} {:.4}\n",
                    target_labels(s),
                    escape(metric),
                    value
                ));
            }
        }
    }

    out.push_str("# HELP tidescale_failing_triggers Triggers that errored in the last cycle.\n");
    out.push_str("# TYPE tidescale_failing_triggers gauge\n");
    for s in statuses {
        out.push_str(&format!(
            "tidescale_failing_triggers{{{}}} {}\n",
            target_labels(s),
            s.failing_triggers
        ));
    }

    out.push_str("# HELP tidescale_cycle_failures Consecutive cycles in which every trigger errored.\n");
    out.push_str("# TYPE tidescale_cycle_failures gauge\n");
    for s in statuses {
        out.push_str(&format!(
            "tidescale_cycle_failures{{{}}} {}\n",
            target_labels(s),
            s.consecutive_failures
        ));
    }

    out
}

fn target_labels(status: &TargetStatus) -> String {
    format!(
        "namespace=\"{}\",name=\"{}\"",
        escape(&status.key.namespace),
        escape(&status.key.name)
    )
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
