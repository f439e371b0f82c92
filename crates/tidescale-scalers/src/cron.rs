//! The `cron` scaler holds a replica count during a daily time window.
//!
//! Metadata: `start` and `end` (`HH:MM`), `desiredReplicas`, and an
//! optional `timezone` given as a UTC offset (`+02:00`, `-05:30`, `UTC`).
//! A window whose end is earlier than its start wraps past midnight.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveTime, Utc};

use tidescale_core::{MetricSpec, ScalerResult};

use crate::error::ScalerError;
use crate::scaler::{Scaler, ScalerConfig};

pub const TRIGGER_TYPE: &str = "cron";

pub struct CronScaler {
    start: NaiveTime,
    end: NaiveTime,
    offset: FixedOffset,
    desired_replicas: u32,
    metric_name: String,
}

impl CronScaler {
    pub fn new(config: &ScalerConfig) -> Result<Self, ScalerError> {
        let start = parse_time("start", config.required("start")?)?;
        let end = parse_time("end", config.required("end")?)?;
        if start == end {
            return Err(ScalerError::invalid("end", "start and end must differ"));
        }

        let timezone = config.param("timezone").unwrap_or("UTC");
        let offset = parse_offset(timezone)?;

        let raw = config.required("desiredReplicas")?;
        let desired_replicas = raw
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ScalerError::invalid("desiredReplicas", "must be a positive integer"))?;

        let metric_name = config.metric_name(&format!(
            "cron-{timezone}-{}-{}",
            start.format("%H%M"),
            end.format("%H%M")
        ));

        Ok(Self {
            start,
            end,
            offset,
            desired_replicas,
            metric_name,
        })
    }

    /// Evaluate the window at a given instant.
    pub fn evaluate_at(&self, now: DateTime<Utc>) -> ScalerResult {
        let local = now.with_timezone(&self.offset).time();
        if within_window(local, self.start, self.end) {
            ScalerResult::new(&self.metric_name, true, self.desired_replicas as f64)
        } else {
            ScalerResult::new(&self.metric_name, false, 0.0)
        }
    }
}

#[async_trait]
impl Scaler for CronScaler {
    async fn get_metrics_and_activity(&self) -> Result<ScalerResult, ScalerError> {
        Ok(self.evaluate_at(Utc::now()))
    }

    fn get_metric_spec(&self) -> MetricSpec {
        // One replica per unit: the metric value is the replica count.
        MetricSpec::average(&self.metric_name, 1.0)
    }
}

/// Whether `now` lies in `[start, end)`, wrapping past midnight.
fn within_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start < end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

fn parse_time(key: &str, raw: &str) -> Result<NaiveTime, ScalerError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| ScalerError::invalid(key, format!("`{raw}` is not HH:MM")))
}

fn parse_offset(raw: &str) -> Result<FixedOffset, ScalerError> {
    let raw = raw.trim();
    let invalid = || ScalerError::invalid("timezone", format!("`{raw}` is not a UTC offset"));

    if raw.eq_ignore_ascii_case("utc") || raw == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1, &raw[1..]),
        Some(b'-') => (-1, &raw[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours = offset_component(hours).ok_or_else(invalid)?;
    let minutes = offset_component(minutes).ok_or_else(invalid)?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    let seconds = (hours * 3600 + minutes * 60) as i32;
    FixedOffset::east_opt(sign * seconds).ok_or_else(invalid)
}

/// Unsigned decimal digits only; `u32::from_str` would also take a `+`.
fn offset_component(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}
