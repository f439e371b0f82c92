//! Duration strings used throughout `tidescale.toml`.

use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Parse a duration string like "500ms", "30s", "5m" or "1h".
///
/// A bare integer is interpreted as seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());

    let (digits, unit): (&str, fn(u64) -> Option<Duration>) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, |ms| Some(Duration::from_millis(ms)))
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, |s| Some(Duration::from_secs(s)))
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, |m| m.checked_mul(60).map(Duration::from_secs))
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, |h| h.checked_mul(3600).map(Duration::from_secs))
    } else {
        (s, |s| Some(Duration::from_secs(s)))
    };

    let value = digits.trim().parse::<u64>().map_err(|_| invalid())?;
    unit(value).ok_or_else(invalid)
}
