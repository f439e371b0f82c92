//! tidescale.toml configuration parser.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};
use crate::types::{AuthRef, IdlePolicy, ScalingTarget, TargetKey, Trigger, WorkloadRef};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:6443";
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_COOLDOWN_PERIOD: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_REPLICAS: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TidescaleConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// secret name → key → value, consumed by the static resolver.
    #[serde(default)]
    pub secrets: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    pub polling_interval: Option<String>,
    pub cooldown_period: Option<String>,
    /// Fraction of the polling interval a cycle may run before scalers are
    /// cancelled.
    pub cycle_timeout_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    pub workload: Option<WorkloadConfig>,
    pub min_replicas: Option<u32>,
    pub max_replicas: Option<u32>,
    pub polling_interval: Option<String>,
    pub cooldown_period: Option<String>,
    pub idle_replica_count: Option<u32>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    #[serde(default = "default_workload_kind")]
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub trigger_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub auth: Option<AuthRef>,
    pub metric_name: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_workload_kind() -> String {
    "Deployment".to_string()
}

impl TidescaleConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn listen_address(&self) -> &str {
        self.server.listen.as_deref().unwrap_or(DEFAULT_LISTEN)
    }

    /// Build validated scaling targets from the `[[targets]]` tables.
    pub fn scaling_targets(&self) -> ConfigResult<Vec<ScalingTarget>> {
        let default_interval = match &self.defaults.polling_interval {
            Some(s) => parse_duration(s)?,
            None => DEFAULT_POLLING_INTERVAL,
        };
        let default_cooldown = match &self.defaults.cooldown_period {
            Some(s) => parse_duration(s)?,
            None => DEFAULT_COOLDOWN_PERIOD,
        };

        let mut seen = std::collections::HashSet::new();
        let mut targets = Vec::with_capacity(self.targets.len());

        for tc in &self.targets {
            let target = tc.to_target(default_interval, default_cooldown)?;
            if !seen.insert(target.key.clone()) {
                return Err(ConfigError::InvalidTarget {
                    target: target.key.to_string(),
                    reason: "declared more than once".to_string(),
                });
            }
            targets.push(target);
        }
        Ok(targets)
    }

    /// Parse-and-validate everything without starting anything.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(ratio) = self.defaults.cycle_timeout_ratio
            && !(ratio > 0.0 && ratio <= 1.0)
        {
            return Err(ConfigError::Parse(format!(
                "cycle_timeout_ratio must be in (0, 1], got {ratio}"
            )));
        }
        self.scaling_targets().map(|_| ())
    }
}

impl TargetConfig {
    fn to_target(
        &self,
        default_interval: Duration,
        default_cooldown: Duration,
    ) -> ConfigResult<ScalingTarget> {
        let polling_interval = match &self.polling_interval {
            Some(s) => parse_duration(s)?,
            None => default_interval,
        };
        let cooldown_period = match &self.cooldown_period {
            Some(s) => parse_duration(s)?,
            None => default_cooldown,
        };

        let workload = match &self.workload {
            Some(w) => WorkloadRef {
                kind: w.kind.clone(),
                name: w.name.clone(),
            },
            None => WorkloadRef {
                kind: default_workload_kind(),
                name: self.name.clone(),
            },
        };

        let target = ScalingTarget {
            key: TargetKey::new(&self.namespace, &self.name),
            workload,
            triggers: self.triggers.iter().map(TriggerConfig::to_trigger).collect(),
            min_replicas: self.min_replicas.unwrap_or(0),
            max_replicas: self.max_replicas.unwrap_or(DEFAULT_MAX_REPLICAS),
            polling_interval,
            cooldown_period,
            idle_policy: self
                .idle_replica_count
                .map(IdlePolicy::Fixed)
                .unwrap_or_default(),
        };
        target.validate()?;
        Ok(target)
    }
}

impl TriggerConfig {
    fn to_trigger(&self) -> Trigger {
        Trigger {
            trigger_type: self.trigger_type.clone(),
            metadata: self.metadata.clone(),
            auth: self.auth.clone(),
            metric_name: self.metric_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[server]
listen = "127.0.0.1:9000"

[defaults]
polling_interval = "15s"
cooldown_period = "2m"

[secrets.queue-creds]
token = "abc"

[[targets]]
namespace = "jobs"
name = "worker"
min_replicas = 1
max_replicas = 8

[targets.workload]
kind = "StatefulSet"
name = "worker-set"

[[targets.triggers]]
type = "metrics-api"
metric_name = "backlog"

[targets.triggers.metadata]
url = "http://127.0.0.1:8080/stats"
valueLocation = "queue.depth"
targetValue = "10"

[targets.triggers.auth.secrets]
token = "queue-creds/token"

[[targets]]
name = "nightly"
polling_interval = "1m"
idle_replica_count = 0

[[targets.triggers]]
type = "cron"
metadata = { start = "22:00", end = "23:30", desiredReplicas = "3" }
"#;

    #[test]
    fn parse_sample_config() {
        let config = TidescaleConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.listen_address(), "127.0.0.1:9000");
        assert_eq!(config.secrets["queue-creds"]["token"], "abc");

        let targets = config.scaling_targets().unwrap();
        assert_eq!(targets.len(), 2);

        let worker = &targets[0];
        assert_eq!(worker.key, TargetKey::new("jobs", "worker"));
        assert_eq!(worker.workload.kind, "StatefulSet");
        assert_eq!(worker.polling_interval, Duration::from_secs(15));
        assert_eq!(worker.cooldown_period, Duration::from_secs(120));
        assert_eq!(worker.triggers[0].metric_name.as_deref(), Some("backlog"));
        let auth = worker.triggers[0].auth.as_ref().unwrap();
        assert_eq!(auth.secrets["token"], "queue-creds/token");

        let nightly = &targets[1];
        assert_eq!(nightly.key.namespace, "default");
        assert_eq!(nightly.workload.name, "nightly");
        assert_eq!(nightly.max_replicas, DEFAULT_MAX_REPLICAS);
        assert_eq!(nightly.polling_interval, Duration::from_secs(60));
        assert_eq!(nightly.idle_policy, IdlePolicy::Fixed(0));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = TidescaleConfig::parse("").unwrap();
        assert_eq!(config.listen_address(), DEFAULT_LISTEN);
        assert!(config.scaling_targets().unwrap().is_empty());
    }

    #[test]
    fn target_without_triggers_rejected() {
        let config = TidescaleConfig::parse("[[targets]]\nname = \"bare\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_targets_rejected() {
        let toml = r#"
[[targets]]
name = "a"
[[targets.triggers]]
type = "cron"

[[targets]]
name = "a"
[[targets.triggers]]
type = "cron"
"#;
        let config = TidescaleConfig::parse(toml).unwrap();
        let err = config.scaling_targets().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn bad_duration_rejected() {
        let toml = r#"
[defaults]
polling_interval = "often"
"#;
        let config = TidescaleConfig::parse(toml).unwrap();
        assert!(matches!(
            config.scaling_targets(),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn bad_cycle_ratio_rejected() {
        let config = TidescaleConfig::parse("[defaults]\ncycle_timeout_ratio = 1.5\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = TidescaleConfig::from_file(file.path()).unwrap();
        assert_eq!(config.targets.len(), 2);
    }

    #[test]
    fn from_file_missing_is_read_error() {
        let err = TidescaleConfig::from_file(Path::new("/nonexistent/tidescale.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read(_)));
    }
}
