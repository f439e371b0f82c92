//! Trigger credential resolution.
//!
//! A `TriggerResolver` turns a trigger's declared authentication into a
//! flat parameter map that scalers consume as opaque key/value input.
//! `StaticResolver` is the built-in implementation: it reads environment
//! variables from a captured environment (with `$(VAR)` expansion) and
//! secrets from the `[secrets]` table of `tidescale.toml`.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ResolveError;
use crate::interpolate::interpolate;
use crate::types::{TargetKey, Trigger};

/// Parameter name under which the pod identity provider is exposed.
pub const POD_IDENTITY_PARAM: &str = "podIdentity";

/// Resolves a trigger's authentication into scaler parameters.
#[async_trait]
pub trait TriggerResolver: Send + Sync {
    async fn resolve(
        &self,
        target: &TargetKey,
        trigger: &Trigger,
    ) -> Result<HashMap<String, String>, ResolveError>;
}

/// Resolver backed by an environment snapshot and an in-memory secret table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    env: HashMap<String, String>,
    /// secret name → key → value.
    secrets: HashMap<String, HashMap<String, String>>,
}

impl StaticResolver {
    pub fn new(
        env: HashMap<String, String>,
        secrets: HashMap<String, HashMap<String, String>>,
    ) -> Self {
        Self { env, secrets }
    }

    /// Capture the current process environment.
    pub fn from_process_env(secrets: HashMap<String, HashMap<String, String>>) -> Self {
        Self::new(std::env::vars().collect(), secrets)
    }

    fn env_value(&self, var: &str) -> Result<String, ResolveError> {
        let raw = self
            .env
            .get(var)
            .ok_or_else(|| ResolveError::MissingEnv(var.to_string()))?;
        Ok(interpolate(raw, |name| self.env.get(name).cloned()))
    }

    fn secret_value(&self, reference: &str) -> Result<String, ResolveError> {
        let (secret, key) = reference
            .split_once('/')
            .filter(|(s, k)| !s.is_empty() && !k.is_empty())
            .ok_or_else(|| ResolveError::MalformedReference(reference.to_string()))?;

        let entries = self
            .secrets
            .get(secret)
            .ok_or_else(|| ResolveError::MissingSecret(secret.to_string()))?;

        entries
            .get(key)
            .cloned()
            .ok_or_else(|| ResolveError::MissingSecretKey {
                secret: secret.to_string(),
                key: key.to_string(),
            })
    }
}

#[async_trait]
impl TriggerResolver for StaticResolver {
    async fn resolve(
        &self,
        target: &TargetKey,
        trigger: &Trigger,
    ) -> Result<HashMap<String, String>, ResolveError> {
        let mut params = HashMap::new();
        let Some(auth) = &trigger.auth else {
            return Ok(params);
        };

        for (param, var) in &auth.env {
            params.insert(param.clone(), self.env_value(var)?);
        }
        // Secrets win over env entries for the same parameter.
        for (param, reference) in &auth.secrets {
            params.insert(param.clone(), self.secret_value(reference)?);
        }
        if let Some(provider) = &auth.pod_identity {
            params.insert(POD_IDENTITY_PARAM.to_string(), provider.clone());
        }

        debug!(
            target = %target,
            trigger = %trigger.trigger_type,
            params = params.len(),
            "resolved trigger authentication"
        );
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuthRef;

    fn resolver() -> StaticResolver {
        let env = HashMap::from([
            ("QUEUE_HOST".to_string(), "mq.internal".to_string()),
            ("QUEUE_URL".to_string(), "amqp://$(QUEUE_HOST)/jobs".to_string()),
        ]);
        let secrets = HashMap::from([(
            "queue-creds".to_string(),
            HashMap::from([("token".to_string(), "s3cr3t".to_string())]),
        )]);
        StaticResolver::new(env, secrets)
    }

    fn trigger_with(auth: AuthRef) -> Trigger {
        let mut trigger = Trigger::new("metrics-api");
        trigger.auth = Some(auth);
        trigger
    }

    fn key() -> TargetKey {
        TargetKey::new("default", "worker")
    }

    #[tokio::test]
    async fn no_auth_resolves_to_empty_map() {
        let params = resolver()
            .resolve(&key(), &Trigger::new("cron"))
            .await
            .unwrap();
        assert!(params.is_empty());
    }

    #[tokio::test]
    async fn env_values_are_interpolated() {
        let trigger = trigger_with(AuthRef {
            env: HashMap::from([("host".to_string(), "QUEUE_URL".to_string())]),
            ..Default::default()
        });
        let params = resolver().resolve(&key(), &trigger).await.unwrap();
        assert_eq!(params["host"], "amqp://mq.internal/jobs");
    }

    #[tokio::test]
    async fn secrets_and_pod_identity_resolve() {
        let trigger = trigger_with(AuthRef {
            secrets: HashMap::from([("token".to_string(), "queue-creds/token".to_string())]),
            pod_identity: Some("aws".to_string()),
            ..Default::default()
        });
        let params = resolver().resolve(&key(), &trigger).await.unwrap();
        assert_eq!(params["token"], "s3cr3t");
        assert_eq!(params[POD_IDENTITY_PARAM], "aws");
    }

    #[tokio::test]
    async fn missing_env_is_an_error() {
        let trigger = trigger_with(AuthRef {
            env: HashMap::from([("host".to_string(), "NOPE".to_string())]),
            ..Default::default()
        });
        let err = resolver().resolve(&key(), &trigger).await.unwrap_err();
        assert_eq!(err, ResolveError::MissingEnv("NOPE".to_string()));
    }

    #[tokio::test]
    async fn bad_secret_references_are_errors() {
        let cases = [
            ("no-slash", ResolveError::MalformedReference("no-slash".to_string())),
            ("other/token", ResolveError::MissingSecret("other".to_string())),
            (
                "queue-creds/password",
                ResolveError::MissingSecretKey {
                    secret: "queue-creds".to_string(),
                    key: "password".to_string(),
                },
            ),
        ];

        for (reference, expected) in cases {
            let trigger = trigger_with(AuthRef {
                secrets: HashMap::from([("p".to_string(), reference.to_string())]),
                ..Default::default()
            });
            let err = resolver().resolve(&key(), &trigger).await.unwrap_err();
            assert_eq!(err, expected, "reference {reference}");
        }
    }
}
