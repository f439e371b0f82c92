//! The `cloud-queue` scaler: queue depth from a cloud queue service.
//!
//! The SDK configuration (region + credentials) comes from the shared
//! [`CredentialCache`], so every trigger using the same identity in the
//! same region shares one resolved config. Each scaler registers itself as
//! a usage at construction and releases it in [`Scaler::close`].
//!
//! Metadata: `queueURL`, `region`, `queueLength` (default 5),
//! `activationQueueLength` (default 0), `scaleOnInFlight` (default true).
//!
//! Identity comes from resolved auth params: `awsAccessKeyID` +
//! `awsSecretAccessKey` (+ `awsSessionToken`), else `podIdentity` with an
//! optional `awsRoleArn`, else anonymous.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use tidescale_core::{MetricSpec, ScalerResult};
use tidescale_core::resolver::POD_IDENTITY_PARAM;
use tidescale_credentials::{
    AuthorizationIdentity, CredentialCache, CredentialError, CredentialProvider, CredentialResult,
};

use crate::error::ScalerError;
use crate::http::{DEFAULT_TIMEOUT, get_json};
use crate::scaler::{Scaler, ScalerConfig, positive};

pub const TRIGGER_TYPE: &str = "cloud-queue";

/// Environment variable pointing at the projected workload identity token.
pub const WEB_IDENTITY_TOKEN_FILE_ENV: &str = "TIDESCALE_WEB_IDENTITY_TOKEN_FILE";

// ── Credential config ──────────────────────────────────────────────

/// Credentials carried by a [`CloudConfig`].
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(Debug))]
pub enum CloudCredentials {
    Static {
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
    },
    WebIdentity {
        role: Option<String>,
        token: String,
    },
    None,
}

/// Resolved SDK configuration for one region + identity.
#[derive(Clone, PartialEq, Eq)]
pub struct CloudConfig {
    pub region: String,
    pub credentials: CloudCredentials,
    /// Unix timestamp (seconds) when this config was resolved.
    pub resolved_at: u64,
}

impl CloudConfig {
    /// Headers identifying the caller to the queue service.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("x-tidescale-region".to_string(), self.region.clone())];
        match &self.credentials {
            CloudCredentials::Static {
                access_key_id,
                secret_access_key,
                session_token,
            } => {
                headers.push((
                    "authorization".to_string(),
                    format!("Key {access_key_id}:{secret_access_key}"),
                ));
                if let Some(token) = session_token {
                    headers.push(("x-session-token".to_string(), token.clone()));
                }
            }
            CloudCredentials::WebIdentity { role, token } => {
                headers.push(("authorization".to_string(), format!("Bearer {token}")));
                if let Some(role) = role {
                    headers.push(("x-assume-role".to_string(), role.clone()));
                }
            }
            CloudCredentials::None => {}
        }
        headers
    }
}

impl fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.credentials {
            CloudCredentials::Static { .. } => "static",
            CloudCredentials::WebIdentity { .. } => "web-identity",
            CloudCredentials::None => "none",
        };
        f.debug_struct("CloudConfig")
            .field("region", &self.region)
            .field("credentials", &kind)
            .field("resolved_at", &self.resolved_at)
            .finish()
    }
}

/// Builds [`CloudConfig`]s for the credential cache.
///
/// Pod identities read the projected token file at resolution time.
#[derive(Debug, Clone, Default)]
pub struct CloudConfigProvider {
    token_file: Option<PathBuf>,
}

impl CloudConfigProvider {
    pub fn new(token_file: Option<PathBuf>) -> Self {
        Self { token_file }
    }

    /// Read the token file location from the environment.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os(WEB_IDENTITY_TOKEN_FILE_ENV).map(PathBuf::from))
    }
}

#[async_trait]
impl CredentialProvider<CloudConfig> for CloudConfigProvider {
    async fn resolve(
        &self,
        region: &str,
        identity: &AuthorizationIdentity,
    ) -> CredentialResult<CloudConfig> {
        let credentials = match identity {
            AuthorizationIdentity::AccessKey {
                access_key_id,
                secret_access_key,
                session_token,
            } => CloudCredentials::Static {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                session_token: session_token.clone(),
            },
            AuthorizationIdentity::PodIdentity { role } => {
                let path = self.token_file.as_ref().ok_or_else(|| {
                    CredentialError::Unavailable(format!(
                        "pod identity requested but {WEB_IDENTITY_TOKEN_FILE_ENV} is not set"
                    ))
                })?;
                let token = tokio::fs::read_to_string(path).await.map_err(|e| {
                    CredentialError::Resolution {
                        region: region.to_string(),
                        reason: format!("reading {}: {e}", path.display()),
                    }
                })?;
                CloudCredentials::WebIdentity {
                    role: role.clone(),
                    token: token.trim().to_string(),
                }
            }
            AuthorizationIdentity::Anonymous => CloudCredentials::None,
        };

        Ok(CloudConfig {
            region: region.to_string(),
            credentials,
            resolved_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        })
    }
}

// ── Queue client ───────────────────────────────────────────────────

/// Fetches the current depth of a queue.
#[async_trait]
pub trait QueueDepthClient: Send + Sync {
    async fn queue_depth(&self, config: &CloudConfig, queue_url: &str) -> Result<QueueDepth, ScalerError>;
}

/// Visible and in-flight message counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    pub approximate_number_of_messages: u64,
    #[serde(default)]
    pub approximate_number_of_messages_not_visible: u64,
}

/// Reads `QueueDepth` JSON from the queue URL.
#[derive(Debug, Clone)]
pub struct HttpQueueDepthClient {
    timeout: Duration,
}

impl HttpQueueDepthClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpQueueDepthClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl QueueDepthClient for HttpQueueDepthClient {
    async fn queue_depth(&self, config: &CloudConfig, queue_url: &str) -> Result<QueueDepth, ScalerError> {
        let doc = get_json(queue_url, &config.request_headers(), self.timeout).await?;
        serde_json::from_value(doc)
            .map_err(|e| ScalerError::Response(format!("malformed queue attributes: {e}")))
    }
}

// ── Scaler ─────────────────────────────────────────────────────────

pub struct CloudQueueScaler {
    queue_url: String,
    region: String,
    identity: AuthorizationIdentity,
    consumer_id: String,
    queue_length: f64,
    activation_queue_length: f64,
    scale_on_in_flight: bool,
    metric_name: String,
    config: Arc<CloudConfig>,
    cache: Arc<CredentialCache<CloudConfig>>,
    client: Arc<dyn QueueDepthClient>,
    closed: AtomicBool,
}

impl CloudQueueScaler {
    /// Parse metadata and acquire the shared cloud config.
    pub async fn new(
        config: &ScalerConfig,
        cache: Arc<CredentialCache<CloudConfig>>,
        client: Arc<dyn QueueDepthClient>,
    ) -> Result<Self, ScalerError> {
        let queue_url = config.required("queueURL")?.to_string();
        let region = config.required("region")?.to_string();
        let queue_length = positive("queueLength", config.f64_param("queueLength", Some(5.0))?)?;
        let activation_queue_length = config.f64_param("activationQueueLength", Some(0.0))?;
        let scale_on_in_flight = config.bool_param("scaleOnInFlight", true)?;
        let identity = identity_from(config)?;

        let queue_name = queue_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("queue")
            .to_string();
        let metric_name = config.metric_name(&format!("cloud-queue-{queue_name}"));

        let consumer_id = config.consumer_id();
        let shared = cache.acquire(&region, &identity, &consumer_id).await?;
        info!(
            %consumer_id,
            %region,
            identity = %identity.label(),
            "cloud-queue scaler bound to shared config"
        );

        Ok(Self {
            queue_url,
            region,
            identity,
            consumer_id,
            queue_length,
            activation_queue_length,
            scale_on_in_flight,
            metric_name,
            config: shared,
            cache,
            client,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Scaler for CloudQueueScaler {
    async fn get_metrics_and_activity(&self) -> Result<ScalerResult, ScalerError> {
        let depth = self.client.queue_depth(&self.config, &self.queue_url).await?;
        let mut messages = depth.approximate_number_of_messages;
        if self.scale_on_in_flight {
            messages += depth.approximate_number_of_messages_not_visible;
        }
        let value = messages as f64;
        let is_active = value > self.activation_queue_length;

        debug!(queue = %self.queue_url, messages, is_active, "cloud-queue evaluated");
        Ok(ScalerResult::new(&self.metric_name, is_active, value))
    }

    fn get_metric_spec(&self) -> MetricSpec {
        MetricSpec::average(&self.metric_name, self.queue_length)
    }

    async fn close(&self) -> Result<(), ScalerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cache
            .release(&self.region, &self.identity, &self.consumer_id)
            .await;
        debug!(consumer_id = %self.consumer_id, "cloud-queue released shared config");
        Ok(())
    }
}

/// Derive the authorization identity from resolved auth params.
fn identity_from(config: &ScalerConfig) -> Result<AuthorizationIdentity, ScalerError> {
    let params = &config.auth_params;
    if let Some(access_key_id) = params.get("awsAccessKeyID") {
        let secret_access_key = params
            .get("awsSecretAccessKey")
            .ok_or_else(|| ScalerError::MissingMetadata("awsSecretAccessKey".to_string()))?;
        return Ok(AuthorizationIdentity::AccessKey {
            access_key_id: access_key_id.clone(),
            secret_access_key: secret_access_key.clone(),
            session_token: params.get("awsSessionToken").cloned(),
        });
    }
    if params.contains_key(POD_IDENTITY_PARAM) {
        return Ok(AuthorizationIdentity::PodIdentity {
            role: params.get("awsRoleArn").cloned(),
        });
    }
    Ok(AuthorizationIdentity::Anonymous)
}
