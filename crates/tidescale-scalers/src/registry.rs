//! Trigger type → scaler factory registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use tidescale_credentials::CredentialCache;

use crate::cloud_queue::{self, CloudConfig, CloudQueueScaler, QueueDepthClient};
use crate::cron::{self, CronScaler};
use crate::error::ScalerError;
use crate::metrics_api::{self, MetricsApiScaler};
use crate::prometheus::{self, PrometheusScaler};
use crate::scaler::{Scaler, ScalerConfig};

/// Builds a scaler for one trigger.
#[async_trait]
pub trait ScalerFactory: Send + Sync {
    async fn build(&self, config: ScalerConfig) -> Result<Arc<dyn Scaler>, ScalerError>;
}

pub type BuildFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn Scaler>, ScalerError>> + Send>>;

struct FnFactory<F>(F);

#[async_trait]
impl<F> ScalerFactory for FnFactory<F>
where
    F: Fn(ScalerConfig) -> BuildFuture + Send + Sync,
{
    async fn build(&self, config: ScalerConfig) -> Result<Arc<dyn Scaler>, ScalerError> {
        (self.0)(config).await
    }
}

/// Shared collaborators of the built-in scalers.
#[derive(Clone)]
pub struct BuiltinDeps {
    pub credentials: Arc<CredentialCache<CloudConfig>>,
    pub queue_client: Arc<dyn QueueDepthClient>,
}

#[derive(Default, Clone)]
pub struct ScalerRegistry {
    factories: HashMap<String, Arc<dyn ScalerFactory>>,
}

impl ScalerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in trigger type.
    pub fn with_builtin(deps: BuiltinDeps) -> Self {
        let mut registry = Self::new();

        registry.register_fn(metrics_api::TRIGGER_TYPE, |config| {
            Box::pin(async move { Ok::<_, ScalerError>(Arc::new(MetricsApiScaler::new(&config)?) as Arc<dyn Scaler>) })
        });
        registry.register_fn(prometheus::TRIGGER_TYPE, |config| {
            Box::pin(async move { Ok::<_, ScalerError>(Arc::new(PrometheusScaler::new(&config)?) as Arc<dyn Scaler>) })
        });
        registry.register_fn(cron::TRIGGER_TYPE, |config| {
            Box::pin(async move { Ok::<_, ScalerError>(Arc::new(CronScaler::new(&config)?) as Arc<dyn Scaler>) })
        });
        registry.register_fn(cloud_queue::TRIGGER_TYPE, move |config| {
            let deps = deps.clone();
            Box::pin(async move {
                let scaler = CloudQueueScaler::new(&config, deps.credentials, deps.queue_client).await?;
                Ok::<_, ScalerError>(Arc::new(scaler) as Arc<dyn Scaler>)
            })
        });

        registry
    }

    /// Register (or replace) the factory for a trigger type.
    pub fn register(&mut self, trigger_type: impl Into<String>, factory: Arc<dyn ScalerFactory>) {
        let trigger_type = trigger_type.into();
        debug!(%trigger_type, "scaler factory registered");
        self.factories.insert(trigger_type, factory);
    }

    pub fn register_fn<F>(&mut self, trigger_type: impl Into<String>, build: F)
    where
        F: Fn(ScalerConfig) -> BuildFuture + Send + Sync + 'static,
    {
        self.register(trigger_type, Arc::new(FnFactory(build)));
    }

    pub fn contains(&self, trigger_type: &str) -> bool {
        self.factories.contains_key(trigger_type)
    }

    /// Registered trigger types, sorted.
    pub fn trigger_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Construct the scaler for `config.trigger_type`.
    pub async fn build(&self, config: ScalerConfig) -> Result<Arc<dyn Scaler>, ScalerError> {
        let factory = self
            .factories
            .get(&config.trigger_type)
            .ok_or_else(|| ScalerError::UnknownType(config.trigger_type.clone()))?;
        factory.build(config).await
    }
}
