//! Daemon wiring: builds every subsystem from `tidescale.toml` and runs
//! until Ctrl-C.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{debug, error, info};

use tidescale_autoscale::{DecisionStore, ScaleCallback, ScaleHandler};
use tidescale_core::{StaticResolver, TargetKey, TidescaleConfig, WorkloadRef};
use tidescale_credentials::CredentialCache;
use tidescale_scalers::{
    BuiltinDeps, CloudConfig, CloudConfigProvider, HttpQueueDepthClient, ScalerRegistry,
};

/// How often credential cache statistics are logged.
const CACHE_STATS_INTERVAL: Duration = Duration::from_secs(300);

/// Run the daemon.
pub async fn run(config_path: &Path, listen: Option<String>) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "Tidescale daemon starting");

    let config = load_config(config_path)?;
    let targets = config.scaling_targets()?;
    let listen = listen.unwrap_or_else(|| config.listen_address().to_string());

    // ── Initialize subsystems ──────────────────────────────────

    let credentials: Arc<CredentialCache<CloudConfig>> =
        Arc::new(CredentialCache::new(Arc::new(CloudConfigProvider::from_env())));
    let registry = Arc::new(builtin_registry(credentials.clone()));
    info!(trigger_types = ?registry.trigger_types(), "scaler registry initialized");

    let resolver = Arc::new(StaticResolver::from_process_env(config.secrets.clone()));
    let store = DecisionStore::new();

    let mut handler = ScaleHandler::new(registry, resolver, store.clone()).with_callback(logging_callback());
    if let Some(ratio) = config.defaults.cycle_timeout_ratio {
        handler = handler.with_cycle_timeout_ratio(ratio);
    }
    let handler = Arc::new(handler);

    let total = targets.len();
    let mut registered = 0;
    for target in targets {
        let key = target.key.clone();
        match handler.register_target(target).await {
            Ok(()) => registered += 1,
            Err(e) => error!(target = %key, error = %e, "failed to register target"),
        }
    }
    info!(registered, total, "scaling targets registered");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let stats_handle = tokio::spawn(log_cache_stats(credentials.clone(), shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = tidescale_api::build_router(store);
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(addr = %listen, "metrics API listening");

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    handler.stop_all().await;
    let _ = stats_handle.await;

    let stats = credentials.stats().await;
    info!(
        hits = stats.hits,
        misses = stats.misses,
        entries = stats.entries,
        "Tidescale daemon stopped"
    );
    Ok(())
}

/// Validate a config file: parse, check targets, check trigger types.
pub fn validate(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let targets = config.scaling_targets()?;

    let credentials = Arc::new(CredentialCache::new(Arc::new(CloudConfigProvider::default())));
    let registry = builtin_registry(credentials);

    let mut unknown = Vec::new();
    for target in &targets {
        for (index, trigger) in target.triggers.iter().enumerate() {
            if !registry.contains(&trigger.trigger_type) {
                unknown.push(format!("{}#{index}: {}", target.key, trigger.trigger_type));
            }
        }
    }
    if !unknown.is_empty() {
        anyhow::bail!("unknown trigger types: {}", unknown.join(", "));
    }

    println!(
        "{}: {} target(s), {} trigger(s), listen {}",
        config_path.display(),
        targets.len(),
        targets.iter().map(|t| t.triggers.len()).sum::<usize>(),
        config.listen_address()
    );
    for target in &targets {
        println!(
            "  {} -> {}/{} [{}..{}] every {:?}",
            target.key,
            target.workload.kind,
            target.workload.name,
            target.min_replicas,
            target.max_replicas,
            target.polling_interval
        );
    }
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<TidescaleConfig> {
    let config = TidescaleConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn builtin_registry(credentials: Arc<CredentialCache<CloudConfig>>) -> ScalerRegistry {
    ScalerRegistry::with_builtin(BuiltinDeps {
        credentials,
        queue_client: Arc::new(HttpQueueDepthClient::default()),
    })
}

/// Callback that records replica changes in the log. Workload mutation is
/// left to the cluster's horizontal autoscaler, which reads the metrics API.
fn logging_callback() -> ScaleCallback {
    Arc::new(|target: TargetKey, workload: WorkloadRef, replicas: u32| {
        let log: Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> = Box::pin(async move {
            info!(
                %target,
                kind = %workload.kind,
                workload = %workload.name,
                replicas,
                "desired replicas changed"
            );
            Ok(())
        });
        log
    })
}

async fn log_cache_stats(
    credentials: Arc<CredentialCache<CloudConfig>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(CACHE_STATS_INTERVAL) => {
                let stats = credentials.stats().await;
                debug!(
                    hits = stats.hits,
                    misses = stats.misses,
                    resolutions = stats.resolutions,
                    evictions = stats.evictions,
                    entries = stats.entries,
                    "credential cache stats"
                );
            }
            _ = shutdown.changed() => break,
        }
    }
}
