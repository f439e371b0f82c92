//! Scale handler. One polling task per registered target.
//!
//! Each task ticks on the target's polling interval and runs one cycle per
//! tick: every trigger gets a job that rebuilds its scaler if construction
//! failed earlier and then evaluates it. All jobs share one deadline, and
//! the cycle joins them before reducing and publishing. Cycles of one target
//! never overlap and finish before the next tick is due.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use tidescale_core::{MetricSpec, ScalingTarget, TargetKey, Trigger, TriggerResolver, WorkloadRef};
use tidescale_scalers::{Scaler, ScalerConfig, ScalerError, ScalerRegistry};

use crate::error::{HandlerError, HandlerResult};
use crate::reducer::{TriggerOutcome, reduce};
use crate::store::DecisionStore;

/// Share of the polling interval a cycle may take before triggers time out.
pub const DEFAULT_CYCLE_TIMEOUT_RATIO: f64 = 0.8;

/// Extra time a stopping task gets beyond one polling interval.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Callback invoked when a target's published replica count changes.
///
/// Called with (target, workload, replicas). It must finish before the next
/// tick is due or it is abandoned.
pub type ScaleCallback = Arc<dyn Fn(TargetKey, WorkloadRef, u32) -> BoxFuture + Send + Sync>;

type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A trigger's scaler, or the reason it could not be built.
enum Binding {
    Ready(Arc<dyn Scaler>),
    Failed(ScalerError),
}

type Bindings = Arc<Mutex<Vec<Binding>>>;

/// Per-target task state.
struct TargetSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    /// Shared with the task; closed here once the task has finished.
    bindings: Bindings,
    drain_timeout: Duration,
}

/// Resolves trigger auth and builds scalers.
#[derive(Clone)]
struct Binder {
    registry: Arc<ScalerRegistry>,
    resolver: Arc<dyn TriggerResolver>,
}

impl Binder {
    async fn bind(
        &self,
        key: &TargetKey,
        index: usize,
        trigger: &Trigger,
    ) -> Result<Arc<dyn Scaler>, ScalerError> {
        let auth_params = self.resolver.resolve(key, trigger).await?;
        let config = ScalerConfig::new(key, index, trigger, auth_params);
        self.registry.build(config).await
    }

    /// `bind` bounded by `deadline`; `budget` is reported on expiry.
    async fn bind_until(
        &self,
        key: &TargetKey,
        index: usize,
        trigger: &Trigger,
        deadline: Instant,
        budget: Duration,
    ) -> Result<Arc<dyn Scaler>, ScalerError> {
        tokio::time::timeout_at(deadline, self.bind(key, index, trigger))
            .await
            .unwrap_or(Err(ScalerError::Timeout(budget)))
    }
}

/// Owns the set of active scaling targets and their polling tasks.
pub struct ScaleHandler {
    binder: Binder,
    store: DecisionStore,
    callback: Option<ScaleCallback>,
    cycle_timeout_ratio: f64,
    /// Only held for map reads and writes, never while scalers are built or
    /// tasks drain.
    targets: Mutex<HashMap<TargetKey, TargetSlot>>,
    /// Serializes register/deregister of one key without blocking others.
    lifecycle: Mutex<HashMap<TargetKey, Arc<Mutex<()>>>>,
}

impl ScaleHandler {
    pub fn new(
        registry: Arc<ScalerRegistry>,
        resolver: Arc<dyn TriggerResolver>,
        store: DecisionStore,
    ) -> Self {
        Self {
            binder: Binder { registry, resolver },
            store,
            callback: None,
            cycle_timeout_ratio: DEFAULT_CYCLE_TIMEOUT_RATIO,
            targets: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(HashMap::new()),
        }
    }

    /// Set the callback used to act on replica changes.
    pub fn with_callback(mut self, callback: ScaleCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Set the share of the polling interval available to one cycle.
    /// Values outside `(0, 1]` are ignored.
    pub fn with_cycle_timeout_ratio(mut self, ratio: f64) -> Self {
        if ratio > 0.0 && ratio <= 1.0 {
            self.cycle_timeout_ratio = ratio;
        } else {
            warn!(ratio, "ignoring cycle timeout ratio outside (0, 1]");
        }
        self
    }

    pub fn store(&self) -> &DecisionStore {
        &self.store
    }

    async fn lock_lifecycle(&self, key: &TargetKey) -> OwnedMutexGuard<()> {
        let lock = self
            .lifecycle
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Start polling a target, replacing any previous registration.
    ///
    /// The previous task is drained and its scalers closed before the new
    /// scalers are built; the published decision is carried over. Scalers
    /// are built concurrently, each bounded by the cycle timeout. Triggers
    /// whose scalers fail or time out are retried every cycle. Fails when
    /// no trigger could be built.
    pub async fn register_target(&self, target: ScalingTarget) -> HandlerResult<()> {
        target.validate()?;
        let key = target.key.clone();
        let _lifecycle = self.lock_lifecycle(&key).await;

        let previous = self.targets.lock().await.remove(&key);
        if let Some(previous) = previous {
            debug!(target = %key, "replacing existing registration");
            stop_slot(&key, previous).await;
        }

        let cycle_timeout = target.polling_interval.mul_f64(self.cycle_timeout_ratio);
        let deadline = Instant::now() + cycle_timeout;
        let bindings = bind_all(&self.binder, &key, &target.triggers, deadline, cycle_timeout).await;

        for (index, binding) in bindings.iter().enumerate() {
            if let Binding::Failed(e) = binding {
                warn!(
                    target = %key,
                    trigger = %target.triggers[index].trigger_type,
                    index,
                    error = %e,
                    "trigger construction failed"
                );
            }
        }

        if !bindings.iter().any(|b| matches!(b, Binding::Ready(_))) {
            self.store.remove(&key).await;
            let reason = bindings
                .iter()
                .filter_map(|b| match b {
                    Binding::Failed(e) => Some(e.to_string()),
                    Binding::Ready(_) => None,
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(HandlerError::NoValidTriggers {
                target: key.to_string(),
                reason,
            });
        }

        self.store.upsert_target(&target, metric_specs(&bindings)).await;

        let bindings: Bindings = Arc::new(Mutex::new(bindings));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let drain_timeout = target.polling_interval + DRAIN_GRACE;

        info!(
            target = %key,
            triggers = target.triggers.len(),
            interval_ms = target.polling_interval.as_millis() as u64,
            min = target.min_replicas,
            max = target.max_replicas,
            "scaling target registered"
        );

        let runner = TargetRunner {
            target,
            binder: self.binder.clone(),
            store: self.store.clone(),
            callback: self.callback.clone(),
            cycle_timeout,
            bindings: bindings.clone(),
        };
        let handle = tokio::spawn(runner.run(shutdown_rx));

        self.targets.lock().await.insert(
            key,
            TargetSlot {
                handle,
                shutdown_tx,
                bindings,
                drain_timeout,
            },
        );
        Ok(())
    }

    /// Stop polling a target, close its scalers and drop its decision.
    pub async fn deregister_target(&self, key: &TargetKey) -> HandlerResult<()> {
        let _lifecycle = self.lock_lifecycle(key).await;
        let slot = self
            .targets
            .lock()
            .await
            .remove(key)
            .ok_or_else(|| HandlerError::NotFound(key.to_string()))?;
        stop_slot(key, slot).await;
        self.store.remove(key).await;
        info!(target = %key, "scaling target deregistered");
        Ok(())
    }

    /// Deregister every target (for graceful shutdown).
    pub async fn stop_all(&self) {
        let slots: Vec<(TargetKey, TargetSlot)> = self.targets.lock().await.drain().collect();
        for (key, slot) in slots {
            stop_slot(&key, slot).await;
            self.store.remove(&key).await;
        }
        info!("all scaling targets stopped");
    }

    /// Registered target keys, sorted.
    pub async fn active_targets(&self) -> Vec<TargetKey> {
        let mut keys: Vec<TargetKey> = self.targets.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn is_registered(&self, key: &TargetKey) -> bool {
        self.targets.lock().await.contains_key(key)
    }
}

/// Signal a target task, let its in-flight cycle drain, then close its
/// scalers. A task that does not finish in time is aborted first.
async fn stop_slot(key: &TargetKey, slot: TargetSlot) {
    let _ = slot.shutdown_tx.send(true);
    let mut handle = slot.handle;
    if tokio::time::timeout(slot.drain_timeout, &mut handle).await.is_err() {
        warn!(target = %key, "in-flight cycle did not drain, cancelling");
        handle.abort();
        let _ = handle.await;
    }

    let bindings = std::mem::take(&mut *slot.bindings.lock().await);
    for (index, binding) in bindings.into_iter().enumerate() {
        if let Binding::Ready(scaler) = binding
            && let Err(e) = scaler.close().await
        {
            warn!(target = %key, index, error = %e, "scaler close failed");
        }
    }
    debug!(target = %key, "target task stopped");
}

/// Build every trigger's scaler concurrently, all bounded by `deadline`.
async fn bind_all(
    binder: &Binder,
    key: &TargetKey,
    triggers: &[Trigger],
    deadline: Instant,
    budget: Duration,
) -> Vec<Binding> {
    let mut bindings: Vec<Option<Binding>> = triggers.iter().map(|_| None).collect();
    let mut set = JoinSet::new();

    for (index, trigger) in triggers.iter().enumerate() {
        let binder = binder.clone();
        let key = key.clone();
        let trigger = trigger.clone();
        set.spawn(async move {
            let result = binder.bind_until(&key, index, &trigger, deadline, budget).await;
            (index, result)
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(scaler))) => bindings[index] = Some(Binding::Ready(scaler)),
            Ok((index, Err(e))) => bindings[index] = Some(Binding::Failed(e)),
            Err(e) => warn!(target = %key, error = %e, "trigger construction task failed"),
        }
    }

    bindings
        .into_iter()
        .map(|b| {
            b.unwrap_or_else(|| {
                Binding::Failed(ScalerError::Task("construction task panicked".to_string()))
            })
        })
        .collect()
}

fn metric_specs(bindings: &[Binding]) -> Vec<MetricSpec> {
    bindings
        .iter()
        .filter_map(|b| match b {
            Binding::Ready(scaler) => Some(scaler.get_metric_spec()),
            Binding::Failed(_) => None,
        })
        .collect()
}

/// What one trigger's job produced in a cycle.
struct TriggerJob {
    outcome: TriggerOutcome,
    /// Set when the job attempted a rebuild.
    rebound: Option<Binding>,
}

/// State owned by one target's polling task.
struct TargetRunner {
    target: ScalingTarget,
    binder: Binder,
    store: DecisionStore,
    callback: Option<ScaleCallback>,
    cycle_timeout: Duration,
    bindings: Bindings,
}

impl TargetRunner {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.target.polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(target = %self.target.key, "polling loop starting");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_cycle().await,
                _ = shutdown.changed() => {
                    debug!(target = %self.target.key, "polling loop shutting down");
                    break;
                }
            }
        }
    }

    async fn run_cycle(&self) {
        let key = &self.target.key;
        let started = Instant::now();
        let outcomes = self.evaluate(started + self.cycle_timeout).await;

        let failing = outcomes.iter().filter(|o| o.is_err()).count();
        let mut first_error = None;
        for outcome in &outcomes {
            if let Err(e) = &outcome.result {
                warn!(target = %key, index = outcome.index, error = %e, "trigger evaluation failed");
                first_error.get_or_insert_with(|| format!("trigger {}: {e}", outcome.index));
            }
        }

        if failing == outcomes.len() {
            let error = first_error.unwrap_or_else(|| "no triggers evaluated".to_string());
            let consecutive = self.store.record_failure(key, failing, error).await;
            error!(
                target = %key,
                failing,
                consecutive_failures = consecutive,
                "all triggers failed, keeping last decision"
            );
            return;
        }

        let previous = self.store.decision(key).await;
        let decision = reduce(&self.target, previous.as_ref(), &outcomes, epoch_secs());
        let replicas = decision.target_replicas;

        debug!(
            target = %key,
            replicas,
            active = decision.is_active,
            cooldown = decision.cooldown_armed,
            failing,
            "cycle reduced"
        );
        self.store.publish(key, decision, failing, first_error).await;

        let before = previous.map(|p| p.target_replicas);
        if before != Some(replicas) {
            info!(target = %key, from = ?before, to = replicas, "target replicas changed");
            if let Some(ref callback) = self.callback {
                let next_tick = started + self.target.polling_interval;
                let call = callback(key.clone(), self.target.workload.clone(), replicas);
                match tokio::time::timeout_at(next_tick, call).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(target = %key, replicas, error = %e, "scale callback failed"),
                    Err(_) => warn!(target = %key, replicas, "scale callback timed out"),
                }
            }
        }
    }

    /// Run one job per trigger and join them all before returning.
    ///
    /// A bound scaler is evaluated directly; a trigger whose construction
    /// failed is rebuilt first and, on success, evaluated in the same job.
    /// Every job is bounded by `deadline`.
    async fn evaluate(&self, deadline: Instant) -> Vec<TriggerOutcome> {
        let snapshot: Vec<Option<Arc<dyn Scaler>>> = self
            .bindings
            .lock()
            .await
            .iter()
            .map(|b| match b {
                Binding::Ready(scaler) => Some(scaler.clone()),
                Binding::Failed(_) => None,
            })
            .collect();

        let total = snapshot.len();
        let mut outcomes: Vec<Option<TriggerOutcome>> = vec![None; total];
        let mut rebound: Vec<Option<Binding>> = (0..total).map(|_| None).collect();
        let mut specs: Vec<Option<MetricSpec>> = vec![None; total];
        let mut set = JoinSet::new();

        for (index, (ready, trigger)) in snapshot
            .into_iter()
            .zip(self.target.triggers.iter().cloned())
            .enumerate()
        {
            specs[index] = ready.as_ref().map(|scaler| scaler.get_metric_spec());
            let binder = self.binder.clone();
            let key = self.target.key.clone();
            let budget = self.cycle_timeout;

            set.spawn(async move {
                let (scaler, rebound) = match ready {
                    Some(scaler) => (scaler, None),
                    None => match binder.bind_until(&key, index, &trigger, deadline, budget).await {
                        Ok(scaler) => (scaler.clone(), Some(Binding::Ready(scaler))),
                        Err(e) => {
                            return TriggerJob {
                                outcome: TriggerOutcome {
                                    index,
                                    spec: None,
                                    result: Err(e.clone()),
                                },
                                rebound: Some(Binding::Failed(e)),
                            };
                        }
                    },
                };

                let spec = scaler.get_metric_spec();
                let result = tokio::time::timeout_at(deadline, scaler.get_metrics_and_activity())
                    .await
                    .unwrap_or(Err(ScalerError::Timeout(budget)));
                TriggerJob {
                    outcome: TriggerOutcome {
                        index,
                        spec: Some(spec),
                        result,
                    },
                    rebound,
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(job) => {
                    let index = job.outcome.index;
                    rebound[index] = job.rebound;
                    outcomes[index] = Some(job.outcome);
                }
                Err(e) => warn!(target = %self.target.key, error = %e, "trigger task failed"),
            }
        }

        self.apply_rebinds(rebound).await;

        // Any slot still empty belongs to a task that panicked.
        outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                outcome.unwrap_or_else(|| TriggerOutcome {
                    index,
                    spec: specs[index].clone(),
                    result: Err(ScalerError::Task("evaluation task panicked".to_string())),
                })
            })
            .collect()
    }

    /// Store the results of this cycle's construction retries.
    async fn apply_rebinds(&self, rebound: Vec<Option<Binding>>) {
        if rebound.iter().all(Option::is_none) {
            return;
        }

        let mut bindings = self.bindings.lock().await;
        let mut constructed = false;
        for (index, binding) in rebound.into_iter().enumerate() {
            if let Some(binding) = binding
                && let Some(slot) = bindings.get_mut(index)
            {
                if matches!(binding, Binding::Ready(_)) {
                    info!(target = %self.target.key, index, "trigger constructed on retry");
                    constructed = true;
                }
                *slot = binding;
            }
        }

        if constructed {
            let specs = metric_specs(&bindings);
            drop(bindings);
            self.store.set_metric_specs(&self.target.key, specs).await;
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tidescale_core::{IdlePolicy, MetricSpec, ScalerResult, StaticResolver};

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Value { active: bool, value: f64 },
        Fail,
        Hang,
    }

    /// Shared control surface for fake scalers, keyed by trigger `id`.
    #[derive(Default)]
    struct World {
        behaviors: std::sync::Mutex<HashMap<String, Behavior>>,
        builds: AtomicUsize,
        failing_builds: AtomicUsize,
        closes: AtomicUsize,
        evaluations: std::sync::Mutex<Vec<(String, Instant)>>,
    }

    impl World {
        fn set(&self, id: &str, behavior: Behavior) {
            self.behaviors.lock().unwrap().insert(id.to_string(), behavior);
        }

        fn get(&self, id: &str) -> Behavior {
            self.behaviors
                .lock()
                .unwrap()
                .get(id)
                .copied()
                .unwrap_or(Behavior::Fail)
        }

        fn evaluated_at(&self, id: &str) -> Vec<Instant> {
            self.evaluations
                .lock()
                .unwrap()
                .iter()
                .filter(|(seen, _)| seen == id)
                .map(|(_, at)| *at)
                .collect()
        }
    }

    struct FakeScaler {
        id: String,
        name: String,
        per_replica: f64,
        world: Arc<World>,
    }

    #[async_trait]
    impl Scaler for FakeScaler {
        async fn get_metrics_and_activity(&self) -> Result<ScalerResult, ScalerError> {
            self.world
                .evaluations
                .lock()
                .unwrap()
                .push((self.id.clone(), Instant::now()));
            match self.world.get(&self.id) {
                Behavior::Value { active, value } => Ok(ScalerResult::new(&self.name, active, value)),
                Behavior::Fail => Err(ScalerError::Connection(format!("{} unreachable", self.id))),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ScalerResult::inactive(&self.name))
                }
            }
        }

        fn get_metric_spec(&self) -> MetricSpec {
            MetricSpec::average(&self.name, self.per_replica)
        }

        async fn close(&self) -> Result<(), ScalerError> {
            self.world.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry(world: Arc<World>) -> Arc<ScalerRegistry> {
        let mut registry = ScalerRegistry::new();
        registry.register_fn("fake", move |config| {
            let world = world.clone();
            Box::pin(async move {
                // Triggers named `stuck*` never finish construction.
                if config.param("id").is_some_and(|id| id.starts_with("stuck")) {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                if world
                    .failing_builds
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return Err(ScalerError::Connection("dependency not ready".to_string()));
                }
                world.builds.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ScalerError>(Arc::new(FakeScaler {
                    id: config.required("id")?.to_string(),
                    name: config.metric_name("fake"),
                    per_replica: config.f64_param("perReplica", Some(1.0))?,
                    world,
                }) as Arc<dyn Scaler>)
            })
        });
        Arc::new(registry)
    }

    fn handler(world: &Arc<World>) -> ScaleHandler {
        ScaleHandler::new(
            registry(world.clone()),
            Arc::new(StaticResolver::default()),
            DecisionStore::new(),
        )
    }

    fn target(name: &str, ids: &[&str], min: u32, max: u32) -> ScalingTarget {
        ScalingTarget {
            key: TargetKey::new("default", name),
            workload: WorkloadRef {
                kind: "Deployment".to_string(),
                name: name.to_string(),
            },
            triggers: ids
                .iter()
                .map(|id| {
                    let kind = if id.starts_with("unknown") { "unknown" } else { "fake" };
                    Trigger::new(kind).with_metadata("id", id)
                })
                .collect(),
            min_replicas: min,
            max_replicas: max,
            polling_interval: Duration::from_millis(50),
            cooldown_period: Duration::from_secs(0),
            idle_policy: IdlePolicy::MinReplicas,
        }
    }

    /// Poll `check` until it holds or two seconds pass.
    async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn publishes_decision_for_active_trigger() {
        let world = Arc::new(World::default());
        world.set("a", Behavior::Value { active: true, value: 4.0 });
        let handler = handler(&world);
        let t = target("api", &["a"], 0, 5);
        let key = t.key.clone();

        handler.register_target(t).await.unwrap();
        let store = handler.store().clone();
        assert!(
            eventually(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.decision(&key).await.is_some_and(|d| d.target_replicas == 4) }
            })
            .await
        );

        let status = store.get(&key).await.unwrap();
        assert_eq!(status.metric_specs, vec![MetricSpec::average("s0-fake", 1.0)]);
        handler.stop_all().await;
    }

    #[tokio::test]
    async fn failing_trigger_is_isolated() {
        let world = Arc::new(World::default());
        world.set("one", Behavior::Value { active: false, value: 0.0 });
        world.set("two", Behavior::Fail);
        world.set("three", Behavior::Value { active: true, value: 3.0 });
        let handler = handler(&world);
        let t = target("workers", &["one", "two", "three"], 0, 10);
        let key = t.key.clone();

        handler.register_target(t).await.unwrap();
        let store = handler.store().clone();
        assert!(
            eventually(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.decision(&key).await.is_some() }
            })
            .await
        );

        let status = store.get(&key).await.unwrap();
        let decision = status.decision.unwrap();
        assert_eq!(decision.target_replicas, 3);
        assert!(decision.is_active);
        assert_eq!(status.failing_triggers, 1);
        assert!(status.last_error.unwrap().contains("two unreachable"));
        handler.stop_all().await;
    }

    #[tokio::test]
    async fn all_failing_keeps_last_decision() {
        let world = Arc::new(World::default());
        world.set("a", Behavior::Value { active: true, value: 2.0 });
        let handler = handler(&world);
        let t = target("api", &["a"], 0, 5);
        let key = t.key.clone();
        let store = handler.store().clone();

        handler.register_target(t).await.unwrap();
        assert!(
            eventually(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.decision(&key).await.is_some() }
            })
            .await
        );

        world.set("a", Behavior::Fail);
        assert!(
            eventually(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.get(&key).await.is_some_and(|s| s.consecutive_failures >= 2) }
            })
            .await
        );
        assert_eq!(store.decision(&key).await.unwrap().target_replicas, 2);
        handler.stop_all().await;
    }

    #[tokio::test]
    async fn hung_trigger_times_out() {
        let world = Arc::new(World::default());
        world.set("slow", Behavior::Hang);
        world.set("fast", Behavior::Value { active: true, value: 1.0 });
        let handler = handler(&world).with_cycle_timeout_ratio(0.5);
        let t = target("api", &["slow", "fast"], 0, 5);
        let key = t.key.clone();
        let store = handler.store().clone();

        handler.register_target(t).await.unwrap();
        assert!(
            eventually(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.get(&key).await.is_some_and(|s| s.decision.is_some()) }
            })
            .await
        );
        let status = store.get(&key).await.unwrap();
        assert_eq!(status.failing_triggers, 1);
        assert!(status.last_error.unwrap().contains("timed out"));

        // Deregistration must not wait on the hung call.
        tokio::time::timeout(Duration::from_secs(2), handler.deregister_target(&key))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn registration_needs_one_constructible_trigger() {
        let world = Arc::new(World::default());
        let handler = handler(&world);

        let err = handler
            .register_target(target("api", &["unknown-1"], 0, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NoValidTriggers { .. }));
        assert!(handler.active_targets().await.is_empty());
        assert!(handler.store().is_empty().await);

        let mut empty = target("api", &[], 0, 5);
        empty.triggers.clear();
        assert!(matches!(
            handler.register_target(empty).await,
            Err(HandlerError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn unconstructible_trigger_does_not_block_others() {
        let world = Arc::new(World::default());
        world.set("a", Behavior::Value { active: true, value: 2.0 });
        let handler = handler(&world);
        let t = target("api", &["unknown-1", "a"], 0, 5);
        let key = t.key.clone();
        let store = handler.store().clone();

        handler.register_target(t).await.unwrap();
        assert!(
            eventually(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.decision(&key).await.is_some() }
            })
            .await
        );
        let status = store.get(&key).await.unwrap();
        assert_eq!(status.failing_triggers, 1);
        assert_eq!(status.decision.unwrap().target_replicas, 2);
        handler.stop_all().await;
    }

    #[tokio::test]
    async fn failed_construction_is_retried() {
        let world = Arc::new(World::default());
        world.set("a", Behavior::Value { active: true, value: 1.0 });
        world.set("b", Behavior::Value { active: true, value: 3.0 });
        // One of the two builds fails; it is rebuilt on the next cycle.
        world.failing_builds.store(1, Ordering::SeqCst);
        let handler = handler(&world);

        let t = target("api", &["a", "b"], 0, 5);
        let key = t.key.clone();
        let store = handler.store().clone();

        handler.register_target(t).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().metric_specs.len(), 1);

        assert!(
            eventually(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.get(&key).await.is_some_and(|s| s.metric_specs.len() == 2) }
            })
            .await
        );
        assert!(
            eventually(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.decision(&key).await.is_some_and(|d| d.target_replicas == 3) }
            })
            .await
        );
        handler.stop_all().await;
    }

    #[tokio::test]
    async fn deregister_closes_scalers_and_drops_status() {
        let world = Arc::new(World::default());
        world.set("a", Behavior::Value { active: false, value: 0.0 });
        world.set("b", Behavior::Value { active: false, value: 0.0 });
        let handler = handler(&world);
        let t = target("api", &["a", "b"], 1, 5);
        let key = t.key.clone();

        handler.register_target(t).await.unwrap();
        assert!(handler.is_registered(&key).await);

        handler.deregister_target(&key).await.unwrap();
        assert_eq!(world.closes.load(Ordering::SeqCst), 2);
        assert!(handler.store().get(&key).await.is_none());
        assert!(!handler.is_registered(&key).await);

        assert!(matches!(
            handler.deregister_target(&key).await,
            Err(HandlerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reregistration_replaces_scalers_and_keeps_decision() {
        let world = Arc::new(World::default());
        world.set("a", Behavior::Value { active: true, value: 4.0 });
        let handler = handler(&world);
        let t = target("api", &["a"], 0, 5);
        let key = t.key.clone();
        let store = handler.store().clone();

        handler.register_target(t.clone()).await.unwrap();
        assert!(
            eventually(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.decision(&key).await.is_some() }
            })
            .await
        );

        let mut narrower = t;
        narrower.max_replicas = 3;
        handler.register_target(narrower).await.unwrap();

        assert_eq!(world.closes.load(Ordering::SeqCst), 1);
        assert_eq!(world.builds.load(Ordering::SeqCst), 2);
        assert_eq!(handler.active_targets().await, vec![key.clone()]);
        // Decision survives the swap until the next cycle narrows it.
        assert!(store.decision(&key).await.is_some());
        assert!(
            eventually(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.decision(&key).await.is_some_and(|d| d.target_replicas == 3) }
            })
            .await
        );
        handler.stop_all().await;
        assert_eq!(world.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn callback_fires_on_change_only() {
        let world = Arc::new(World::default());
        world.set("a", Behavior::Value { active: true, value: 2.0 });
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = calls.clone();
        let callback: ScaleCallback = Arc::new(move |key: TargetKey, workload: WorkloadRef, replicas: u32| -> BoxFuture {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push((key.to_string(), workload.name, replicas));
                Ok(())
            })
        });
        let handler = handler(&world).with_callback(callback);
        let t = target("api", &["a"], 0, 5);
        let key = t.key.clone();

        handler.register_target(t).await.unwrap();
        let seen = calls.clone();
        assert!(
            eventually(|| {
                let seen = seen.clone();
                async move { !seen.lock().unwrap().is_empty() }
            })
            .await
        );

        // Several more cycles with the same input.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            calls.lock().unwrap().clone(),
            vec![("default/api".to_string(), "api".to_string(), 2)]
        );

        world.set("a", Behavior::Value { active: true, value: 5.0 });
        let seen = calls.clone();
        assert!(
            eventually(|| {
                let seen = seen.clone();
                async move { seen.lock().unwrap().len() == 2 }
            })
            .await
        );
        assert_eq!(calls.lock().unwrap()[1].2, 5);
        handler.deregister_target(&key).await.unwrap();
    }

    #[tokio::test]
    async fn hung_construction_does_not_block_registration() {
        let world = Arc::new(World::default());
        world.set("ok", Behavior::Value { active: true, value: 2.0 });
        let handler = handler(&world);
        let t = target("api", &["stuck-1", "ok"], 0, 5);
        let key = t.key.clone();
        let store = handler.store().clone();

        tokio::time::timeout(Duration::from_secs(2), handler.register_target(t))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap().metric_specs.len(), 1);

        assert!(
            eventually(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.decision(&key).await.is_some_and(|d| d.target_replicas == 2) }
            })
            .await
        );
        let status = store.get(&key).await.unwrap();
        assert_eq!(status.failing_triggers, 1);
        assert!(status.last_error.unwrap().contains("timed out"));

        tokio::time::timeout(Duration::from_secs(2), handler.stop_all())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn slow_registration_does_not_block_other_targets() {
        let world = Arc::new(World::default());
        world.set("ok", Behavior::Value { active: true, value: 1.0 });
        let handler = Arc::new(handler(&world));

        // A long interval gives construction a long budget.
        let mut slow = target("slow", &["stuck-1"], 0, 5);
        slow.polling_interval = Duration::from_secs(30);
        let pending = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.register_target(slow).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fast = target("fast", &["ok"], 0, 5);
        let fast_key = fast.key.clone();
        tokio::time::timeout(Duration::from_secs(1), handler.register_target(fast))
            .await
            .unwrap()
            .unwrap();
        let active = tokio::time::timeout(Duration::from_secs(1), handler.active_targets())
            .await
            .unwrap();
        assert_eq!(active, vec![fast_key.clone()]);
        tokio::time::timeout(Duration::from_secs(1), handler.deregister_target(&fast_key))
            .await
            .unwrap()
            .unwrap();

        assert!(!pending.is_finished());
        pending.abort();
    }

    #[tokio::test]
    async fn cycles_share_one_deadline() {
        let world = Arc::new(World::default());
        world.set("ok", Behavior::Value { active: true, value: 1.0 });
        world.set("slow", Behavior::Hang);
        let handler = handler(&world);
        let mut t = target("api", &["ok", "slow", "stuck-1"], 0, 5);
        t.polling_interval = Duration::from_millis(200);

        handler.register_target(t).await.unwrap();
        let seen = world.clone();
        assert!(
            eventually(|| {
                let seen = seen.clone();
                async move { seen.evaluated_at("ok").len() >= 6 }
            })
            .await
        );
        handler.stop_all().await;

        // A hung evaluation and a hung rebuild in the same cycle still end
        // the cycle before the next tick.
        let ticks = world.evaluated_at("ok");
        let gaps: Vec<Duration> = ticks.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(
            gaps.iter().all(|gap| *gap < Duration::from_millis(280)),
            "cycle gaps {gaps:?}"
        );
    }

    #[tokio::test]
    async fn hung_callback_does_not_stall_polling() {
        let world = Arc::new(World::default());
        world.set("a", Behavior::Value { active: true, value: 2.0 });
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback: ScaleCallback = Arc::new(move |_key: TargetKey, _workload: WorkloadRef, _replicas: u32| -> BoxFuture {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
        });
        let handler = handler(&world).with_callback(callback);
        let t = target("api", &["a"], 0, 5);
        let key = t.key.clone();
        let store = handler.store().clone();

        handler.register_target(t).await.unwrap();
        assert!(
            eventually(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.decision(&key).await.is_some_and(|d| d.target_replicas == 2) }
            })
            .await
        );

        world.set("a", Behavior::Value { active: true, value: 5.0 });
        assert!(
            eventually(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.decision(&key).await.is_some_and(|d| d.target_replicas == 5) }
            })
            .await
        );
        let counted = calls.clone();
        assert!(
            eventually(|| {
                let counted = counted.clone();
                async move { counted.load(Ordering::SeqCst) == 2 }
            })
            .await
        );

        tokio::time::timeout(Duration::from_secs(2), handler.deregister_target(&key))
            .await
            .unwrap()
            .unwrap();
    }
}
