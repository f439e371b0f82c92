//! Reference-counted credential cache with single-flight resolution.
//!
//! The usage map sits behind a plain mutex that is never held across an
//! await; resolution runs outside it on a per-entry `OnceCell`, so misses
//! for different keys proceed in parallel and concurrent misses for the
//! same key share one resolution.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::CredentialResult;
use crate::identity::{AuthorizationIdentity, cache_key};

/// Resolves a fresh credential for a (region, identity) pair.
#[async_trait]
pub trait CredentialProvider<C>: Send + Sync {
    async fn resolve(&self, region: &str, identity: &AuthorizationIdentity) -> CredentialResult<C>;
}

/// A cached credential and the consumers currently holding it.
struct CacheEntry<C> {
    credential: Arc<OnceCell<Arc<C>>>,
    usages: HashSet<String>,
}

impl<C> CacheEntry<C> {
    fn new() -> Self {
        Self {
            credential: Arc::new(OnceCell::new()),
            usages: HashSet::new(),
        }
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub resolutions: u64,
    pub evictions: u64,
    pub entries: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    resolutions: AtomicU64,
    evictions: AtomicU64,
}

/// Shared store of resolved credentials keyed by region + identity.
///
/// Entries live exactly as long as at least one consumer holds them.
pub struct CredentialCache<C> {
    provider: Arc<dyn CredentialProvider<C>>,
    entries: Mutex<HashMap<String, CacheEntry<C>>>,
    counters: Counters,
}

/// Rolls back a usage registered by `acquire` unless the acquire completed.
///
/// Covers both a failed resolution and a caller that drops the acquire
/// future (timeout, task abort) while it waits on the provider.
struct PendingUsage<'a, C> {
    cache: &'a CredentialCache<C>,
    key: &'a str,
    consumer_id: &'a str,
    armed: bool,
}

impl<C> PendingUsage<'_, C> {
    fn complete(mut self) {
        self.armed = false;
    }
}

impl<C> Drop for PendingUsage<'_, C> {
    fn drop(&mut self) {
        if self.armed && self.cache.remove_usage(self.key, self.consumer_id) {
            debug!(consumer_id = %self.consumer_id, "pending credential usage rolled back");
        }
    }
}

impl<C> CredentialCache<C> {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<C>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if the entry was evicted.
    fn remove_usage(&self, key: &str, consumer_id: &str) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        entry.usages.remove(consumer_id);
        if entry.usages.is_empty() {
            entries.remove(key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }
}

impl<C: Send + Sync + 'static> CredentialCache<C> {
    pub fn new(provider: Arc<dyn CredentialProvider<C>>) -> Self {
        Self {
            provider,
            entries: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Return the credential for `(region, identity)`, registering
    /// `consumer_id` as a usage.
    ///
    /// On a miss the provider is called once; callers racing on the same
    /// key wait for that resolution and share its result. If resolution
    /// fails, or the returned future is dropped before it completes, the
    /// consumer's usage is dropped again.
    pub async fn acquire(
        &self,
        region: &str,
        identity: &AuthorizationIdentity,
        consumer_id: &str,
    ) -> CredentialResult<Arc<C>> {
        let key = cache_key(region, identity);

        let (cell, newly_held) = {
            let mut entries = self.entries();
            let counter = if entries.contains_key(&key) {
                &self.counters.hits
            } else {
                &self.counters.misses
            };
            counter.fetch_add(1, Ordering::Relaxed);

            let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::new);
            let newly_held = entry.usages.insert(consumer_id.to_string());
            (entry.credential.clone(), newly_held)
        };

        let pending = PendingUsage {
            cache: self,
            key: &key,
            consumer_id,
            armed: newly_held,
        };

        let resolved = cell
            .get_or_try_init(|| async {
                self.counters.resolutions.fetch_add(1, Ordering::Relaxed);
                info!(
                    %region,
                    identity = %identity.label(),
                    "resolving credential"
                );
                self.provider.resolve(region, identity).await.map(Arc::new)
            })
            .await;

        match resolved {
            Ok(credential) => {
                pending.complete();
                debug!(%region, identity = %identity.label(), %consumer_id, "credential acquired");
                Ok(credential.clone())
            }
            Err(e) => {
                warn!(%region, identity = %identity.label(), error = %e, "credential resolution failed");
                drop(pending);
                Err(e)
            }
        }
    }

    /// Drop `consumer_id`'s usage; the entry is evicted once unused.
    ///
    /// Releasing an unknown key or consumer is a no-op.
    pub async fn release(&self, region: &str, identity: &AuthorizationIdentity, consumer_id: &str) {
        let key = cache_key(region, identity);
        if self.remove_usage(&key, consumer_id) {
            debug!(%region, identity = %identity.label(), "credential evicted");
        }
    }

    /// Whether an entry exists for `(region, identity)`.
    pub async fn contains(&self, region: &str, identity: &AuthorizationIdentity) -> bool {
        let key = cache_key(region, identity);
        self.entries().contains_key(&key)
    }

    /// Number of consumers holding `(region, identity)`.
    pub async fn usage_count(&self, region: &str, identity: &AuthorizationIdentity) -> usize {
        let key = cache_key(region, identity);
        self.entries().get(&key).map(|e| e.usages.len()).unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.entries().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            resolutions: self.counters.resolutions.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: self.entries().len(),
        }
    }
}
