//! Schema Service (C3): two-tier cache with cross-process coordination.
//!
//! Orchestrates [`crate::l1::L1Cache`] (in-process, single-flight refresh)
//! and [`crate::l2::L2Store`] (cross-process, `memmap2`-backed) in front of
//! a repository satisfying [`mssql_tds::SchemaCatalog`], following the
//! version-token contract: a cached entry is served until its
//! `next-check-due` elapses, at which point the repository's version token
//! is compared before deciding whether to republish.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use mssql_core::{DataAccessError, InstanceId, ProcedureSchema, Result, TvpSchema, VersionToken};
use mssql_tds::{MssqlConnection, SchemaCatalog};
use tokio::sync::Mutex as AsyncMutex;

use crate::l1::{L1Cache, SchemaKey, SchemaObjectKind, SchemaPayload};
use crate::l2::L2Store;

const STRIPE_COUNT: usize = 1024;
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);
const FAIL_SAFE_GRACE: Duration = Duration::from_secs(30);
const STRIPE_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Published when a refresh replaces a cached entry with a new version.
#[derive(Debug, Clone)]
pub struct SchemaChanged {
    pub kind: SchemaObjectKind,
    pub qualified_name: String,
    pub old_version: VersionToken,
    pub new_version: VersionToken,
}

pub type ChangeHook = Arc<dyn Fn(&SchemaChanged) + Send + Sync>;

#[derive(Clone)]
pub struct SchemaServiceConfig {
    pub refresh_interval: Duration,
    pub fail_safe_grace: Duration,
    pub warmup_concurrency: Option<usize>,
}

impl Default for SchemaServiceConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            fail_safe_grace: FAIL_SAFE_GRACE,
            warmup_concurrency: None,
        }
    }
}

/// Two-tier schema cache in front of a single database instance's catalog.
pub struct SchemaService {
    instance: InstanceId,
    l1: L1Cache,
    l2: L2Store,
    stripes: Vec<AsyncMutex<()>>,
    config: SchemaServiceConfig,
    hooks: parking_lot::RwLock<Vec<ChangeHook>>,
}

fn stripe_of(qualified_name: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    qualified_name.hash(&mut hasher);
    (hasher.finish() as usize) % STRIPE_COUNT
}

impl SchemaService {
    pub fn new(instance: InstanceId, isolation_key: &str, config: SchemaServiceConfig) -> Self {
        Self {
            instance,
            l1: L1Cache::new(config.refresh_interval),
            l2: L2Store::open(isolation_key),
            stripes: (0..STRIPE_COUNT).map(|_| AsyncMutex::new(())).collect(),
            config,
            hooks: parking_lot::RwLock::new(Vec::new()),
        }
    }

    /// Register a best-effort change hook. A panicking hook is caught and
    /// logged so it cannot corrupt or block the service.
    pub fn on_change(&self, hook: ChangeHook) {
        self.hooks.write().push(hook);
    }

    fn notify(&self, event: SchemaChanged) {
        for hook in self.hooks.read().iter() {
            let hook = hook.clone();
            let event = event.clone();
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(&event))).is_err() {
                tracing::warn!(
                    qualified_name = %event.qualified_name,
                    "schema change hook panicked, ignoring"
                );
            }
        }
    }

    pub async fn procedure_metadata(
        &self,
        repository: &MssqlConnection,
        qualified_name: &str,
    ) -> Result<ProcedureSchema> {
        let key = SchemaKey {
            instance: self.instance.clone(),
            kind: SchemaObjectKind::Procedure,
            qualified_name: qualified_name.to_string(),
        };
        let qualified = qualified_name.to_string();
        let instance = self.instance.clone();
        let payload = self
            .resolve(key, || async move {
                repository
                    .procedure_metadata(&qualified, &instance)
                    .await
                    .map(SchemaPayload::Procedure)
            })
            .await?;
        payload.as_procedure().cloned().ok_or_else(|| DataAccessError::SchemaLookup {
            object: qualified_name.to_string(),
            reason: "cached entry was not a procedure schema".to_string(),
        })
    }

    pub async fn tvp_metadata(
        &self,
        repository: &MssqlConnection,
        qualified_name: &str,
    ) -> Result<TvpSchema> {
        let key = SchemaKey {
            instance: self.instance.clone(),
            kind: SchemaObjectKind::Tvp,
            qualified_name: qualified_name.to_string(),
        };
        let qualified = qualified_name.to_string();
        let instance = self.instance.clone();
        let payload = self
            .resolve(key, || async move {
                repository.tvp_metadata(&qualified, &instance).await.map(SchemaPayload::Tvp)
            })
            .await?;
        payload.as_tvp().cloned().ok_or_else(|| DataAccessError::SchemaLookup {
            object: qualified_name.to_string(),
            reason: "cached entry was not a TVP schema".to_string(),
        })
    }

    /// Shared version-token resolution path for both object kinds:
    /// L1 hit → L2 hit → striped-lock-guarded repository fetch, with
    /// fail-safe grace on repository error and a bounded wait for the
    /// stripe lock before degrading to the last-known-good entry.
    async fn resolve<F, Fut>(&self, key: SchemaKey, fetch: F) -> Result<SchemaPayload>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SchemaPayload>>,
    {
        if let Some(payload) = self.l1.get(&key).payload() {
            return Ok(payload.clone());
        }

        if let Some(payload) = self.l2.get(&key.qualified_name, key.kind) {
            self.l1.publish(key.clone(), payload.clone());
            return Ok(payload);
        }

        let stripe = &self.stripes[stripe_of(&key.qualified_name)];
        let guard = match tokio::time::timeout(STRIPE_LOCK_TIMEOUT, stripe.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!(
                    qualified_name = %key.qualified_name,
                    "stripe lock timed out, serving last-known-good with grace extension"
                );
                if let Some(payload) = self.l1.get(&key).payload().cloned() {
                    self.l1.extend(&key, self.config.fail_safe_grace);
                    return Ok(payload);
                }
                return Err(DataAccessError::CircuitBroken {
                    instance: self.instance.to_string(),
                    retry_after_ms: STRIPE_LOCK_TIMEOUT.as_millis() as u64,
                });
            }
        };

        // Re-check under the lock: another waiter may have just refreshed.
        if let Some(payload) = self.l1.get(&key).payload() {
            return Ok(payload.clone());
        }

        let old_version = self.l2.version(&key.qualified_name, key.kind);
        match fetch().await {
            Ok(payload) => {
                let new_version = payload.version();
                if old_version == new_version && !old_version.is_absent() {
                    self.l1.extend(&key, self.config.refresh_interval);
                } else {
                    self.l1.publish(key.clone(), payload.clone());
                    self.l2.publish(&key.qualified_name, key.kind, &payload);
                    self.notify(SchemaChanged {
                        kind: key.kind,
                        qualified_name: key.qualified_name.clone(),
                        old_version,
                        new_version,
                    });
                }
                drop(guard);
                Ok(payload)
            }
            Err(err) => {
                drop(guard);
                if let Some(payload) = self.l1.get(&key).payload().cloned() {
                    tracing::warn!(
                        qualified_name = %key.qualified_name,
                        error = %err,
                        "schema refresh failed, extending prior entry by grace window"
                    );
                    self.l1.extend(&key, self.config.fail_safe_grace);
                    Ok(payload)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Warm both tiers for every object in `schema` matching the include
    /// patterns and not the exclude patterns, capping concurrency at
    /// `min(processor_count, pending_count)` unless configured otherwise.
    pub async fn warm_up(
        &self,
        repository: &MssqlConnection,
        schema: &str,
        include_patterns: &[String],
        exclude_patterns: &[String],
    ) -> Result<()> {
        let bulk = repository.bulk(schema, &self.instance, include_patterns, exclude_patterns).await?;

        let entries: Vec<(SchemaKey, SchemaPayload)> = bulk
            .sp_params
            .into_iter()
            .map(|procedure| {
                let key = SchemaKey {
                    instance: self.instance.clone(),
                    kind: SchemaObjectKind::Procedure,
                    qualified_name: procedure.qualified_name.clone(),
                };
                (key, SchemaPayload::Procedure(procedure))
            })
            .chain(bulk.tvp_columns.into_iter().map(|tvp| {
                let key = SchemaKey {
                    instance: self.instance.clone(),
                    kind: SchemaObjectKind::Tvp,
                    qualified_name: tvp.qualified_name.clone(),
                };
                (key, SchemaPayload::Tvp(tvp))
            }))
            .collect();

        let pending = entries.len();
        let concurrency = self
            .config
            .warmup_concurrency
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
            .min(pending.max(1));
        tracing::info!(pending, concurrency, schema, "warming schema cache");

        futures::stream::iter(entries)
            .for_each_concurrent(concurrency, |(key, payload)| async move {
                self.l1.publish(key.clone(), payload.clone());
                self.l2.publish(&key.qualified_name, key.kind, &payload);
            })
            .await;

        Ok(())
    }

    pub fn invalidate(&self, qualified_name: &str, kind: SchemaObjectKind) {
        self.l1.invalidate(&SchemaKey {
            instance: self.instance.clone(),
            kind,
            qualified_name: qualified_name.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn stripe_of_is_stable_for_same_key() {
        assert_eq!(stripe_of("dbo.GetUser"), stripe_of("dbo.GetUser"));
    }

    #[test]
    fn change_hooks_run_best_effort() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let service =
            SchemaService::new(InstanceId::new("test"), "hook-test", SchemaServiceConfig::default());
        service.on_change(Arc::new(move |_event| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        service.on_change(Arc::new(|_event| panic!("boom")));

        service.notify(SchemaChanged {
            kind: SchemaObjectKind::Procedure,
            qualified_name: "dbo.GetUser".to_string(),
            old_version: VersionToken::ABSENT,
            new_version: VersionToken(1),
        });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
