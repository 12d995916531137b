//! Fail-open cache-aside service.
//!
//! Thin decorator over [`TieredStore`]: every operation catches
//! infrastructure-category cache errors, logs them with the failing key, and
//! carries on; for `get_or_create` that means invoking the factory directly
//! and returning its result uncached. This boundary is the system's primary
//! resilience guarantee; keep it small.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use courier_common::config::CacheConfig;

use crate::health::CacheHealth;
use crate::store::{CacheEntrySettings, RedisTier, SharedTier, TieredStore};

pub struct CacheService {
    store: TieredStore,
    config: CacheConfig,
    /// Per-key flight gates for single-flight population. Entries are
    /// dropped once the last concurrent caller for the key releases.
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheService {
    pub fn new(config: CacheConfig, shared: Option<Arc<dyn SharedTier>>) -> Self {
        Self {
            store: TieredStore::new(&config, shared),
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Build from configuration: connects the shared Redis tier when the
    /// cache is enabled. A failed connection degrades to local-only
    /// operation rather than failing startup.
    pub async fn from_config(config: CacheConfig) -> Self {
        let shared: Option<Arc<dyn SharedTier>> = if config.enabled {
            match RedisTier::connect(&config).await {
                Ok(tier) => Some(Arc::new(tier)),
                Err(err) => {
                    tracing::warn!(error = %err, "Shared cache tier unavailable; running local-only");
                    None
                }
            }
        } else {
            None
        };

        Self::new(config, shared)
    }

    /// Return the cached value for `key`, creating it via `factory` on a
    /// miss. Among concurrent callers for the same key, `factory` runs at
    /// most once; everyone observes the same value. Cache failures never
    /// surface; the factory result is returned uncached instead. Factory
    /// errors propagate untouched.
    pub async fn get_or_create<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        settings: Option<CacheEntrySettings>,
    ) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let settings = settings.unwrap_or_default();

        // Fast path: hit in either tier without touching the flight gate.
        if let Some(value) = self.lookup::<T>(key).await {
            return Ok(value);
        }

        let gate = self.gate(key).await;
        let result = {
            let _guard = gate.lock().await;

            // A concurrent caller may have populated the entry while we
            // waited on the gate.
            match self.lookup::<T>(key).await {
                Some(value) => Ok(value),
                None => match factory().await {
                    Ok(value) => {
                        self.write_through(key, &value, &settings).await;
                        Ok(value)
                    }
                    Err(err) => Err(err),
                },
            }
        };
        self.release(key, &gate).await;
        result
    }

    /// Write a value into both tiers. Best-effort: failures are logged and
    /// absorbed.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        settings: Option<CacheEntrySettings>,
    ) {
        let settings = settings.unwrap_or_default();
        self.write_through(key, value, &settings).await;
    }

    /// Remove a single entry from both tiers. Best-effort.
    pub async fn remove(&self, key: &str) {
        if let Err(err) = self.store.remove(key).await {
            tracing::warn!(key, error = %err, "Cache remove failed");
        }
    }

    /// Remove every entry carrying the tag from both tiers. Best-effort.
    pub async fn remove_by_tag(&self, tag: &str) {
        if let Err(err) = self.store.remove_by_tag(tag).await {
            tracing::warn!(tag, error = %err, "Cache remove-by-tag failed");
        }
    }

    /// Shared-tier reachability for the process health surface.
    pub async fn health(&self) -> CacheHealth {
        let Some(shared) = self.store.shared() else {
            return CacheHealth::Disabled;
        };
        match shared.ping().await {
            Ok(latency) => CacheHealth::Healthy {
                latency_ms: latency.as_millis() as u64,
            },
            Err(err) => CacheHealth::Unhealthy {
                error: err.to_string(),
            },
        }
    }

    /// Read from the store, treating infrastructure errors and undecodable
    /// payloads as misses.
    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key, self.local_ttl()).await {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(key, error = %err, "Cache lookup failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "Cached payload undecodable; treating as miss");
                None
            }
        }
    }

    async fn write_through<T: Serialize>(&self, key: &str, value: &T, settings: &CacheEntrySettings) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(key, error = %err, "Cache serialization failed; entry not cached");
                return;
            }
        };
        let ttl = settings.expiration.unwrap_or_else(|| self.shared_ttl());
        let local_ttl = settings.local_expiration.unwrap_or_else(|| self.local_ttl());

        if let Err(err) = self
            .store
            .set(key, &payload, ttl, local_ttl, &settings.tags)
            .await
        {
            tracing::warn!(key, error = %err, "Cache write failed");
        }
    }

    fn shared_ttl(&self) -> Duration {
        Duration::from_secs(self.config.default_expiration_minutes * 60)
    }

    fn local_ttl(&self) -> Duration {
        Duration::from_secs(self.config.local_expiration_minutes * 60)
    }

    async fn gate(&self, key: &str) -> Arc<Mutex<()>> {
        let mut gates = self.in_flight.lock().await;
        gates.entry(key.to_string()).or_default().clone()
    }

    async fn release(&self, key: &str, gate: &Arc<Mutex<()>>) {
        let mut gates = self.in_flight.lock().await;
        if let Some(existing) = gates.get(key) {
            // Keep the entry while other callers still hold the gate: map +
            // our local reference account for two strong counts.
            if Arc::ptr_eq(existing, gate) && Arc::strong_count(existing) <= 2 {
                gates.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::{CacheError, CacheResult};

    fn test_config() -> CacheConfig {
        CacheConfig {
            enabled: false,
            connection_string: "redis://unused".to_string(),
            key_prefix: "test:".to_string(),
            default_expiration_minutes: 30,
            local_expiration_minutes: 5,
            max_payload_bytes: 1024,
            max_key_length: 128,
        }
    }

    fn local_only() -> CacheService {
        CacheService::new(test_config(), None)
    }

    /// Shared tier that errors on every call, for fail-open coverage.
    struct FailingTier;

    #[async_trait]
    impl SharedTier for FailingTier {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Err(CacheError::Backend("shared tier down".to_string()))
        }

        async fn set(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
            _tags: &[String],
        ) -> CacheResult<()> {
            Err(CacheError::Backend("shared tier down".to_string()))
        }

        async fn remove(&self, _key: &str) -> CacheResult<()> {
            Err(CacheError::Backend("shared tier down".to_string()))
        }

        async fn remove_tag(&self, _tag: &str) -> CacheResult<()> {
            Err(CacheError::Backend("shared tier down".to_string()))
        }

        async fn ping(&self) -> CacheResult<Duration> {
            Err(CacheError::Backend("shared tier down".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_get_or_create_invokes_factory_once() {
        let service = Arc::new(local_only());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let service = Arc::clone(&service);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                service
                    .get_or_create("shared-key", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42u64)
                    }, None)
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_shared_tier_falls_open_to_factory() {
        let service = CacheService::new(test_config(), Some(Arc::new(FailingTier)));

        let value: String = service
            .get_or_create("k", || async { Ok("from-factory".to_string()) }, None)
            .await
            .unwrap();
        assert_eq!(value, "from-factory");

        // Best-effort operations absorb the failures too.
        service.set("k2", &"v", None).await;
        service.remove("k2").await;
        service.remove_by_tag("t").await;
    }

    #[tokio::test]
    async fn failing_shared_tier_reports_unhealthy() {
        let service = CacheService::new(test_config(), Some(Arc::new(FailingTier)));
        assert!(matches!(
            service.health().await,
            CacheHealth::Unhealthy { .. }
        ));

        assert!(matches!(local_only().health().await, CacheHealth::Disabled));
    }

    #[tokio::test]
    async fn remove_by_tag_forces_factory_reinvocation() {
        let service = local_only();
        let calls = AtomicUsize::new(0);

        let settings = CacheEntrySettings::tagged(["email-jobs"]);
        for _ in 0..2 {
            let v: u32 = service
                .get_or_create("job:1", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }, Some(settings.clone()))
                .await
                .unwrap();
            assert_eq!(v, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        service.remove_by_tag("email-jobs").await;

        let _: u32 = service
            .get_or_create("job:1", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            }, Some(settings))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn oversized_set_never_errors_and_is_unretrievable() {
        let mut config = test_config();
        config.max_payload_bytes = 8;
        let service = CacheService::new(config, None);

        service.set("big", &"x".repeat(64), None).await;

        let calls = AtomicUsize::new(0);
        let v: String = service
            .get_or_create("big", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("fresh".to_string())
            }, None)
            .await
            .unwrap();
        assert_eq!(v, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn factory_errors_propagate() {
        let service = local_only();
        let result: anyhow::Result<u32> = service
            .get_or_create("k", || async { Err(anyhow::anyhow!("upstream down")) }, None)
            .await;
        assert!(result.is_err());
    }
}
