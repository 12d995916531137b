//! Raw two-tier cache store: moka in-process tier in front of an optional
//! shared Redis tier.
//!
//! Operations at this layer return [`CacheResult`] and may fail; the
//! fail-open behaviour lives one level up in
//! [`CacheService`](crate::service::CacheService).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;

use courier_common::config::CacheConfig;

use crate::error::{CacheError, CacheResult};

/// Upper bound on local-tier entries, independent of payload size.
const LOCAL_MAX_ENTRIES: u64 = 10_000;

/// Per-entry cache options. Unset fields default from the global
/// [`CacheConfig`].
#[derive(Debug, Clone, Default)]
pub struct CacheEntrySettings {
    /// Absolute expiration for the shared tier.
    pub expiration: Option<Duration>,

    /// Expiration for the local in-process tier. Keep shorter than
    /// `expiration` so the fast tier never outlives the shared one.
    pub local_expiration: Option<Duration>,

    /// Tags for group invalidation. Fixed at entry creation.
    pub tags: Vec<String>,
}

impl CacheEntrySettings {
    pub fn tagged(tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Shared (distributed) cache tier contract. Implemented by [`RedisTier`];
/// tests substitute failing or recording doubles.
#[async_trait]
pub trait SharedTier: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store a value with a TTL and associate it with each tag.
    async fn set(&self, key: &str, value: &str, ttl: Duration, tags: &[String])
    -> CacheResult<()>;

    async fn remove(&self, key: &str) -> CacheResult<()>;

    /// Remove every entry associated with the tag, plus the tag index itself.
    async fn remove_tag(&self, tag: &str) -> CacheResult<()>;

    /// Round-trip latency probe for the health surface.
    async fn ping(&self) -> CacheResult<Duration>;
}

/// Redis-backed shared tier using a multiplexed [`ConnectionManager`].
///
/// Keys are namespaced with the configured prefix. Tag membership is kept in
/// Redis sets under `{prefix}tag:{tag}` so tag invalidation is a
/// `SMEMBERS` + `DEL`, not a `SCAN` over the keyspace.
#[derive(Clone)]
pub struct RedisTier {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisTier {
    pub async fn connect(config: &CacheConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.connection_string.as_str())
            .map_err(|e| CacheError::Connection(format!("invalid redis target: {e}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(format!("redis connect failed: {e}")))?;

        tracing::info!(key_prefix = %config.key_prefix, "Connected to shared cache tier");

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}tag:{}", self.key_prefix, tag)
    }
}

#[async_trait]
impl SharedTier for RedisTier {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.entry_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("GET failed: {e}")))?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        tags: &[String],
    ) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let ttl_seconds = ttl.as_secs().max(1);
        let entry_key = self.entry_key(key);

        let mut pipe = redis::pipe();
        pipe.cmd("SETEX").arg(&entry_key).arg(ttl_seconds).arg(value);
        for tag in tags {
            // Tag sets outlive their members by at most the member TTL; the
            // SMEMBERS sweep on invalidation tolerates already-expired keys.
            pipe.cmd("SADD").arg(self.tag_key(tag)).arg(&entry_key);
            pipe.cmd("EXPIRE").arg(self.tag_key(tag)).arg(ttl_seconds);
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("SETEX failed: {e}")))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(self.entry_key(key))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("DEL failed: {e}")))?;
        Ok(())
    }

    async fn remove_tag(&self, tag: &str) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let tag_key = self.tag_key(tag);

        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(&tag_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("SMEMBERS failed: {e}")))?;

        let mut cmd = redis::cmd("DEL");
        cmd.arg(&tag_key);
        for member in &members {
            cmd.arg(member);
        }
        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("DEL (tag sweep) failed: {e}")))?;

        tracing::debug!(tag, removed = members.len(), "Shared tier tag invalidation");
        Ok(())
    }

    async fn ping(&self) -> CacheResult<Duration> {
        let mut conn = self.connection.clone();
        let started = Instant::now();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("PING failed: {e}")))?;
        if pong != "PONG" {
            return Err(CacheError::Backend(format!("unexpected PING reply: {pong}")));
        }
        Ok(started.elapsed())
    }
}

/// Local-tier entry carrying its own TTL, consumed by the moka expiry
/// policy.
#[derive(Clone)]
struct LocalEntry {
    value: String,
    ttl: Duration,
}

struct PerEntryExpiry;

impl moka::Expiry<String, LocalEntry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &LocalEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// The raw two-tier store. Reads prefer the local tier and backfill it from
/// the shared tier; writes go through to both.
pub struct TieredStore {
    local: moka::future::Cache<String, LocalEntry>,
    local_tags: RwLock<HashMap<String, HashSet<String>>>,
    shared: Option<Arc<dyn SharedTier>>,
    max_payload_bytes: usize,
    max_key_length: usize,
}

impl TieredStore {
    pub fn new(config: &CacheConfig, shared: Option<Arc<dyn SharedTier>>) -> Self {
        let local = moka::future::Cache::builder()
            .max_capacity(LOCAL_MAX_ENTRIES)
            .expire_after(PerEntryExpiry)
            .build();

        Self {
            local,
            local_tags: RwLock::new(HashMap::new()),
            shared,
            max_payload_bytes: config.max_payload_bytes,
            max_key_length: config.max_key_length,
        }
    }

    pub fn shared(&self) -> Option<&Arc<dyn SharedTier>> {
        self.shared.as_ref()
    }

    pub async fn get(&self, key: &str, local_ttl: Duration) -> CacheResult<Option<String>> {
        if let Some(entry) = self.local.get(key).await {
            tracing::debug!(key, "Cache HIT (local)");
            return Ok(Some(entry.value));
        }

        let Some(shared) = &self.shared else {
            return Ok(None);
        };

        match shared.get(key).await? {
            Some(value) => {
                tracing::debug!(key, "Cache HIT (shared)");
                // Backfill the local tier so repeat reads stay in-process.
                self.local
                    .insert(
                        key.to_string(),
                        LocalEntry {
                            value: value.clone(),
                            ttl: local_ttl,
                        },
                    )
                    .await;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Write-through to both tiers. Entries violating the size guards are
    /// silently rejected: oversized payloads and overlong keys are not worth
    /// failing a business operation over.
    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        local_ttl: Duration,
        tags: &[String],
    ) -> CacheResult<()> {
        if key.len() > self.max_key_length {
            tracing::debug!(
                key_length = key.len(),
                limit = self.max_key_length,
                "Cache key exceeds maximum length; entry not cached"
            );
            return Ok(());
        }
        if value.len() > self.max_payload_bytes {
            tracing::debug!(
                key,
                payload_bytes = value.len(),
                limit = self.max_payload_bytes,
                "Cache payload exceeds maximum size; entry not cached"
            );
            return Ok(());
        }

        self.local
            .insert(
                key.to_string(),
                LocalEntry {
                    value: value.to_string(),
                    ttl: local_ttl,
                },
            )
            .await;

        if !tags.is_empty() {
            let mut index = self.local_tags.write().await;
            for tag in tags {
                index
                    .entry(tag.clone())
                    .or_default()
                    .insert(key.to_string());
            }
        }

        if let Some(shared) = &self.shared {
            shared.set(key, value, ttl, tags).await?;
        }
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> CacheResult<()> {
        self.local.invalidate(key).await;
        if let Some(shared) = &self.shared {
            shared.remove(key).await?;
        }
        Ok(())
    }

    /// Drop every entry carrying the tag from both tiers. The local index
    /// only covers keys this process cached; other instances converge once
    /// their local TTL elapses.
    pub async fn remove_by_tag(&self, tag: &str) -> CacheResult<()> {
        let keys = { self.local_tags.write().await.remove(tag) };
        if let Some(keys) = keys {
            for key in &keys {
                self.local.invalidate(key).await;
            }
            tracing::debug!(tag, removed = keys.len(), "Local tier tag invalidation");
        }

        if let Some(shared) = &self.shared {
            shared.remove_tag(tag).await?;
        }
        Ok(())
    }
}
