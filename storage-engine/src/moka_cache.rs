use async_trait::async_trait;
use bytes::Bytes;
use moka::Expiry;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use restmc::domain::response::{AdjustResponse, DeleteResponse, GetResponse, PutResponse};
use restmc::domain::{Adjustment, CacheKey, counter_value};
use restmc::ports::CacheBackend;
use shared::{Error, Result, TtlSecs};
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone, Copy, Debug)]
enum Lifetime {
    /// Replace the remaining time to live; `None` never expires.
    Reset(Option<Duration>),
    /// Keep whatever time to live the entry already had.
    Keep,
}

#[derive(Clone, Debug)]
struct StoredValue {
    bytes: Bytes,
    lifetime: Lifetime,
}

impl StoredValue {
    fn new(bytes: Bytes, ttl: TtlSecs) -> Self {
        Self {
            bytes,
            lifetime: Lifetime::Reset(ttl.as_duration()),
        }
    }
}

struct PerEntryExpiry;

impl Expiry<String, StoredValue> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        match value.lifetime {
            Lifetime::Reset(ttl) => ttl,
            Lifetime::Keep => None,
        }
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        match value.lifetime {
            Lifetime::Reset(ttl) => ttl,
            Lifetime::Keep => duration_until_expiry,
        }
    }
}

/// Moka-based in-process backend with per-entry TTL support
/// Provides lock-free, concurrent cache with optional size bounds
pub struct MokaBackend {
    cache: Cache<String, StoredValue>,
}

impl MokaBackend {
    /// Create an unbounded backend
    pub fn new_unbounded() -> Self {
        Self::new("restmc".to_string(), None)
    }

    /// Create a backend from name and optional capacity
    pub fn new(name: String, max_entries: Option<u64>) -> Self {
        let mut builder = Cache::builder().name(&name).expire_after(PerEntryExpiry);

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
        }
    }

    async fn adjust(
        &self,
        key: &CacheKey,
        adjustment: Adjustment,
        delta: u64,
        ttl: TtlSecs,
    ) -> Result<AdjustResponse> {
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|current| async move {
                let next = match current {
                    Some(entry) => StoredValue {
                        bytes: counter_bytes(
                            adjustment.apply(counter_value(&entry.value().bytes), delta),
                        ),
                        lifetime: Lifetime::Keep,
                    },
                    None => StoredValue::new(counter_bytes(adjustment.apply(0, delta)), ttl),
                };
                Op::Put(next)
            })
            .await;

        match result {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => {
                Ok(AdjustResponse::new(counter_value(&entry.value().bytes)))
            }
            _ => Err(Error::Internal(format!("counter '{}' was not written", key))),
        }
    }
}

fn counter_bytes(value: u64) -> Bytes {
    Bytes::from(value.to_string())
}

#[async_trait]
impl CacheBackend for MokaBackend {
    fn name(&self) -> &'static str {
        "moka"
    }

    async fn get(&self, key: &CacheKey) -> Result<GetResponse> {
        match self.cache.get(key.as_str()).await {
            Some(stored) => Ok(GetResponse::new(true, stored.bytes)),
            None => Err(Error::NotFound), // Either doesn't exist or TTL expired
        }
    }

    async fn set(&self, key: &CacheKey, value: Bytes, ttl: TtlSecs) -> Result<PutResponse> {
        self.cache
            .insert(key.to_string(), StoredValue::new(value, ttl))
            .await;
        Ok(PutResponse::new(true, "Successfully inserted"))
    }

    async fn add(&self, key: &CacheKey, value: Bytes, ttl: TtlSecs) -> Result<PutResponse> {
        let entry = self
            .cache
            .entry(key.to_string())
            .or_insert_with(async move { StoredValue::new(value, ttl) })
            .await;

        if entry.is_fresh() {
            Ok(PutResponse::new(true, "Successfully inserted"))
        } else {
            debug!("add refused, key '{}' already present", key);
            Err(Error::NotStored)
        }
    }

    async fn delete(&self, key: &CacheKey) -> Result<DeleteResponse> {
        match self.cache.remove(key.as_str()).await {
            Some(_) => Ok(DeleteResponse::new(true)),
            None => Err(Error::NotFound),
        }
    }

    async fn increment(
        &self,
        key: &CacheKey,
        delta: u64,
        ttl: TtlSecs,
    ) -> Result<AdjustResponse> {
        self.adjust(key, Adjustment::Increment, delta, ttl).await
    }

    async fn decrement(
        &self,
        key: &CacheKey,
        delta: u64,
        ttl: TtlSecs,
    ) -> Result<AdjustResponse> {
        self.adjust(key, Adjustment::Decrement, delta, ttl).await
    }
}

impl Debug for MokaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaBackend")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}
