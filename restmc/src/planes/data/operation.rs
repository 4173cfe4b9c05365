use crate::domain::{Adjustment, CacheKey, Outcome};
use async_trait::async_trait;
use bytes::Bytes;
use shared::{Result, TtlSecs};

/// Application-level cache operations trait
/// One method per HTTP verb; backend misses and refusals come back as outcomes
#[async_trait]
pub trait CacheOperations: Send + Sync + 'static {
    async fn fetch(&self, key: &CacheKey) -> Result<Outcome>;

    async fn write(&self, key: &CacheKey, value: Bytes, ttl: TtlSecs) -> Result<Outcome>;

    async fn create(&self, key: &CacheKey, value: Bytes, ttl: TtlSecs) -> Result<Outcome>;

    async fn delete(&self, key: &CacheKey) -> Result<Outcome>;

    async fn adjust(
        &self,
        key: &CacheKey,
        adjustment: Adjustment,
        amount: u64,
        ttl: TtlSecs,
    ) -> Result<Outcome>;
}
