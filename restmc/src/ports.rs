#![deny(clippy::all)]

use crate::domain::CacheKey;
use crate::domain::response::{AdjustResponse, DeleteResponse, GetResponse, PutResponse};
use async_trait::async_trait;
use bytes::Bytes;
use shared::{Result, TtlSecs};

// Ports are the pluggable extension points for the cache backends behind the HTTP layer

/// Port for the key-value store (in-process moka or a memcached cluster).
///
/// Expired entries must behave exactly like absent ones.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// `Err(Error::NotFound)` on a miss.
    async fn get(&self, key: &CacheKey) -> Result<GetResponse>;

    /// Unconditional write; replaces the value and its TTL.
    async fn set(&self, key: &CacheKey, value: Bytes, ttl: TtlSecs) -> Result<PutResponse>;

    /// Atomic add-if-absent; `Err(Error::NotStored)` if the key holds a value.
    async fn add(&self, key: &CacheKey, value: Bytes, ttl: TtlSecs) -> Result<PutResponse>;

    /// `Err(Error::NotFound)` if there was nothing to delete.
    async fn delete(&self, key: &CacheKey) -> Result<DeleteResponse>;

    /// Atomically adds `delta`. An absent key is created at `delta` with `ttl`,
    /// a non-numeric value counts as zero.
    async fn increment(&self, key: &CacheKey, delta: u64, ttl: TtlSecs)
    -> Result<AdjustResponse>;

    /// Atomically subtracts `delta`, stopping at zero. An absent key is created at
    /// zero with `ttl`, a non-numeric value counts as zero.
    async fn decrement(&self, key: &CacheKey, delta: u64, ttl: TtlSecs)
    -> Result<AdjustResponse>;
}
