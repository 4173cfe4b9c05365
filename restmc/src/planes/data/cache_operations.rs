use crate::domain::{Adjustment, CacheKey, Outcome};
use crate::marshal;
use crate::planes::data::operation::CacheOperations;
use crate::ports::CacheBackend;
use async_trait::async_trait;
use bytes::Bytes;
use shared::{Error, Result, TtlSecs};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_ADJUST_AMOUNT: u64 = 1;

/// Reads the adjustment amount from a request body, falling back to 1.
pub fn parse_amount(body: &[u8]) -> u64 {
    std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_ADJUST_AMOUNT)
}

/// Application service that orchestrates cache operations
/// This is the main entry point for all cache operations in the application core
#[derive(Clone)]
pub struct CacheOperationsService {
    backend: Arc<dyn CacheBackend>,
    marshal: bool,
}

impl CacheOperationsService {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            marshal: false,
        }
    }

    pub fn with_marshal(backend: Arc<dyn CacheBackend>, marshal: bool) -> Self {
        Self { backend, marshal }
    }

    pub fn marshal_enabled(&self) -> bool {
        self.marshal
    }

    fn encode(&self, value: Bytes) -> Result<Bytes> {
        if self.marshal {
            marshal::encode(&value)
        } else {
            Ok(value)
        }
    }

    fn decode(&self, stored: Bytes) -> Bytes {
        if !self.marshal {
            return stored;
        }
        // counters and foreign writes are stored raw
        marshal::decode(&stored).unwrap_or(stored)
    }
}

impl std::fmt::Debug for CacheOperationsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOperationsService")
            .field("backend", &self.backend.name())
            .field("marshal", &self.marshal)
            .finish()
    }
}

#[async_trait]
impl CacheOperations for CacheOperationsService {
    async fn fetch(&self, key: &CacheKey) -> Result<Outcome> {
        match self.backend.get(key).await {
            Ok(response) => Ok(Outcome::Found(self.decode(response.message))),
            Err(Error::NotFound) => {
                debug!("Miss for key '{}' on {}", key, self.backend.name());
                Ok(Outcome::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    async fn write(&self, key: &CacheKey, value: Bytes, ttl: TtlSecs) -> Result<Outcome> {
        let value = self.encode(value)?;
        self.backend.set(key, value, ttl).await?;
        debug!("Stored key '{}' with ttl {}s", key, ttl.0);
        Ok(Outcome::Stored)
    }

    async fn create(&self, key: &CacheKey, value: Bytes, ttl: TtlSecs) -> Result<Outcome> {
        let value = self.encode(value)?;
        match self.backend.add(key, value, ttl).await {
            Ok(_) => {
                debug!("Created key '{}' with ttl {}s", key, ttl.0);
                Ok(Outcome::Stored)
            }
            Err(Error::NotStored) => {
                debug!("Key '{}' already exists, nothing written", key);
                Ok(Outcome::NotStored)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &CacheKey) -> Result<Outcome> {
        match self.backend.delete(key).await {
            Ok(response) if response.deleted => Ok(Outcome::Deleted),
            Ok(_) | Err(Error::NotFound) => Ok(Outcome::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn adjust(
        &self,
        key: &CacheKey,
        adjustment: Adjustment,
        amount: u64,
        ttl: TtlSecs,
    ) -> Result<Outcome> {
        let response = match adjustment {
            Adjustment::Increment => self.backend.increment(key, amount, ttl).await?,
            Adjustment::Decrement => self.backend.decrement(key, amount, ttl).await?,
        };
        debug!(
            "{} '{}' by {} -> {}",
            adjustment, key, amount, response.value
        );
        Ok(Outcome::Adjusted(response.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::counter_value;
    use crate::domain::response::{AdjustResponse, DeleteResponse, GetResponse, PutResponse};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MapBackend {
        entries: Mutex<HashMap<String, Bytes>>,
    }

    impl MapBackend {
        async fn raw(&self, key: &str) -> Option<Bytes> {
            self.entries.lock().await.get(key).cloned()
        }

        async fn adjust(&self, key: &CacheKey, adjustment: Adjustment, delta: u64) -> u64 {
            let mut entries = self.entries.lock().await;
            let value = match entries.get(key.as_str()) {
                Some(current) => adjustment.apply(counter_value(current), delta),
                None => adjustment.apply(0, delta),
            };
            entries.insert(key.to_string(), Bytes::from(value.to_string()));
            value
        }
    }

    #[async_trait]
    impl CacheBackend for MapBackend {
        fn name(&self) -> &'static str {
            "map"
        }

        async fn get(&self, key: &CacheKey) -> Result<GetResponse> {
            self.raw(key.as_str())
                .await
                .map(|v| GetResponse::new(true, v))
                .ok_or(Error::NotFound)
        }

        async fn set(&self, key: &CacheKey, value: Bytes, _ttl: TtlSecs) -> Result<PutResponse> {
            self.entries.lock().await.insert(key.to_string(), value);
            Ok(PutResponse::new(true, "stored"))
        }

        async fn add(&self, key: &CacheKey, value: Bytes, _ttl: TtlSecs) -> Result<PutResponse> {
            let mut entries = self.entries.lock().await;
            if entries.contains_key(key.as_str()) {
                return Err(Error::NotStored);
            }
            entries.insert(key.to_string(), value);
            Ok(PutResponse::new(true, "stored"))
        }

        async fn delete(&self, key: &CacheKey) -> Result<DeleteResponse> {
            match self.entries.lock().await.remove(key.as_str()) {
                Some(_) => Ok(DeleteResponse::new(true)),
                None => Err(Error::NotFound),
            }
        }

        async fn increment(
            &self,
            key: &CacheKey,
            delta: u64,
            _ttl: TtlSecs,
        ) -> Result<AdjustResponse> {
            Ok(AdjustResponse::new(
                self.adjust(key, Adjustment::Increment, delta).await,
            ))
        }

        async fn decrement(
            &self,
            key: &CacheKey,
            delta: u64,
            _ttl: TtlSecs,
        ) -> Result<AdjustResponse> {
            Ok(AdjustResponse::new(
                self.adjust(key, Adjustment::Decrement, delta).await,
            ))
        }
    }

    struct DownBackend;

    #[async_trait]
    impl CacheBackend for DownBackend {
        fn name(&self) -> &'static str {
            "down"
        }

        async fn get(&self, _key: &CacheKey) -> Result<GetResponse> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }

        async fn set(&self, _: &CacheKey, _: Bytes, _: TtlSecs) -> Result<PutResponse> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }

        async fn add(&self, _: &CacheKey, _: Bytes, _: TtlSecs) -> Result<PutResponse> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }

        async fn delete(&self, _: &CacheKey) -> Result<DeleteResponse> {
            Err(Error::Backend("SERVER_ERROR out of memory".into()))
        }

        async fn increment(&self, _: &CacheKey, _: u64, _: TtlSecs) -> Result<AdjustResponse> {
            Err(Error::BackendUnavailable("timed out".into()))
        }

        async fn decrement(&self, _: &CacheKey, _: u64, _: TtlSecs) -> Result<AdjustResponse> {
            Err(Error::BackendUnavailable("timed out".into()))
        }
    }

    fn key(raw: &str) -> CacheKey {
        CacheKey::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(b"17"), 17);
        assert_eq!(parse_amount(b" 17\n"), 17);
        assert_eq!(parse_amount(b""), 1);
        assert_eq!(parse_amount(b"fail"), 1);
        assert_eq!(parse_amount(b"-3"), 1);
        assert_eq!(parse_amount(b"0"), 0);
    }

    #[tokio::test]
    async fn test_fetch_hit_and_miss() {
        let service = CacheOperationsService::new(Arc::new(MapBackend::default()));
        assert_eq!(service.fetch(&key("k")).await.unwrap(), Outcome::NotFound);

        service
            .write(&key("k"), Bytes::from_static(b"v"), TtlSecs::NEVER)
            .await
            .unwrap();
        assert_eq!(
            service.fetch(&key("k")).await.unwrap(),
            Outcome::Found(Bytes::from_static(b"v"))
        );
    }

    #[tokio::test]
    async fn test_create_is_create_only() {
        let service = CacheOperationsService::new(Arc::new(MapBackend::default()));
        let first = service
            .create(&key("k"), Bytes::from_static(b"one"), TtlSecs::NEVER)
            .await
            .unwrap();
        assert_eq!(first, Outcome::Stored);

        let second = service
            .create(&key("k"), Bytes::from_static(b"two"), TtlSecs::NEVER)
            .await
            .unwrap();
        assert_eq!(second, Outcome::NotStored);
        assert_eq!(
            service.fetch(&key("k")).await.unwrap(),
            Outcome::Found(Bytes::from_static(b"one"))
        );
    }

    #[tokio::test]
    async fn test_delete_outcomes() {
        let service = CacheOperationsService::new(Arc::new(MapBackend::default()));
        assert_eq!(service.delete(&key("k")).await.unwrap(), Outcome::NotFound);

        service
            .write(&key("k"), Bytes::from_static(b"v"), TtlSecs::NEVER)
            .await
            .unwrap();
        assert_eq!(service.delete(&key("k")).await.unwrap(), Outcome::Deleted);
        assert_eq!(service.fetch(&key("k")).await.unwrap(), Outcome::NotFound);
    }

    #[tokio::test]
    async fn test_adjust_outcomes() {
        let service = CacheOperationsService::new(Arc::new(MapBackend::default()));
        let incr = service
            .adjust(&key("c"), Adjustment::Increment, 1, TtlSecs::NEVER)
            .await
            .unwrap();
        assert_eq!(incr, Outcome::Adjusted(1));

        let decr = service
            .adjust(&key("d"), Adjustment::Decrement, 1, TtlSecs::NEVER)
            .await
            .unwrap();
        assert_eq!(decr, Outcome::Adjusted(0));
    }

    #[tokio::test]
    async fn test_marshal_wraps_stored_values() {
        let backend = Arc::new(MapBackend::default());
        let service = CacheOperationsService::with_marshal(backend.clone(), true);
        assert!(service.marshal_enabled());

        service
            .write(&key("k"), Bytes::from_static(b"hello"), TtlSecs::NEVER)
            .await
            .unwrap();
        assert_eq!(
            backend.raw("k").await.unwrap(),
            Bytes::from_static(br#"{"b64":"aGVsbG8="}"#)
        );
        assert_eq!(
            service.fetch(&key("k")).await.unwrap(),
            Outcome::Found(Bytes::from_static(b"hello"))
        );
    }

    #[tokio::test]
    async fn test_marshal_leaves_counters_readable() {
        let service =
            CacheOperationsService::with_marshal(Arc::new(MapBackend::default()), true);
        service
            .adjust(&key("c"), Adjustment::Increment, 5, TtlSecs::NEVER)
            .await
            .unwrap();
        assert_eq!(
            service.fetch(&key("c")).await.unwrap(),
            Outcome::Found(Bytes::from_static(b"5"))
        );
    }

    #[tokio::test]
    async fn test_marshal_keeps_written_counters_adjustable() {
        let backend = Arc::new(MapBackend::default());
        let service = CacheOperationsService::with_marshal(backend.clone(), true);
        service
            .write(&key("c"), Bytes::from_static(b"123"), TtlSecs::NEVER)
            .await
            .unwrap();
        assert_eq!(backend.raw("c").await.unwrap(), Bytes::from_static(b"123"));

        let outcome = service
            .adjust(&key("c"), Adjustment::Increment, 1, TtlSecs::NEVER)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Adjusted(124));
    }

    #[tokio::test]
    async fn test_backend_faults_propagate() {
        let service = CacheOperationsService::new(Arc::new(DownBackend));
        assert!(matches!(
            service.fetch(&key("k")).await,
            Err(Error::BackendUnavailable(_))
        ));
        assert!(matches!(
            service
                .create(&key("k"), Bytes::new(), TtlSecs::NEVER)
                .await,
            Err(Error::BackendUnavailable(_))
        ));
        assert!(matches!(
            service.delete(&key("k")).await,
            Err(Error::Backend(_))
        ));
        assert!(matches!(
            service
                .adjust(&key("k"), Adjustment::Decrement, 1, TtlSecs::NEVER)
                .await,
            Err(Error::BackendUnavailable(_))
        ));
    }
}
