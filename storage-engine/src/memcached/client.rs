use super::codec::{Command, MemcachedCodec, Reply};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use restmc::domain::response::{AdjustResponse, DeleteResponse, GetResponse, PutResponse};
use restmc::domain::{Adjustment, CacheKey, counter_value};
use restmc::ports::CacheBackend;
use shared::{Error, Result, TtlSecs};
use std::fmt::Debug;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// memcached treats larger exptimes as absolute unix timestamps
const MAX_RELATIVE_EXPTIME: u32 = 60 * 60 * 24 * 30;
const MAX_KEY_LENGTH: usize = 250;
pub const MAX_ADJUST_ATTEMPTS: usize = 5;

type Connection = Framed<TcpStream, MemcachedCodec>;

struct Server {
    address: String,
    connection: Mutex<Option<Connection>>,
}

/// Memcached cluster client. Keys are spread over the servers by FNV-1a hash,
/// each server holds one lazily opened connection.
pub struct MemcachedBackend {
    servers: Vec<Server>,
    timeout: Duration,
}

impl MemcachedBackend {
    pub fn new(addresses: &[String], timeout: Duration) -> Result<Self> {
        if addresses.is_empty() {
            return Err(Error::Internal(
                "memcached backend needs at least one server".to_string(),
            ));
        }

        let servers = addresses
            .iter()
            .map(|address| Server {
                address: address.clone(),
                connection: Mutex::new(None),
            })
            .collect();

        Ok(Self { servers, timeout })
    }

    pub fn server_for(&self, key: &CacheKey) -> &str {
        &self.servers[self.server_index(key)].address
    }

    fn server_index(&self, key: &CacheKey) -> usize {
        fnv1a_32(key.as_bytes()) as usize % self.servers.len()
    }

    /// Sends one command and waits for its reply. The connection leaves its slot
    /// for the duration of the exchange and only returns once a whole reply was read,
    /// so a call that fails or is cancelled midway leaves no pending reply behind.
    async fn round_trip(&self, key: &CacheKey, command: Command) -> Result<Reply> {
        if key.as_bytes().len() > MAX_KEY_LENGTH {
            return Err(Error::Backend(format!(
                "key exceeds {} bytes",
                MAX_KEY_LENGTH
            )));
        }

        let server = &self.servers[self.server_index(key)];
        let mut slot = server.connection.lock().await;
        let connection = slot.take();

        match tokio::time::timeout(self.timeout, exchange(&server.address, connection, command))
            .await
        {
            Ok(Ok((connection, reply))) => {
                if let Reply::Value { key: returned, .. } = &reply {
                    if returned != key.as_str() {
                        warn!(
                            "memcached {} answered for '{}' instead of '{}'",
                            server.address, returned, key
                        );
                        return Err(Error::Backend(format!(
                            "{} answered for '{}' instead of '{}'",
                            server.address, returned, key
                        )));
                    }
                }
                *slot = Some(connection);
                Ok(reply)
            }
            Ok(Err(e)) => {
                warn!("memcached {} failed: {}", server.address, e);
                Err(e)
            }
            Err(_) => {
                warn!(
                    "memcached {} timed out after {:?}",
                    server.address, self.timeout
                );
                Err(Error::BackendUnavailable(format!(
                    "{} timed out after {:?}",
                    server.address, self.timeout
                )))
            }
        }
    }

    async fn adjust(
        &self,
        key: &CacheKey,
        adjustment: Adjustment,
        delta: u64,
        ttl: TtlSecs,
    ) -> Result<AdjustResponse> {
        for attempt in 1..=MAX_ADJUST_ATTEMPTS {
            let command = match adjustment {
                Adjustment::Increment => Command::Incr {
                    key: key.to_string(),
                    delta,
                },
                Adjustment::Decrement => Command::Decr {
                    key: key.to_string(),
                    delta,
                },
            };

            match self.round_trip(key, command).await? {
                Reply::Number(value) => return Ok(AdjustResponse::new(value)),
                Reply::NotFound => {
                    let initial = adjustment.apply(0, delta);
                    let create = Command::Add {
                        key: key.to_string(),
                        value: Bytes::from(initial.to_string()),
                        exptime: exptime(ttl),
                    };
                    match self.round_trip(key, create).await? {
                        Reply::Stored => return Ok(AdjustResponse::new(initial)),
                        // another client created it first, adjust that value instead
                        Reply::NotStored => {}
                        other => return Err(unexpected("add", other)),
                    }
                }
                Reply::ClientError(msg) if msg.contains("non-numeric") => {
                    if let Some(value) = self.replace_non_numeric(key, adjustment, delta, ttl).await? {
                        return Ok(AdjustResponse::new(value));
                    }
                }
                other => return Err(unexpected(&adjustment.to_string(), other)),
            }
            debug!("{} '{}' contended, attempt {}", adjustment, key, attempt);
        }

        Err(Error::Backend(format!(
            "gave up on {} '{}' after {} attempts",
            adjustment, key, MAX_ADJUST_ATTEMPTS
        )))
    }

    /// Overwrites a non-numeric value with the adjusted counter through gets/cas.
    /// `None` means the value changed underneath us and the caller should retry.
    async fn replace_non_numeric(
        &self,
        key: &CacheKey,
        adjustment: Adjustment,
        delta: u64,
        ttl: TtlSecs,
    ) -> Result<Option<u64>> {
        let (data, cas) = match self
            .round_trip(
                key,
                Command::Gets {
                    key: key.to_string(),
                },
            )
            .await?
        {
            Reply::Value {
                data,
                cas: Some(cas),
                ..
            } => (data, cas),
            Reply::Miss => return Ok(None),
            other => return Err(unexpected("gets", other)),
        };

        let value = adjustment.apply(counter_value(&data), delta);
        let swap = Command::Cas {
            key: key.to_string(),
            value: Bytes::from(value.to_string()),
            exptime: exptime(ttl),
            cas,
        };
        match self.round_trip(key, swap).await? {
            Reply::Stored => Ok(Some(value)),
            Reply::Exists | Reply::NotFound => Ok(None),
            other => Err(unexpected("cas", other)),
        }
    }
}

async fn exchange(
    address: &str,
    connection: Option<Connection>,
    command: Command,
) -> Result<(Connection, Reply)> {
    let mut connection = match connection {
        Some(connection) => connection,
        None => {
            let stream = TcpStream::connect(address)
                .await
                .map_err(|e| Error::BackendUnavailable(format!("{}: {}", address, e)))?;
            stream.set_nodelay(true).ok();
            debug!("Connected to memcached at {}", address);
            Framed::new(stream, MemcachedCodec)
        }
    };

    connection
        .send(command)
        .await
        .map_err(|e| Error::BackendUnavailable(format!("{}: {}", address, e)))?;

    match connection.next().await {
        Some(Ok(reply)) => Ok((connection, reply)),
        Some(Err(e)) => Err(Error::Backend(format!("{}: {}", address, e))),
        None => Err(Error::BackendUnavailable(format!(
            "{} closed the connection",
            address
        ))),
    }
}

fn unexpected(operation: &str, reply: Reply) -> Error {
    match reply {
        Reply::ClientError(msg) => Error::Backend(format!("{}: CLIENT_ERROR {}", operation, msg)),
        Reply::ServerError(msg) => Error::Backend(format!("{}: SERVER_ERROR {}", operation, msg)),
        other => Error::Backend(format!("{}: unexpected reply {:?}", operation, other)),
    }
}

fn exptime(ttl: TtlSecs) -> u32 {
    if ttl.0 <= MAX_RELATIVE_EXPTIME {
        return ttl.0;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    u32::try_from(now).unwrap_or(u32::MAX).saturating_add(ttl.0)
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5u32, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(0x0100_0193)
    })
}

#[async_trait]
impl CacheBackend for MemcachedBackend {
    fn name(&self) -> &'static str {
        "memcached"
    }

    async fn get(&self, key: &CacheKey) -> Result<GetResponse> {
        let command = Command::Get {
            key: key.to_string(),
        };
        match self.round_trip(key, command).await? {
            Reply::Value { data, .. } => Ok(GetResponse::new(true, data)),
            Reply::Miss => Err(Error::NotFound),
            other => Err(unexpected("get", other)),
        }
    }

    async fn set(&self, key: &CacheKey, value: Bytes, ttl: TtlSecs) -> Result<PutResponse> {
        let command = Command::Set {
            key: key.to_string(),
            value,
            exptime: exptime(ttl),
        };
        match self.round_trip(key, command).await? {
            Reply::Stored => Ok(PutResponse::new(true, "STORED")),
            other => Err(unexpected("set", other)),
        }
    }

    async fn add(&self, key: &CacheKey, value: Bytes, ttl: TtlSecs) -> Result<PutResponse> {
        let command = Command::Add {
            key: key.to_string(),
            value,
            exptime: exptime(ttl),
        };
        match self.round_trip(key, command).await? {
            Reply::Stored => Ok(PutResponse::new(true, "STORED")),
            Reply::NotStored => Err(Error::NotStored),
            other => Err(unexpected("add", other)),
        }
    }

    async fn delete(&self, key: &CacheKey) -> Result<DeleteResponse> {
        let command = Command::Delete {
            key: key.to_string(),
        };
        match self.round_trip(key, command).await? {
            Reply::Deleted => Ok(DeleteResponse::new(true)),
            Reply::NotFound => Err(Error::NotFound),
            other => Err(unexpected("delete", other)),
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

impl Debug for MemcachedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcachedBackend")
            .field(
                "servers",
                &self.servers.iter().map(|s| &s.address).collect::<Vec<_>>(),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accepts one connection and plays back `(expected request, reply)` pairs.
    async fn scripted_server(script: Vec<(&'static str, &'static str)>) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for (expected, reply) in script {
                let mut request = vec![0u8; expected.len()];
                socket.read_exact(&mut request).await.unwrap();
                assert_eq!(String::from_utf8_lossy(&request), expected);
                socket.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        (address, handle)
    }

    fn backend(address: String) -> MemcachedBackend {
        MemcachedBackend::new(&[address], Duration::from_secs(2)).unwrap()
    }

    fn key(raw: &str) -> CacheKey {
        CacheKey::parse(raw).unwrap()
    }

    #[test]
    fn test_requires_servers() {
        assert!(MemcachedBackend::new(&[], Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_server_selection_is_stable() {
        let servers: Vec<String> = (0..4).map(|i| format!("cache{}:11211", i)).collect();
        let first = MemcachedBackend::new(&servers, Duration::from_secs(1)).unwrap();
        let second = MemcachedBackend::new(&servers, Duration::from_secs(1)).unwrap();

        let mut used = std::collections::HashSet::new();
        for i in 0..64 {
            let k = key(&format!("user:{}", i));
            assert_eq!(first.server_for(&k), second.server_for(&k));
            used.insert(first.server_for(&k).to_string());
        }
        assert!(used.len() > 1, "keys should spread across servers");
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
    }

    #[test]
    fn test_exptime_relative_and_absolute() {
        assert_eq!(exptime(TtlSecs::NEVER), 0);
        assert_eq!(exptime(TtlSecs(60)), 60);
        assert_eq!(exptime(TtlSecs(MAX_RELATIVE_EXPTIME)), MAX_RELATIVE_EXPTIME);
        assert!(exptime(TtlSecs(MAX_RELATIVE_EXPTIME + 1)) > 1_600_000_000);
    }

    #[tokio::test]
    async fn test_get_hit_and_miss() {
        let (address, server) = scripted_server(vec![
            ("get a:b\r\n", "VALUE a:b 0 5\r\nhello\r\nEND\r\n"),
            ("get missing\r\n", "END\r\n"),
        ])
        .await;
        let backend = backend(address);

        let hit = backend.get(&key("a:b")).await.unwrap();
        assert_eq!(hit.message, Bytes::from_static(b"hello"));
        assert!(matches!(
            backend.get(&key("missing")).await.unwrap_err(),
            Error::NotFound
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_set_add_delete() {
        let (address, server) = scripted_server(vec![
            ("set k 0 60 1\r\nv\r\n", "STORED\r\n"),
            ("add k 0 0 1\r\nw\r\n", "NOT_STORED\r\n"),
            ("delete k\r\n", "DELETED\r\n"),
            ("delete k\r\n", "NOT_FOUND\r\n"),
        ])
        .await;
        let backend = backend(address);

        backend
            .set(&key("k"), Bytes::from_static(b"v"), TtlSecs(60))
            .await
            .unwrap();
        assert!(matches!(
            backend
                .add(&key("k"), Bytes::from_static(b"w"), TtlSecs::NEVER)
                .await
                .unwrap_err(),
            Error::NotStored
        ));
        assert!(backend.delete(&key("k")).await.unwrap().deleted);
        assert!(matches!(
            backend.delete(&key("k")).await.unwrap_err(),
            Error::NotFound
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_increment_creates_missing_counter() {
        let (address, server) = scripted_server(vec![
            ("incr c 1\r\n", "NOT_FOUND\r\n"),
            ("add c 0 0 1\r\n1\r\n", "STORED\r\n"),
        ])
        .await;
        let backend = backend(address);

        let response = backend
            .increment(&key("c"), 1, TtlSecs::NEVER)
            .await
            .unwrap();
        assert_eq!(response.value, 1);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_decrement_creates_missing_counter_at_zero() {
        let (address, server) = scripted_server(vec![
            ("decr c 5\r\n", "NOT_FOUND\r\n"),
            ("add c 0 30 1\r\n0\r\n", "STORED\r\n"),
        ])
        .await;
        let backend = backend(address);

        let response = backend
            .decrement(&key("c"), 5, TtlSecs(30))
            .await
            .unwrap();
        assert_eq!(response.value, 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_increment_retries_after_losing_create_race() {
        let (address, server) = scripted_server(vec![
            ("incr c 2\r\n", "NOT_FOUND\r\n"),
            ("add c 0 0 1\r\n2\r\n", "NOT_STORED\r\n"),
            ("incr c 2\r\n", "4\r\n"),
        ])
        .await;
        let backend = backend(address);

        let response = backend
            .increment(&key("c"), 2, TtlSecs::NEVER)
            .await
            .unwrap();
        assert_eq!(response.value, 4);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_increment_replaces_non_numeric_value() {
        let (address, server) = scripted_server(vec![
            (
                "incr c 1\r\n",
                "CLIENT_ERROR cannot increment or decrement non-numeric value\r\n",
            ),
            ("gets c\r\n", "VALUE c 0 4 42\r\nfail\r\nEND\r\n"),
            ("cas c 0 0 1 42\r\n1\r\n", "STORED\r\n"),
        ])
        .await;
        let backend = backend(address);

        let response = backend
            .increment(&key("c"), 1, TtlSecs::NEVER)
            .await
            .unwrap();
        assert_eq!(response.value, 1);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_a_backend_fault() {
        let (address, server) =
            scripted_server(vec![("get k\r\n", "SERVER_ERROR out of memory\r\n")]).await;
        let backend = backend(address);

        assert!(matches!(
            backend.get(&key("k")).await.unwrap_err(),
            Error::Backend(_)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let backend = backend(address);
        assert!(matches!(
            backend.get(&key("k")).await.unwrap_err(),
            Error::BackendUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(socket);
        });

        let backend = MemcachedBackend::new(&[address], Duration::from_millis(100)).unwrap();
        assert!(matches!(
            backend.get(&key("k")).await.unwrap_err(),
            Error::BackendUnavailable(_)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_get_does_not_leak_into_next_call() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            let late = tokio::spawn(async move {
                let mut request = vec![0u8; "get secret\r\n".len()];
                first.read_exact(&mut request).await.unwrap();
                tokio::time::sleep(Duration::from_millis(300)).await;
                // the client is gone by now
                let _ = first
                    .write_all(b"VALUE secret 0 6\r\nsecret\r\nEND\r\n")
                    .await;
            });

            let (mut second, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; "get other\r\n".len()];
            second.read_exact(&mut request).await.unwrap();
            assert_eq!(String::from_utf8_lossy(&request), "get other\r\n");
            second.write_all(b"END\r\n").await.unwrap();
            late.await.unwrap();
        });

        let backend = backend(address);
        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), backend.get(&key("secret"))).await;
        assert!(cancelled.is_err());

        assert!(matches!(
            backend.get(&key("other")).await.unwrap_err(),
            Error::NotFound
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_value_for_another_key_is_rejected() {
        let (address, server) =
            scripted_server(vec![("get a\r\n", "VALUE b 0 1\r\nx\r\nEND\r\n")]).await;
        let backend = backend(address);

        assert!(matches!(
            backend.get(&key("a")).await.unwrap_err(),
            Error::Backend(_)
        ));
        server.await.unwrap();
    }
}
