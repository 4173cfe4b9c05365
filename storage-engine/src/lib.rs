pub mod memcached;
pub mod moka_cache;

pub use memcached::MemcachedBackend;
pub use moka_cache::MokaBackend;

use restmc::ports::CacheBackend;
use shared::Result;
use shared::config::Config;
use std::sync::Arc;
use tracing::info;

/// Picks the backend named by the configuration: memcached when servers are
/// listed, otherwise the in-process moka store.
pub struct UnifiedStorageFactory;

impl UnifiedStorageFactory {
    pub fn create_from_config(config: &Config) -> Result<Arc<dyn CacheBackend>> {
        if config.uses_memcached() {
            info!(
                "Using memcached backend with {} server(s): {}",
                config.servers.len(),
                config.servers.join(", ")
            );
            let backend = MemcachedBackend::new(&config.servers, config.backend_timeout)?;
            Ok(Arc::new(backend))
        } else {
            info!("No RESTMC_SERVERS configured, using in-process moka backend");
            Ok(Arc::new(MokaBackend::new(
                "restmc".to_string(),
                config.max_entries,
            )))
        }
    }
}
