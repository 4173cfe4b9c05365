use restmc::planes::data::CacheOperationsService;
use shared::config::Config;
use std::sync::Arc;
use storage_engine::UnifiedStorageFactory;

/// Server state shared across handlers
#[derive(Clone, Debug)]
pub struct AppState {
    pub cache_operations: Arc<CacheOperationsService>,
}

impl AppState {
    pub fn new(cache_operations: Arc<CacheOperationsService>) -> Self {
        Self { cache_operations }
    }

    /// Connects the backend named by the configuration.
    pub fn from_config(config: &Config) -> shared::Result<Self> {
        let backend = UnifiedStorageFactory::create_from_config(config)?;
        let cache_operations = CacheOperationsService::with_marshal(backend, config.marshal);
        tracing::info!("Cache operations ready: {:?}", cache_operations);

        Ok(Self::new(Arc::new(cache_operations)))
    }
}
