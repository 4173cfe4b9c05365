pub mod domain;
pub mod keys;
pub mod marshal;
pub mod planes;
pub mod ports;
pub mod ttl;

pub use domain::{Adjustment, CacheKey, Outcome};
pub use planes::data::CacheOperationsService;
pub use ports::CacheBackend;
