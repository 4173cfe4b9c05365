pub mod cache_operations;
pub mod operation;

pub use cache_operations::CacheOperationsService;
pub use operation::CacheOperations;
