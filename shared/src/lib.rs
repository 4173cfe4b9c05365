// shared/src/lib.rs

use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid key: {0:?}")]
    InvalidKey(String),
    #[error("not found")]
    NotFound,
    #[error("not stored")]
    NotStored,
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("backend: {0}")]
    Backend(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Time-to-live in whole seconds. Zero means the entry never expires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TtlSecs(pub u32);

impl TtlSecs {
    pub const NEVER: TtlSecs = TtlSecs(0);

    pub fn is_never(&self) -> bool {
        self.0 == 0
    }

    /// `None` when the entry should live until evicted or deleted.
    pub fn as_duration(&self) -> Option<Duration> {
        if self.is_never() {
            None
        } else {
            Some(Duration::from_secs(u64::from(self.0)))
        }
    }
}

pub mod config;
