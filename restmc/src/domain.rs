use bytes::Bytes;
use shared::{Error, Result};
use std::fmt;

/// Flat, `:`-delimited key addressing one slot in the backend store.
///
/// Never empty and never contains whitespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.chars().any(char::is_whitespace) {
            return Err(Error::InvalidKey(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Result of one cache operation as seen by the HTTP layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Found(Bytes),
    NotFound,
    Stored,
    /// create-only write refused because the key already holds a value
    NotStored,
    Deleted,
    /// counter value after an increment or decrement
    Adjusted(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Adjustment {
    Increment,
    Decrement,
}

impl Adjustment {
    /// Maps a reserved leading path segment to its adjustment.
    pub fn from_prefix(segment: &str) -> Option<Self> {
        match segment {
            "+" => Some(Adjustment::Increment),
            "-" => Some(Adjustment::Decrement),
            _ => None,
        }
    }

    /// Applies `amount` to `current`: increments wrap, decrements stop at zero.
    pub fn apply(&self, current: u64, amount: u64) -> u64 {
        match self {
            Adjustment::Increment => current.wrapping_add(amount),
            Adjustment::Decrement => current.saturating_sub(amount),
        }
    }
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Adjustment::Increment => f.write_str("incr"),
            Adjustment::Decrement => f.write_str("decr"),
        }
    }
}

/// Reads a stored counter. Anything that is not a plain decimal integer counts as zero.
pub fn counter_value(raw: &[u8]) -> u64 {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

pub mod response {
    use bytes::Bytes;

    #[derive(Clone, Debug)]
    pub struct PutResponse {
        pub created: bool,
        pub message: String,
    }

    impl PutResponse {
        pub fn new(created: bool, message: impl Into<String>) -> Self {
            Self {
                created,
                message: message.into(),
            }
        }
    }

    #[derive(Clone, Debug)]
    pub struct GetResponse {
        pub found: bool,
        pub message: Bytes,
    }

    impl GetResponse {
        pub fn new(found: bool, message: Bytes) -> Self {
            Self { found, message }
        }
    }

    #[derive(Clone, Debug)]
    pub struct DeleteResponse {
        pub deleted: bool,
    }

    impl DeleteResponse {
        pub fn new(deleted: bool) -> Self {
            Self { deleted }
        }
    }

    #[derive(Clone, Copy, Debug)]
    pub struct AdjustResponse {
        pub value: u64,
    }

    impl AdjustResponse {
        pub fn new(value: u64) -> Self {
            Self { value }
        }
    }
}
