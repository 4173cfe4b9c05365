//! URL path to cache key mapping.
//!
//! Segments are joined with `:` and nothing else is normalised, so `/a/b/c`
//! and `/a:b:c` address the same slot. That collision is accepted.

use crate::domain::{Adjustment, CacheKey};
use shared::Result;

pub const KEY_DELIMITER: &str = ":";

/// Splits a decoded path remainder (no leading slash) into its segments.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').collect()
}

pub fn derive_key<I, S>(segments: I) -> Result<CacheKey>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = segments
        .into_iter()
        .map(|s| s.as_ref().to_owned())
        .collect::<Vec<_>>()
        .join(KEY_DELIMITER);
    CacheKey::parse(joined)
}

/// What a PUT or POST path writes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteTarget {
    Literal(CacheKey),
    Adjust {
        adjustment: Adjustment,
        key: CacheKey,
    },
}

/// Resolves write paths, treating a leading `+` or `-` segment as a counter adjustment
/// of the key formed by the remaining segments.
pub fn write_target(segments: &[&str]) -> Result<WriteTarget> {
    if let Some((first, rest)) = segments.split_first() {
        if let Some(adjustment) = Adjustment::from_prefix(first) {
            let key = derive_key(rest.iter())?;
            return Ok(WriteTarget::Adjust { adjustment, key });
        }
    }
    derive_key(segments.iter()).map(WriteTarget::Literal)
}
