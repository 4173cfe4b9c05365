use axum::http::{header, HeaderMap};
use restmc::ttl::parse_max_age;
use shared::TtlSecs;

/// TTL for a write request, taken from its first `Cache-Control` header.
pub fn extract_ttl(headers: &HeaderMap) -> TtlSecs {
    parse_max_age(
        headers
            .get(header::CACHE_CONTROL)
            .and_then(|value| value.to_str().ok()),
    )
}
