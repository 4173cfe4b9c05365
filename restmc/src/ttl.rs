use shared::TtlSecs;

pub const DEFAULT_TTL: TtlSecs = TtlSecs::NEVER;

const MAX_AGE: &str = "max-age";

/// Parses a `Cache-Control` value of the form `max-age=<N>`.
///
/// Only the leading digits of `N` are read, so a malformed number yields `0`
/// (never expire), the same as a missing or unrelated header.
pub fn parse_max_age(cache_control: Option<&str>) -> TtlSecs {
    let Some(value) = cache_control else {
        return DEFAULT_TTL;
    };

    match value.split_once('=') {
        Some((directive, seconds)) if directive == MAX_AGE => leading_seconds(seconds),
        _ => DEFAULT_TTL,
    }
}

fn leading_seconds(raw: &str) -> TtlSecs {
    let seconds = raw
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u32, |acc, digit| {
            acc.saturating_mul(10).saturating_add(u32::from(digit - b'0'))
        });
    TtlSecs(seconds)
}
