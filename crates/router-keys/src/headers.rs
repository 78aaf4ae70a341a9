//! Rate-limit header parsing for the three families the rotator understands.
//!
//! Each provider family exposes roughly the same four facts — requests left,
//! tokens left, and how soon each resets — under different header names and
//! value formats. Parsing is kept here, independently unit-testable, so
//! `KeyRotator::on_response` stays a thin dispatch over whichever family
//! matched.

use std::collections::HashMap;
use std::time::Duration;

/// Normalized view of a provider's rate-limit headers for one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitSnapshot {
    pub remaining_requests: Option<u64>,
    pub remaining_tokens: Option<u64>,
    pub reset_after: Option<Duration>,
}

/// Parse whichever recognised header family is present. Generic `x-ratelimit-*`
/// is tried first, then NVIDIA's `x-nvapi-*`, then the Groq variant (which
/// reuses the generic names but encodes resets as compound durations like
/// `7m12s` rather than a plain second count).
pub fn parse_rate_limit_headers(headers: &HashMap<String, String>) -> RateLimitSnapshot {
    let lower: HashMap<String, &String> = headers.iter().map(|(k, v)| (k.to_ascii_lowercase(), v)).collect();

    let get = |name: &str| lower.get(name).map(|s| s.as_str());

    let remaining_requests = get("x-ratelimit-remaining-requests")
        .or_else(|| get("x-nvapi-remaining-requests"))
        .and_then(parse_u64);
    let remaining_tokens = get("x-ratelimit-remaining-tokens")
        .or_else(|| get("x-nvapi-remaining-tokens"))
        .and_then(parse_u64);

    let reset_requests = get("x-ratelimit-reset-requests").or_else(|| get("x-nvapi-reset-requests-seconds"));
    let reset_tokens = get("x-ratelimit-reset-tokens").or_else(|| get("x-nvapi-reset-tokens-seconds"));
    let retry_after = get("retry-after");

    let reset_after = reset_requests
        .and_then(parse_duration)
        .or_else(|| reset_tokens.and_then(parse_duration))
        .or_else(|| retry_after.and_then(parse_duration));

    RateLimitSnapshot {
        remaining_requests,
        remaining_tokens,
        reset_after,
    }
}

fn parse_u64(s: &str) -> Option<u64> {
    s.trim().parse::<u64>().ok()
}

/// Parse a reset-offset value. Accepts a bare number of seconds (generic and
/// NVIDIA families, and `Retry-After`) or a compound duration like `7m12s`,
/// `500ms`, `1h2m3s` (the Groq family).
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(secs) = s.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Some(Duration::from_secs_f64(secs));
        }
    }

    parse_compound_duration(s)
}

/// Parse a compound duration string made of `<number><unit>` segments
/// (`ms`, `s`, `m`, `h`), e.g. `7m12s` or `1h2m3.5s`.
fn parse_compound_duration(s: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut rest = s;
    let mut matched_any = false;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }
        let (number_str, tail) = rest.split_at(digits_end);
        let number: f64 = number_str.parse().ok()?;

        let (unit, remainder) = if let Some(t) = tail.strip_prefix("ms") {
            ("ms", t)
        } else if let Some(t) = tail.strip_prefix('s') {
            ("s", t)
        } else if let Some(t) = tail.strip_prefix('m') {
            ("m", t)
        } else if let Some(t) = tail.strip_prefix('h') {
            ("h", t)
        } else {
            return None;
        };

        let unit_duration = match unit {
            "ms" => Duration::from_secs_f64(number / 1000.0),
            "s" => Duration::from_secs_f64(number),
            "m" => Duration::from_secs_f64(number * 60.0),
            "h" => Duration::from_secs_f64(number * 3600.0),
            _ => unreachable!(),
        };
        total += unit_duration;
        matched_any = true;
        rest = remainder;
    }

    matched_any.then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_generic_family() {
        let snapshot = parse_rate_limit_headers(&headers(&[
            ("x-ratelimit-remaining-requests", "42"),
            ("x-ratelimit-remaining-tokens", "1000"),
            ("x-ratelimit-reset-requests", "30"),
        ]));
        assert_eq!(snapshot.remaining_requests, Some(42));
        assert_eq!(snapshot.remaining_tokens, Some(1000));
        assert_eq!(snapshot.reset_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn parses_nvidia_family() {
        let snapshot = parse_rate_limit_headers(&headers(&[
            ("x-nvapi-remaining-requests", "5"),
            ("x-nvapi-remaining-tokens", "200"),
            ("x-nvapi-reset-requests-seconds", "15"),
        ]));
        assert_eq!(snapshot.remaining_requests, Some(5));
        assert_eq!(snapshot.reset_after, Some(Duration::from_secs(15)));
    }

    #[test]
    fn parses_groq_compound_duration() {
        let snapshot = parse_rate_limit_headers(&headers(&[
            ("x-ratelimit-remaining-requests", "10"),
            ("x-ratelimit-reset-requests", "7m12s"),
        ]));
        assert_eq!(snapshot.reset_after, Some(Duration::from_secs(7 * 60 + 12)));
    }

    #[test]
    fn falls_back_to_retry_after() {
        let snapshot = parse_rate_limit_headers(&headers(&[("retry-after", "60")]));
        assert_eq!(snapshot.reset_after, Some(Duration::from_secs(60)));
    }

    #[test]
    fn missing_headers_yield_all_none() {
        let snapshot = parse_rate_limit_headers(&headers(&[]));
        assert_eq!(snapshot, RateLimitSnapshot::default());
    }

    #[test]
    fn compound_duration_with_milliseconds() {
        assert_eq!(parse_duration("1m500ms"), Some(Duration::from_millis(60_500)));
    }
}
