//! Derive a policy patch from upstream rate limit headers.
//!
//! Standards-track values win outright. The legacy `x-ratelimit-*` and
//! `x-rate-limit-*` headers are consulted per field, only where the
//! standards-track field is missing.

use http::HeaderMap;
use tracing::trace;

use super::headers::{
    parse_policy_header, parse_usage_header, LEGACY_LIMIT, LEGACY_RESET, LEGACY_WINDOW,
    RATELIMIT, RATELIMIT_POLICY,
};
use super::policy::{is_valid_window, PolicyPatch, MAX_WINDOW_SECONDS};

/// Extract a [`PolicyPatch`] from response headers.
///
/// When no window is advertised but a legacy reset timestamp is, the window
/// is taken as the time left until that reset, clamped to between one second
/// and [`MAX_WINDOW_SECONDS`]. Fields
/// that cannot be read are left unset; the result may be empty.
pub fn negotiate(headers: &HeaderMap, now_millis: i64) -> PolicyPatch {
    let policy = header_str(headers, RATELIMIT_POLICY)
        .map(parse_policy_header)
        .unwrap_or_default();

    if let Some(usage) = header_str(headers, RATELIMIT).map(parse_usage_header) {
        trace!(
            policy = ?usage.policy,
            remaining = ?usage.remaining,
            reset_seconds = ?usage.reset_seconds,
            "Upstream reported rate limit usage"
        );
    }

    let max_requests = policy
        .limit
        .and_then(|limit| u32::try_from(limit).ok())
        .or_else(|| legacy_value::<u32>(headers, LEGACY_LIMIT, |_| true));

    let window_seconds = policy
        .window_seconds
        .filter(|w| is_valid_window(*w))
        .or_else(|| legacy_value::<f64>(headers, LEGACY_WINDOW, |w| is_valid_window(*w)))
        .or_else(|| {
            legacy_value::<i64>(headers, LEGACY_RESET, |_| true).map(|reset_epoch_seconds| {
                let now_epoch_seconds = now_millis.div_euclid(1000);
                reset_epoch_seconds
                    .saturating_sub(now_epoch_seconds)
                    .clamp(1, MAX_WINDOW_SECONDS as i64) as f64
            })
        });

    PolicyPatch {
        max_requests,
        window_seconds,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// First header in `names` whose value parses as `T` and passes `accept`.
fn legacy_value<T: std::str::FromStr>(
    headers: &HeaderMap,
    names: &[&str],
    accept: impl Fn(&T) -> bool,
) -> Option<T> {
    names.iter().find_map(|name| {
        header_str(headers, name)
            .and_then(|v| v.trim().parse().ok())
            .filter(|v| accept(v))
    })
}
