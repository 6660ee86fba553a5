//! Build and parse rate limit header values.
//!
//! Two families are handled. The standards-track pair from the IETF
//! [RateLimit header fields draft](https://datatracker.ietf.org/doc/draft-ietf-httpapi-ratelimit-headers/):
//!
//! ```text
//! RateLimit: "<policy>";r=<remaining>;t=<reset seconds>
//! RateLimit-Policy: "<policy>";q=<quota>;w=<window seconds>
//! ```
//!
//! and the older numeric `RateLimit-Limit` / `X-RateLimit-*` headers, which
//! are only read as a fallback and only written on synthesized denials.
//!
//! Parsing is tolerant: a field that is missing or malformed is simply absent
//! from the result.

use std::sync::LazyLock;

use regex::Regex;

/// Standards-track usage header.
pub const RATELIMIT: &str = "ratelimit";
/// Standards-track policy header.
pub const RATELIMIT_POLICY: &str = "ratelimit-policy";
/// Legacy numeric limit header.
pub const RATELIMIT_LIMIT: &str = "ratelimit-limit";
/// Legacy numeric remaining header.
pub const RATELIMIT_REMAINING: &str = "ratelimit-remaining";
/// Legacy reset header (unix seconds).
pub const RATELIMIT_RESET: &str = "ratelimit-reset";

/// Fallback limit headers, in lookup order.
pub(crate) const LEGACY_LIMIT: &[&str] = &["x-ratelimit-limit", "x-rate-limit-limit"];
/// Fallback window headers, in lookup order.
pub(crate) const LEGACY_WINDOW: &[&str] = &["x-ratelimit-window", "x-rate-limit-window"];
/// Fallback reset headers (unix seconds), in lookup order.
pub(crate) const LEGACY_RESET: &[&str] = &["x-ratelimit-reset", "x-rate-limit-reset"];

static POLICY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*"((?:[^"\\]|\\.)*)""#).expect("valid policy name regex")
});

static REMAINING: LazyLock<Regex> = LazyLock::new(|| param_regex("r", r"\d+"));
static RESET: LazyLock<Regex> = LazyLock::new(|| param_regex("t", r"\d+"));
static QUOTA: LazyLock<Regex> = LazyLock::new(|| param_regex("q", r"\d+"));
static WINDOW: LazyLock<Regex> = LazyLock::new(|| param_regex("w", r"\d+(?:\.\d+)?"));

fn param_regex(key: &str, value: &str) -> Regex {
    Regex::new(&format!(r"(?:^|;)\s*{key}\s*=\s*({value})\s*(?:;|,|$)"))
        .expect("valid header parameter regex")
}

/// Fields extracted from a `RateLimit` header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageHeader {
    /// Policy identifier
    pub policy: Option<String>,
    /// Requests left in the window
    pub remaining: Option<u64>,
    /// Seconds until the window resets
    pub reset_seconds: Option<u64>,
}

/// Fields extracted from a `RateLimit-Policy` header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyHeader {
    /// Policy identifier
    pub policy: Option<String>,
    /// Requests allowed per window
    pub limit: Option<u64>,
    /// Window length in seconds
    pub window_seconds: Option<f64>,
}

impl UsageHeader {
    /// True when nothing could be extracted.
    pub fn is_empty(&self) -> bool {
        self.policy.is_none() && self.remaining.is_none() && self.reset_seconds.is_none()
    }
}

impl PolicyHeader {
    /// True when nothing could be extracted.
    pub fn is_empty(&self) -> bool {
        self.policy.is_none() && self.limit.is_none() && self.window_seconds.is_none()
    }
}

/// Build a `RateLimit` value. `t` is only emitted for a positive reset.
pub fn build_usage_header(policy: &str, remaining: u64, reset_seconds: u64) -> String {
    let mut value = format!("{};r={remaining}", quote(policy));
    if reset_seconds > 0 {
        value.push_str(&format!(";t={reset_seconds}"));
    }
    value
}

/// Build a `RateLimit-Policy` value. `w` is only emitted for a positive window.
pub fn build_policy_header(policy: &str, limit: u64, window_seconds: Option<f64>) -> String {
    let mut value = format!("{};q={limit}", quote(policy));
    if let Some(window) = window_seconds.filter(|w| *w > 0.0) {
        value.push_str(&format!(";w={window}"));
    }
    value
}

/// Parse a `RateLimit` value.
pub fn parse_usage_header(value: &str) -> UsageHeader {
    let (policy, params) = split_policy_name(value);
    UsageHeader {
        policy,
        remaining: capture(&REMAINING, params).and_then(|v| v.parse().ok()),
        reset_seconds: capture(&RESET, params).and_then(|v| v.parse().ok()),
    }
}

/// Parse a `RateLimit-Policy` value.
pub fn parse_policy_header(value: &str) -> PolicyHeader {
    let (policy, params) = split_policy_name(value);
    PolicyHeader {
        policy,
        limit: capture(&QUOTA, params).and_then(|v| v.parse().ok()),
        window_seconds: capture(&WINDOW, params).and_then(|v| v.parse().ok()),
    }
}

/// Separate the quoted policy name from the parameter list that follows it.
fn split_policy_name(value: &str) -> (Option<String>, &str) {
    match POLICY_NAME.captures(value) {
        Some(caps) => {
            let end = caps.get(0).map_or(0, |m| m.end());
            let name = caps.get(1).map(|m| unquote(m.as_str()));
            (name, &value[end..])
        }
        None => (None, value),
    }
}

/// Render a policy identifier as a quoted string that is always a valid
/// header value. `"` and `\` are escaped; characters outside printable
/// ASCII become `_`.
fn quote(policy: &str) -> String {
    let mut quoted = String::with_capacity(policy.len() + 2);
    quoted.push('"');
    for c in policy.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            ' '..='~' => quoted.push(c),
            _ => quoted.push('_'),
        }
    }
    quoted.push('"');
    quoted
}

fn unquote(escaped: &str) -> String {
    let mut name = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => name.extend(chars.next()),
            _ => name.push(c),
        }
    }
    name
}

fn capture<'a>(regex: &Regex, haystack: &'a str) -> Option<&'a str> {
    regex
        .captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_build_usage_header() {
        assert_eq!(build_usage_header("api", 75, 30), "\"api\";r=75;t=30");
        assert_eq!(build_usage_header("api", 0, 0), "\"api\";r=0");
    }

    #[test]
    fn test_build_policy_header() {
        assert_eq!(build_policy_header("api", 100, Some(60.0)), "\"api\";q=100;w=60");
        assert_eq!(build_policy_header("api", 100, Some(1.5)), "\"api\";q=100;w=1.5");
        assert_eq!(build_policy_header("api", 100, Some(0.0)), "\"api\";q=100");
        assert_eq!(build_policy_header("api", 100, None), "\"api\";q=100");
    }

    #[test]
    fn test_parse_usage_header() {
        assert_eq!(
            parse_usage_header("\"p\";r=75;t=30"),
            UsageHeader {
                policy: Some("p".to_string()),
                remaining: Some(75),
                reset_seconds: Some(30),
            }
        );
    }

    #[test]
    fn test_parse_policy_header() {
        assert_eq!(
            parse_policy_header("\"p\";q=100;w=60"),
            PolicyHeader {
                policy: Some("p".to_string()),
                limit: Some(100),
                window_seconds: Some(60.0),
            }
        );
    }

    #[test]
    fn test_parse_tolerates_whitespace_and_order() {
        let parsed = parse_policy_header(" \"burst\" ; w = 10 ; q = 5");
        assert_eq!(parsed.policy.as_deref(), Some("burst"));
        assert_eq!(parsed.limit, Some(5));
        assert_eq!(parsed.window_seconds, Some(10.0));
    }

    #[test]
    fn test_parse_ignores_params_inside_policy_name() {
        let parsed = parse_usage_header("\"a;r=9\";t=4");
        assert_eq!(parsed.policy.as_deref(), Some("a;r=9"));
        assert_eq!(parsed.remaining, None);
        assert_eq!(parsed.reset_seconds, Some(4));
    }

    #[test]
    fn test_policy_name_escaped() {
        assert_eq!(build_usage_header("a\"b\\c", 1, 0), r#""a\"b\\c";r=1"#);
        assert_eq!(
            parse_usage_header(&build_usage_header("a\"b\\c", 1, 0)).policy.as_deref(),
            Some("a\"b\\c")
        );
    }

    #[rstest]
    #[case("bad\ngroup", "\"bad_group\";q=1")]
    #[case("tab\there", "\"tab_here\";q=1")]
    #[case("caf\u{e9}", "\"caf_\";q=1")]
    fn test_policy_name_sanitized(#[case] group: &str, #[case] expected: &str) {
        let value = build_policy_header(group, 1, None);
        assert_eq!(value, expected);
        assert!(http::HeaderValue::from_str(&value).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("garbage")]
    #[case(";;;")]
    #[case("r=abc;t=-1")]
    fn test_parse_invalid_usage_is_empty(#[case] value: &str) {
        assert!(parse_usage_header(value).is_empty());
    }

    #[rstest]
    #[case("\"p\";q=ten;w=60", None, Some(60.0))]
    #[case("\"p\";q=10;w=sixty", Some(10), None)]
    #[case("\"p\";q=99999999999999999999999", None, None)]
    #[case("q=7", Some(7), None)]
    fn test_parse_policy_partial(
        #[case] value: &str,
        #[case] limit: Option<u64>,
        #[case] window: Option<f64>,
    ) {
        let parsed = parse_policy_header(value);
        assert_eq!(parsed.limit, limit);
        assert_eq!(parsed.window_seconds, window);
    }

    #[rstest]
    #[case("global", 0, 1)]
    #[case("api.example.com", 42, 3600)]
    fn test_usage_round_trip(#[case] policy: &str, #[case] remaining: u64, #[case] reset: u64) {
        let parsed = parse_usage_header(&build_usage_header(policy, remaining, reset));
        assert_eq!(parsed.policy.as_deref(), Some(policy));
        assert_eq!(parsed.remaining, Some(remaining));
        assert_eq!(parsed.reset_seconds, Some(reset));
    }

    #[rstest]
    #[case("global", 1, 1.0)]
    #[case("api.example.com", 5000, 0.25)]
    fn test_policy_round_trip(#[case] policy: &str, #[case] limit: u64, #[case] window: f64) {
        let parsed = parse_policy_header(&build_policy_header(policy, limit, Some(window)));
        assert_eq!(parsed.policy.as_deref(), Some(policy));
        assert_eq!(parsed.limit, Some(limit));
        assert_eq!(parsed.window_seconds, Some(window));
    }
}
