//! Rate limit policies and partial overrides.
//!
//! A [`Policy`] is the complete `(max_requests, window_seconds)` pair that
//! governs a group. A [`PolicyPatch`] carries any subset of those fields and is
//! used both for static per-group configuration and for header negotiation.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnstileError};

/// Longest accepted window: 365 days.
pub const MAX_WINDOW_SECONDS: f64 = 31_536_000.0;

/// Capacity and window length for one group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Requests allowed inside one window
    pub max_requests: u32,
    /// Window length in seconds
    pub window_seconds: f64,
}

impl Policy {
    /// Create a validated policy.
    pub fn new(max_requests: u32, window_seconds: f64) -> Result<Self> {
        let policy = Self {
            max_requests,
            window_seconds,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Reject non-positive or non-finite windows.
    pub fn validate(&self) -> Result<()> {
        validate_window(self.window_seconds)
    }

    /// The window length in whole milliseconds.
    pub fn window_millis(&self) -> i64 {
        (self.window_seconds * 1000.0).round() as i64
    }
}

/// A partial policy. Absent fields fall back to whatever they are layered on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyPatch {
    /// Overridden capacity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u32>,
    /// Overridden window length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_seconds: Option<f64>,
}

impl PolicyPatch {
    /// A patch that only sets the capacity.
    pub fn max_requests(max_requests: u32) -> Self {
        Self {
            max_requests: Some(max_requests),
            window_seconds: None,
        }
    }

    /// A patch that only sets the window.
    pub fn window_seconds(window_seconds: f64) -> Self {
        Self {
            max_requests: None,
            window_seconds: Some(window_seconds),
        }
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.max_requests.is_none() && self.window_seconds.is_none()
    }

    /// Validate the fields that are present.
    pub fn validate(&self) -> Result<()> {
        match self.window_seconds {
            Some(window) => validate_window(window),
            None => Ok(()),
        }
    }

    /// Copy every present field of `other` into `self`, leaving the rest alone.
    pub fn merge(&mut self, other: &PolicyPatch) {
        if let Some(max_requests) = other.max_requests {
            self.max_requests = Some(max_requests);
        }
        if let Some(window_seconds) = other.window_seconds {
            self.window_seconds = Some(window_seconds);
        }
    }

    /// Overlay this patch on a base policy.
    pub fn apply_to(&self, base: &Policy) -> Policy {
        Policy {
            max_requests: self.max_requests.unwrap_or(base.max_requests),
            window_seconds: self.window_seconds.unwrap_or(base.window_seconds),
        }
    }
}

/// True for finite windows in `(0, MAX_WINDOW_SECONDS]`.
pub(crate) fn is_valid_window(window_seconds: f64) -> bool {
    window_seconds.is_finite() && window_seconds > 0.0 && window_seconds <= MAX_WINDOW_SECONDS
}

fn validate_window(window_seconds: f64) -> Result<()> {
    if is_valid_window(window_seconds) {
        Ok(())
    } else {
        Err(TurnstileError::Config(format!(
            "window_seconds must be a positive number of at most {MAX_WINDOW_SECONDS}, got {window_seconds}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_policy_window_millis() {
        let policy = Policy::new(10, 1.5).unwrap();
        assert_eq!(policy.window_millis(), 1500);
    }

    #[test]
    fn test_longest_window_accepted() {
        let policy = Policy::new(1, MAX_WINDOW_SECONDS).unwrap();
        assert_eq!(policy.window_millis(), 31_536_000_000);
    }

    #[test]
    fn test_zero_capacity_is_valid() {
        assert!(Policy::new(0, 1.0).is_ok());
    }

    #[rstest]
    #[case(0.0)]
    #[case(-1.0)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    #[case(MAX_WINDOW_SECONDS + 1.0)]
    #[case(1e20)]
    #[case(1e300)]
    fn test_invalid_window_rejected(#[case] window: f64) {
        let err = Policy::new(5, window).unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));
        assert!(PolicyPatch::window_seconds(window).validate().is_err());
    }

    #[test]
    fn test_patch_merge_keeps_existing_fields() {
        let mut patch = PolicyPatch::max_requests(10);
        patch.merge(&PolicyPatch::window_seconds(30.0));

        assert_eq!(patch.max_requests, Some(10));
        assert_eq!(patch.window_seconds, Some(30.0));

        patch.merge(&PolicyPatch::default());
        assert_eq!(patch.max_requests, Some(10));
        assert_eq!(patch.window_seconds, Some(30.0));
    }

    #[test]
    fn test_patch_apply_is_field_level() {
        let base = Policy::new(100, 60.0).unwrap();

        let policy = PolicyPatch::max_requests(5).apply_to(&base);
        assert_eq!(policy, Policy::new(5, 60.0).unwrap());

        let policy = PolicyPatch::default().apply_to(&base);
        assert_eq!(policy, base);
    }

    #[test]
    fn test_patch_deserialize_partial() {
        let patch: PolicyPatch = serde_yaml::from_str("window_seconds: 2.5").unwrap();
        assert_eq!(patch, PolicyPatch::window_seconds(2.5));
        assert!(serde_yaml::from_str::<PolicyPatch>("burst: 3").is_err());
    }
}
