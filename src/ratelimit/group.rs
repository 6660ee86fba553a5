//! Request grouping and per-group policy resolution.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use url::Url;

use super::policy::{Policy, PolicyPatch};
use crate::error::Result;

/// Group key used when no finer grouping applies.
pub const DEFAULT_GROUP: &str = "global";

/// Maps a request URL to the group whose bucket it draws from.
///
/// Implementations must be deterministic: the same URL always yields the same
/// group for the lifetime of the resolver. Plain closures
/// `Fn(&Url) -> String` implement this trait too.
pub trait GroupStrategy: Send + Sync {
    /// The group key for `url`.
    fn group(&self, url: &Url) -> String;
}

impl<F> GroupStrategy for F
where
    F: Fn(&Url) -> String + Send + Sync,
{
    fn group(&self, url: &Url) -> String {
        self(url)
    }
}

/// Every request shares the single [`DEFAULT_GROUP`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalGroup;

impl GroupStrategy for GlobalGroup {
    fn group(&self, _url: &Url) -> String {
        DEFAULT_GROUP.to_string()
    }
}

/// One group per hostname, regardless of scheme or port.
///
/// Hostnames are lowercased. URLs without a host fall back to
/// [`DEFAULT_GROUP`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HostGroup;

impl GroupStrategy for HostGroup {
    fn group(&self, url: &Url) -> String {
        url.host_str()
            .map(str::to_lowercase)
            .unwrap_or_else(|| DEFAULT_GROUP.to_string())
    }
}

/// Notified whenever a request is denied.
///
/// Closures `Fn(i64)` receiving the reset time in epoch milliseconds
/// implement this trait too.
pub trait DenyObserver: Send + Sync {
    /// Called with the denied group and its reset time.
    fn on_denied(&self, group: &str, reset_time_millis: i64);
}

impl<F> DenyObserver for F
where
    F: Fn(i64) + Send + Sync,
{
    fn on_denied(&self, _group: &str, reset_time_millis: i64) {
        self(reset_time_millis)
    }
}

/// Per-group override: a partial policy plus an optional deny observer.
#[derive(Clone, Default)]
pub struct GroupOverride {
    /// Fields that replace the global default for this group
    pub patch: PolicyPatch,
    /// Observer used instead of the gate-wide one for this group
    pub on_denied: Option<Arc<dyn DenyObserver>>,
}

impl fmt::Debug for GroupOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupOverride")
            .field("patch", &self.patch)
            .field("on_denied", &self.on_denied.is_some())
            .finish()
    }
}

/// Resolves groups and the policy in effect for each of them.
pub struct GroupResolver {
    /// Policy used for any field a group does not override
    default_policy: Policy,
    /// Grouping strategy
    strategy: Arc<dyn GroupStrategy>,
    /// Overrides indexed by group key
    overrides: RwLock<HashMap<String, GroupOverride>>,
}

impl GroupResolver {
    /// Create a resolver that puts every request in [`DEFAULT_GROUP`].
    pub fn new(default_policy: Policy) -> Self {
        Self {
            default_policy,
            strategy: Arc::new(GlobalGroup),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the grouping strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn GroupStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// The global default policy.
    pub fn default_policy(&self) -> Policy {
        self.default_policy
    }

    /// The group `url` belongs to.
    pub fn resolve_group(&self, url: &Url) -> String {
        self.strategy.group(url)
    }

    /// The global default overlaid with the group's override, field by field.
    pub fn resolve_effective_policy(&self, group: &str) -> Policy {
        match self.overrides.read().get(group) {
            Some(entry) => entry.patch.apply_to(&self.default_policy),
            None => self.default_policy,
        }
    }

    /// Merge the present fields of `patch` into the group's override.
    ///
    /// Absent fields never clear existing ones. Invalid values are rejected
    /// before anything is written.
    pub fn upsert_override(&self, group: &str, patch: &PolicyPatch) -> Result<()> {
        patch.validate()?;

        let mut overrides = self.overrides.write();
        let entry = overrides.entry(group.to_string()).or_default();
        entry.patch.merge(patch);

        debug!(
            group = group,
            max_requests = ?entry.patch.max_requests,
            window_seconds = ?entry.patch.window_seconds,
            "Updated group policy override"
        );
        Ok(())
    }

    /// Install a deny observer for one group.
    pub fn set_deny_observer(&self, group: &str, observer: Arc<dyn DenyObserver>) {
        self.overrides
            .write()
            .entry(group.to_string())
            .or_default()
            .on_denied = Some(observer);
    }

    /// The group's own deny observer, if any.
    pub fn deny_observer(&self, group: &str) -> Option<Arc<dyn DenyObserver>> {
        self.overrides
            .read()
            .get(group)
            .and_then(|entry| entry.on_denied.clone())
    }

    /// Snapshot of the group's override fields.
    pub fn override_for(&self, group: &str) -> Option<PolicyPatch> {
        self.overrides.read().get(group).map(|entry| entry.patch)
    }

    /// Groups that carry an override, sorted.
    pub fn overridden_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.overrides.read().keys().cloned().collect();
        groups.sort();
        groups
    }
}

impl fmt::Debug for GroupResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupResolver")
            .field("default_policy", &self.default_policy)
            .field("overrides", &*self.overrides.read())
            .finish_non_exhaustive()
    }
}
