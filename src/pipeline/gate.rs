//! The rate limit gate pipeline stage.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, StatusCode};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::chain::{Middleware, Next, Request, Response};
use super::problem::{ProblemDetails, PROBLEM_JSON};
use crate::config::{GateConfig, GroupBy};
use crate::error::{Result, TurnstileError};
use crate::ratelimit::headers::{
    build_policy_header, build_usage_header, RATELIMIT, RATELIMIT_LIMIT, RATELIMIT_POLICY,
    RATELIMIT_REMAINING, RATELIMIT_RESET,
};
use crate::ratelimit::{
    negotiate, Clock, DenyObserver, GlobalGroup, GroupResolver, GroupStrategy, HostGroup, Policy,
    PolicyPatch, RateLimitDecision, RateLimitStore, SystemClock,
};

const TOO_MANY_REQUESTS: &str = "Too Many Requests";

/// Admission control for outbound requests.
///
/// Every request passing through the gate is assigned a group, charged
/// against that group's sliding window, and either delegated downstream or
/// denied. Denials fail with [`TurnstileError::RateLimitExceeded`] or, when
/// `throw_on_deny` is off, short-circuit with a synthesized 429 response.
pub struct RateLimitGate {
    /// Sliding-window state
    store: RateLimitStore,
    /// Grouping and per-group policies
    resolver: GroupResolver,
    /// Gate-wide deny observer
    on_denied: Option<Arc<dyn DenyObserver>>,
    /// Fail denials with an error rather than a 429 response
    throw_on_deny: bool,
    /// Detail text for synthesized 429 responses
    custom_deny_message: Option<String>,
    /// Learn policies from upstream headers
    auto_negotiate: bool,
}

impl RateLimitGate {
    /// Create a gate from configuration, driven by the system clock.
    pub fn new(config: &GateConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a gate from configuration, driven by the given clock.
    pub fn with_clock(config: &GateConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let strategy: Arc<dyn GroupStrategy> = match config.group_by {
            GroupBy::Global => Arc::new(GlobalGroup),
            GroupBy::Host => Arc::new(HostGroup),
        };
        let resolver = GroupResolver::new(config.policy()?).with_strategy(strategy);
        for (group, patch) in &config.per_group {
            resolver.upsert_override(group, patch)?;
        }

        info!(
            max_requests = config.max_requests,
            window_seconds = config.window_seconds,
            group_by = ?config.group_by,
            overrides = config.per_group.len(),
            throw_on_deny = config.throw_on_deny,
            auto_negotiate = config.auto_negotiate,
            "Rate limit gate configured"
        );

        Ok(Self {
            store: RateLimitStore::with_clock(clock),
            resolver,
            on_denied: None,
            throw_on_deny: config.throw_on_deny,
            custom_deny_message: config.custom_deny_message.clone(),
            auto_negotiate: config.auto_negotiate,
        })
    }

    /// Replace the grouping strategy.
    pub fn with_group_strategy(mut self, strategy: Arc<dyn GroupStrategy>) -> Self {
        self.resolver = self.resolver.with_strategy(strategy);
        self
    }

    /// Install the gate-wide deny observer.
    pub fn with_deny_observer(mut self, observer: Arc<dyn DenyObserver>) -> Self {
        self.on_denied = Some(observer);
        self
    }

    /// Run the admission check for `url`, consuming a slot if allowed.
    ///
    /// A denial notifies the group's deny observer, or the gate-wide one.
    pub fn check(&self, url: &Url) -> RateLimitDecision {
        let group = self.resolver.resolve_group(url);
        let policy = self.resolver.resolve_effective_policy(&group);
        let decision = self.store.try_consume(&group, &policy);

        if !decision.allowed {
            let observer = self
                .resolver
                .deny_observer(&decision.group)
                .or_else(|| self.on_denied.clone());
            if let Some(observer) = observer {
                observer.on_denied(&decision.group, decision.reset_time_millis);
            }
        }
        decision
    }

    /// Whether a request to `url` may proceed. Consumes a slot if so.
    pub fn is_allowed(&self, url: &Url) -> bool {
        self.check(url).allowed
    }

    /// Remaining capacity for the group of `url`.
    pub fn remaining(&self, url: &Url) -> u32 {
        let group = self.resolver.resolve_group(url);
        let policy = self.resolver.resolve_effective_policy(&group);
        self.store.peek_remaining(&group, &policy)
    }

    /// Reset time, in epoch milliseconds, for the group of `url`.
    pub fn reset_time(&self, url: &Url) -> i64 {
        let group = self.resolver.resolve_group(url);
        let policy = self.resolver.resolve_effective_policy(&group);
        self.store.peek_reset_time(&group, &policy)
    }

    /// The group `url` belongs to.
    pub fn group(&self, url: &Url) -> String {
        self.resolver.resolve_group(url)
    }

    /// The policy in effect for `group`.
    pub fn get_policy(&self, group: &str) -> Policy {
        self.resolver.resolve_effective_policy(group)
    }

    /// Override fields of a group's policy.
    pub fn set_policy(&self, group: &str, patch: &PolicyPatch) -> Result<()> {
        self.resolver.upsert_override(group, patch)
    }

    /// Install a deny observer for a single group.
    pub fn set_group_deny_observer(&self, group: &str, observer: Arc<dyn DenyObserver>) {
        self.resolver.set_deny_observer(group, observer);
    }

    /// Forget a group's request history.
    pub fn clear(&self, group: &str) -> bool {
        self.store.clear(group)
    }

    /// Forget every group's request history.
    pub fn clear_all(&self) {
        self.store.clear_all();
    }

    /// Groups with request history, sorted.
    pub fn active_groups(&self) -> Vec<String> {
        self.store.groups()
    }

    /// Apply whatever policy `headers` advertise to `group`.
    ///
    /// Returns the applied patch, or `None` when nothing usable was found.
    pub fn negotiate(&self, group: &str, headers: &HeaderMap) -> Option<PolicyPatch> {
        let patch = negotiate(headers, self.store.clock().now_millis());
        if patch.is_empty() {
            return None;
        }

        match self.resolver.upsert_override(group, &patch) {
            Ok(()) => {
                debug!(
                    group = group,
                    max_requests = ?patch.max_requests,
                    window_seconds = ?patch.window_seconds,
                    "Negotiated policy from upstream headers"
                );
                Some(patch)
            }
            Err(e) => {
                debug!(group = group, error = %e, "Ignoring unusable upstream policy");
                None
            }
        }
    }

    fn deny(&self, decision: &RateLimitDecision) -> Result<Response> {
        if self.throw_on_deny {
            warn!(
                group = %decision.group,
                reset_time_millis = decision.reset_time_millis,
                "Request denied by rate limit"
            );
            return Err(TurnstileError::RateLimitExceeded {
                group: decision.group.clone(),
                reset_time_millis: decision.reset_time_millis,
                remaining_requests: decision.remaining,
            });
        }

        warn!(
            group = %decision.group,
            reset_time_millis = decision.reset_time_millis,
            "Request denied by rate limit, responding with 429"
        );
        self.too_many_requests(decision)
    }

    /// Build the 429 response for a denied decision.
    fn too_many_requests(&self, decision: &RateLimitDecision) -> Result<Response> {
        let policy = self.resolver.resolve_effective_policy(&decision.group);
        let now = self.store.clock().now_millis();
        let retry_after = ceil_seconds((decision.reset_time_millis - now).max(0));

        let detail = self.custom_deny_message.clone().unwrap_or_else(|| {
            format!("Rate limit exceeded. Try again in {retry_after} seconds.")
        });
        let body = serde_json::to_vec(&ProblemDetails::new(
            StatusCode::TOO_MANY_REQUESTS.as_u16(),
            TOO_MANY_REQUESTS,
            detail,
        ))?;

        let response = http::Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header(CONTENT_TYPE, PROBLEM_JSON)
            .header(
                RATELIMIT,
                build_usage_header(&decision.group, 0, retry_after as u64),
            )
            .header(
                RATELIMIT_POLICY,
                build_policy_header(
                    &decision.group,
                    u64::from(policy.max_requests),
                    Some(policy.window_seconds),
                ),
            )
            .header(RATELIMIT_LIMIT, policy.max_requests.to_string())
            .header(RATELIMIT_REMAINING, "0")
            .header(
                RATELIMIT_RESET,
                ceil_seconds(decision.reset_time_millis).to_string(),
            )
            .header(RETRY_AFTER, retry_after.to_string())
            .body(Bytes::from(body))?;
        Ok(response)
    }
}

/// Milliseconds to whole seconds, rounding up.
fn ceil_seconds(millis: i64) -> i64 {
    (millis + 999).div_euclid(1000)
}

#[async_trait]
impl Middleware for RateLimitGate {
    #[instrument(skip(self, request, next), fields(method = %request.method, url = %request.url))]
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response> {
        let decision = self.check(&request.url);
        if !decision.allowed {
            return self.deny(&decision);
        }

        debug!(
            group = %decision.group,
            remaining = decision.remaining,
            "Request admitted"
        );

        let response = next.run(request).await?;

        if self.auto_negotiate {
            self.negotiate(&decision.group, response.headers());
        }
        Ok(response)
    }
}

impl fmt::Debug for RateLimitGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitGate")
            .field("store", &self.store)
            .field("resolver", &self.resolver)
            .field("on_denied", &self.on_denied.is_some())
            .field("throw_on_deny", &self.throw_on_deny)
            .field("custom_deny_message", &self.custom_deny_message)
            .field("auto_negotiate", &self.auto_negotiate)
            .finish()
    }
}
