//! Rate limiting logic and state management.

mod bucket;
mod clock;
mod group;
pub mod headers;
mod negotiate;
mod policy;
mod store;

pub use bucket::Bucket;
pub use clock::{Clock, MockClock, SystemClock};
pub use group::{
    DenyObserver, GlobalGroup, GroupOverride, GroupResolver, GroupStrategy, HostGroup,
    DEFAULT_GROUP,
};
pub use negotiate::negotiate;
pub use policy::{Policy, PolicyPatch, MAX_WINDOW_SECONDS};
pub use store::{RateLimitDecision, RateLimitStore};
