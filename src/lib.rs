//! Turnstile - Grouped Admission Control for Outbound Requests
//!
//! This crate implements a sliding-window rate limit gate that sits as one
//! stage of an outbound HTTP request pipeline. Requests are assigned to
//! groups, each group is held to its own policy, and denied requests either
//! fail with a typed error or receive a synthesized `429 Too Many Requests`
//! response. Policies can be tuned at runtime from the rate limit headers
//! upstream servers return.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod ratelimit;

pub use config::{GateConfig, GroupBy};
pub use error::{Result, TurnstileError};
pub use pipeline::{Middleware, Next, Pipeline, RateLimitGate, Request, Response, Transport};
pub use ratelimit::{Policy, PolicyPatch, RateLimitDecision};
