//! Pipeline stages and the rate limit gate.

mod chain;
mod gate;
mod problem;

pub use chain::{Middleware, Next, Pipeline, Request, Response, Transport};
pub use gate::RateLimitGate;
pub use problem::{ProblemDetails, PROBLEM_JSON};
