//! Request routing and reverse proxying for the Portico gateway.
//!
//! A proxied request flows through a fixed sequence of gates, each able to
//! end the request with an early decision: rate limiting, route matching,
//! authentication, instance selection, and finally the upstream dispatch.
//! The gates are plain functions over domain types so the pipeline can be
//! exercised without an HTTP server around it.

mod engine;
mod gate;
mod headers;
mod matcher;

pub use engine::{ProxyEngine, ProxyEngineBuilder, RateLimitPolicy};
pub use gate::{AuthDenial, AuthOutcome, authorize};
pub use matcher::{RouteMatch, match_route};
