//! HTTP server for the Portico API gateway.
//!
//! Composes the registry, token broker, rate limiter, and proxy engine into
//! an Axum application: registry management endpoints under
//! `/internal/registry`, health probes, and a catch-all fallback that
//! proxies everything else to registered services.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
