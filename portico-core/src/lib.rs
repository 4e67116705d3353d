//! Core domain types for the Portico API gateway.
//!
//! This crate holds the vocabulary shared by every other Portico crate:
//! service instances and their lifecycle status, declared routes and the
//! installed routing table entries, route collision records, token claims,
//! and the closed [`GatewayError`] taxonomy.
//!
//! Nothing in here performs I/O; the types are plain data with validation
//! helpers so they can be exercised without a running gateway.

mod claims;
mod error;
mod instance;
mod registration;
mod route;

pub use claims::{ExternalClaims, InternalClaims};
pub use error::{CollisionError, GatewayError};
pub use instance::{ServiceInstance, ServiceStatus};
pub use registration::{
    DeregisterRequest, HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse,
};
pub use route::{CollisionKind, Route, RouteCollision, RouteEntry};

/// Audience claim required on service tokens presented to registry endpoints.
pub const GATEWAY_AUDIENCE: &str = "api-gateway";
