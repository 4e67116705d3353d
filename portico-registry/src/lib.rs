//! In-memory service registry for the Portico gateway.
//!
//! The registry is the authority on which services exist, which instances
//! back them, and which routes resolve to them. All state lives in three
//! maps behind a single reader-writer lock; a background cleanup loop ages
//! instances from healthy to unhealthy to evicted based on heartbeat
//! recency.

mod balancer;
mod collision;
mod registry;

pub use balancer::RoundRobinBalancer;
pub use registry::{Registry, RegistryConfig};
