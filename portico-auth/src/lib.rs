//! Token broker for the Portico gateway.
//!
//! The broker sits between two trust domains: it verifies RS256-signed
//! external tokens presented by clients, and mints short-lived internal
//! tokens whose audience is bound to exactly one downstream service. It
//! also validates the self-signed service tokens that authorize registry
//! mutations.

mod broker;
mod pem;

pub use broker::{TokenBroker, TokenBrokerConfig};
