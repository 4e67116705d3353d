use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur when starting or running the Portico server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("token broker error: {0}")]
    Broker(String),

    #[error("redis error: {0}")]
    Redis(String),
}
