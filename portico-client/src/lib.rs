//! Service-side SDK for the Portico gateway.
//!
//! Downstream services use this crate to register themselves, keep their
//! registration alive with heartbeats, and deregister on shutdown. Registry
//! calls are authenticated with a service token the client signs using the
//! service's own RSA key (`aud = "api-gateway"`, `sub = <service_name>`).
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//! use portico_client::{HeartbeatRunner, RegistryClient};
//! use portico_core::{RegisterRequest, Route};
//!
//! # async fn run(private_key_pem: String) -> Result<(), portico_client::Error> {
//! let client = RegistryClient::builder("http://localhost:8080", "user-service")
//!     .private_key_pem(private_key_pem)
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let request = RegisterRequest {
//!     service_name: "user-service".into(),
//!     host: "10.0.0.5".into(),
//!     port: 9001,
//!     health_url: String::new(),
//!     version: "1.2.0".into(),
//!     base_path: "/api/v1".into(),
//!     routes: vec![Route {
//!         method: "GET".into(),
//!         path: "/users".into(),
//!         public: true,
//!         rate_limit: 0,
//!         scopes: vec![],
//!     }],
//!     metadata: Default::default(),
//! };
//!
//! let response = client.register(&request).await?;
//! let runner = HeartbeatRunner::spawn(client, request, response);
//!
//! // ... serve traffic ...
//!
//! runner.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod heartbeat;

pub use client::{Error, RegistryClient, RegistryClientBuilder};
pub use heartbeat::HeartbeatRunner;
