use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::route::Route;

/// Body of `POST /internal/registry/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub service_name: String,
    pub host: String,
    /// Declared as a wide integer so out-of-range values reach validation
    /// instead of failing deserialization.
    pub port: i64,
    #[serde(default)]
    pub health_url: String,
    #[serde(default)]
    pub version: String,
    pub base_path: String,
    pub routes: Vec<Route>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RegisterRequest {
    /// Check required fields and apply defaults (`health_url` falls back to
    /// `/health`).
    pub fn validate(&mut self) -> Result<(), GatewayError> {
        if self.service_name.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "service_name is required".into(),
            ));
        }
        if self.host.is_empty() {
            return Err(GatewayError::InvalidRequest("host is required".into()));
        }
        if self.port <= 0 || self.port > 65535 {
            return Err(GatewayError::InvalidRequest(
                "port must be between 1 and 65535".into(),
            ));
        }
        if self.base_path.is_empty() {
            return Err(GatewayError::InvalidRequest("base_path is required".into()));
        }
        if self.routes.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "at least one route is required".into(),
            ));
        }
        if self.health_url.is_empty() {
            self.health_url = "/health".into();
        }
        Ok(())
    }
}

/// Body returned by a successful registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub instance_id: String,
    /// Seconds between heartbeats the service is expected to send.
    pub heartbeat_interval: u64,
    pub heartbeat_url: String,
    pub registered_routes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeregisterRequest {
    pub instance_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> RegisterRequest {
        RegisterRequest {
            service_name: "test-service".into(),
            host: "localhost".into(),
            port: 8080,
            health_url: String::new(),
            version: String::new(),
            base_path: "/api/v1".into(),
            routes: vec![Route {
                method: "GET".into(),
                path: "/users".into(),
                public: false,
                rate_limit: 0,
                scopes: vec![],
            }],
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn valid_request_passes_and_defaults_health_url() {
        let mut req = valid_request();
        req.validate().unwrap();
        assert_eq!(req.health_url, "/health");
    }

    #[test]
    fn custom_health_url_is_preserved() {
        let mut req = valid_request();
        req.health_url = "/custom-health".into();
        req.validate().unwrap();
        assert_eq!(req.health_url, "/custom-health");
    }

    #[test]
    fn missing_service_name_is_rejected() {
        let mut req = valid_request();
        req.service_name.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn missing_host_is_rejected() {
        let mut req = valid_request();
        req.host.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn out_of_range_ports_are_rejected() {
        for port in [0, -1, 65536] {
            let mut req = valid_request();
            req.port = port;
            assert!(req.validate().is_err(), "port {port} should be rejected");
        }
    }

    #[test]
    fn boundary_ports_are_accepted() {
        for port in [1, 65535] {
            let mut req = valid_request();
            req.port = port;
            assert!(req.validate().is_ok(), "port {port} should be accepted");
        }
    }

    #[test]
    fn missing_base_path_is_rejected() {
        let mut req = valid_request();
        req.base_path.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn empty_routes_are_rejected() {
        let mut req = valid_request();
        req.routes.clear();
        assert!(req.validate().is_err());
    }
}
