use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a registered instance.
///
/// Transitions are driven by the registry cleanup loop, never by heartbeats
/// directly: a heartbeat only refreshes `last_heartbeat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// A single running copy of a service, addressed by `host:port`.
///
/// Instances handed out by the registry are snapshots; mutations go through
/// registry entry points only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub service_name: String,
    pub host: String,
    pub port: u16,
    pub health_url: String,
    pub version: String,
    pub status: ServiceStatus,
    pub weight: u32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl ServiceInstance {
    /// The `host:port` address used to build upstream URLs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> ServiceInstance {
        ServiceInstance {
            id: "abc".into(),
            service_name: "user-service".into(),
            host: "127.0.0.1".into(),
            port: 9001,
            health_url: "/health".into(),
            version: "1.0.0".into(),
            status: ServiceStatus::Healthy,
            weight: 1,
            metadata: HashMap::new(),
            registered_at: Utc::now(),
            last_heartbeat: Utc::now(),
        }
    }

    #[test]
    fn address_joins_host_and_port() {
        assert_eq!(instance().address(), "127.0.0.1:9001");
    }

    #[test]
    fn only_healthy_status_counts_as_healthy() {
        let mut inst = instance();
        assert!(inst.is_healthy());

        inst.status = ServiceStatus::Unhealthy;
        assert!(!inst.is_healthy());

        inst.status = ServiceStatus::Unknown;
        assert!(!inst.is_healthy());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ServiceStatus::Healthy).unwrap();
        assert_eq!(json, "\"healthy\"");
    }
}
