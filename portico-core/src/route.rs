use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An endpoint declared by a service at registration time.
///
/// `path` is relative to the service's base path and may contain `:name` or
/// `{name}` parameter segments and a trailing `*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub public: bool,
    /// Requests per minute allowed on this route; 0 defers to the global
    /// policy.
    #[serde(default)]
    pub rate_limit: u32,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Route {
    /// The pattern as installed in the routing table: base path plus route
    /// path, either of which may be empty.
    pub fn full_path(&self, base_path: &str) -> String {
        if base_path.is_empty() {
            return self.path.clone();
        }
        if self.path.is_empty() {
            return base_path.to_owned();
        }
        format!("{}{}", base_path, self.path)
    }

    /// Routing-table key: `METHOD:/full/path`.
    pub fn key(&self, base_path: &str) -> String {
        format!("{}:{}", self.method, self.full_path(base_path))
    }
}

/// A route installed in the gateway's routing table, keyed by
/// `(method, base_path + path)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub service_name: String,
    pub base_path: String,
    pub route: Route,
    pub registered_at: DateTime<Utc>,
}

/// How two route patterns clashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionKind {
    /// Identical `(method, path)` keys.
    Exact,
    /// Distinct strings that overlap after `:name`/`{name}` -> `*`
    /// normalisation.
    Pattern,
}

impl fmt::Display for CollisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollisionKind::Exact => f.write_str("exact"),
            CollisionKind::Pattern => f.write_str("pattern"),
        }
    }
}

/// One rejected route from a registration attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteCollision {
    pub method: String,
    pub path: String,
    #[serde(rename = "collision_type")]
    pub kind: CollisionKind,
    pub registered_by: String,
    pub registered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_path_combines_base_and_path() {
        let cases = [
            ("/api/v1", "/users", "/api/v1/users"),
            ("", "/users", "/users"),
            ("/api/v1", "", "/api/v1"),
            ("", "", ""),
            ("/api/v1/auth", "/login", "/api/v1/auth/login"),
        ];

        for (base, path, expected) in cases {
            let route = Route {
                method: "GET".into(),
                path: path.into(),
                public: false,
                rate_limit: 0,
                scopes: vec![],
            };
            assert_eq!(route.full_path(base), expected, "base={base} path={path}");
        }
    }

    #[test]
    fn key_prefixes_method() {
        let cases = [
            ("GET", "/api/v1", "/users", "GET:/api/v1/users"),
            ("POST", "/api/v1/auth", "/login", "POST:/api/v1/auth/login"),
            ("DELETE", "/api", "/items/:id", "DELETE:/api/items/:id"),
        ];

        for (method, base, path, expected) in cases {
            let route = Route {
                method: method.into(),
                path: path.into(),
                public: false,
                rate_limit: 0,
                scopes: vec![],
            };
            assert_eq!(route.key(base), expected);
        }
    }

    #[test]
    fn collision_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CollisionKind::Exact).unwrap(),
            "\"exact\""
        );
        assert_eq!(
            serde_json::to_string(&CollisionKind::Pattern).unwrap(),
            "\"pattern\""
        );
    }
}
