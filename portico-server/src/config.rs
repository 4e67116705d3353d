use std::env;
use std::time::Duration;

use thiserror::Error;

/// Gateway configuration, loaded from environment variables.
///
/// Every variable has a default so a bare process starts in development
/// mode; production deployments set the JWT keys and rate limit knobs
/// explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub env: String,
    pub log_level: String,

    pub heartbeat_ttl: Duration,
    pub health_check_interval: Duration,
    pub strict_pattern_matching: bool,

    pub cors_allowed_origins: Vec<String>,
    pub cors_allowed_methods: Vec<String>,
    pub cors_allowed_headers: Vec<String>,

    pub jwt_public_key: Option<String>,
    pub jwt_private_key: Option<String>,
    pub jwt_issuer: String,
    pub jwt_internal_ttl: Duration,
    pub jwt_allowed_issuers: Vec<String>,

    pub rate_limit_enabled: bool,
    pub rate_limit_global_rpm: u32,
    pub rate_limit_user_rpm: u32,
    pub rate_limit_ip_rpm: u32,
    pub redis_url: Option<String>,

    pub version: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary variable source; the seam tests use to avoid
    /// mutating the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            port: parse(&lookup, "PORT", 8080)?,
            env: string(&lookup, "ENV", "development"),
            log_level: string(&lookup, "LOG_LEVEL", "debug"),

            heartbeat_ttl: duration(&lookup, "HEARTBEAT_TTL", Duration::from_secs(30))?,
            health_check_interval: duration(
                &lookup,
                "HEALTH_CHECK_INTERVAL",
                Duration::from_secs(10),
            )?,
            strict_pattern_matching: parse(&lookup, "STRICT_PATTERN_MATCHING", true)?,

            cors_allowed_origins: csv(&lookup, "CORS_ALLOWED_ORIGINS", "*"),
            cors_allowed_methods: csv(
                &lookup,
                "CORS_ALLOWED_METHODS",
                "GET,POST,PUT,DELETE,OPTIONS",
            ),
            cors_allowed_headers: csv(
                &lookup,
                "CORS_ALLOWED_HEADERS",
                "Origin,Content-Type,Accept,Authorization,X-Request-ID",
            ),

            jwt_public_key: optional(&lookup, "JWT_PUBLIC_KEY"),
            jwt_private_key: optional(&lookup, "JWT_PRIVATE_KEY"),
            jwt_issuer: string(&lookup, "JWT_ISSUER", "api-api"),
            jwt_internal_ttl: duration(&lookup, "JWT_INTERNAL_TTL", Duration::from_secs(300))?,
            jwt_allowed_issuers: csv(&lookup, "JWT_ALLOWED_ISSUERS", "auth-service"),

            rate_limit_enabled: parse(&lookup, "RATE_LIMIT_ENABLED", false)?,
            rate_limit_global_rpm: parse(&lookup, "RATE_LIMIT_GLOBAL_RPM", 10_000)?,
            rate_limit_user_rpm: parse(&lookup, "RATE_LIMIT_USER_RPM", 100)?,
            rate_limit_ip_rpm: parse(&lookup, "RATE_LIMIT_IP_RPM", 60)?,
            redis_url: optional(&lookup, "REDIS_URL"),

            version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    /// Whether JWT keys are configured and the auth layer should be active.
    pub fn jwt_enabled(&self) -> bool {
        self.jwt_public_key.is_some() || self.jwt_private_key.is_some()
    }
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var).filter(|value| !value.is_empty())
}

fn string(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: &str) -> String {
    optional(lookup, var).unwrap_or_else(|| default.to_owned())
}

fn csv(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: &str) -> Vec<String> {
    string(lookup, var, default)
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional(lookup, var) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: var.to_owned(),
            message: e.to_string(),
        }),
    }
}

fn duration(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match optional(lookup, var) {
        None => Ok(default),
        Some(raw) => parse_duration(&raw).ok_or_else(|| ConfigError::InvalidValue {
            var: var.to_owned(),
            message: format!("{raw:?} is not a duration (expected e.g. 500ms, 30s, 5m, 1h)"),
        }),
    }
}

/// Parse `500ms`, `30s`, `5m`, or `1h`. A bare number is taken as seconds.
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();

    let (value, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => raw.split_at(split),
        None => (raw, "s"),
    };
    let value: u64 = value.parse().ok()?;

    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}
