use thiserror::Error;

use crate::route::RouteCollision;

/// Closed error taxonomy for the gateway.
///
/// Handlers map these onto wire responses; nothing outside this set should
/// cross a crate boundary as a domain error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("service not found")]
    ServiceNotFound,

    #[error("instance not found")]
    InstanceNotFound,

    #[error("route not found")]
    RouteNotFound,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("token has expired")]
    TokenExpired,

    #[error("token is not yet valid")]
    TokenNotYetValid,

    #[error("token has invalid subject")]
    TokenInvalidSubject,

    #[error("token has invalid issuer")]
    TokenInvalidIssuer,

    #[error("token has invalid audience")]
    TokenInvalidAudience,

    #[error("token audience mismatch: expected {expected}, got {actual}")]
    TokenAudienceMismatch { expected: String, actual: String },

    #[error("token issuer not allowed: {0}")]
    TokenIssuerNotAllowed(String),

    #[error("token has invalid signature")]
    TokenInvalidSignature,

    #[error("token is malformed: {0}")]
    TokenMalformed(String),

    /// The broker was asked to mint a token without a private key configured.
    #[error("signing key not configured")]
    SigningKeyMissing,

    /// The broker was asked to verify a token without a public key configured.
    #[error("verification key not configured")]
    VerificationKeyMissing,

    #[error(transparent)]
    Collision(#[from] CollisionError),
}

/// Rejection produced when a registration would overlap routes already
/// installed by a different service. Carries every offending route so the
/// registering service can fix them all in one pass.
#[derive(Debug, Clone, Error)]
#[error("route collisions detected: {}", render_collisions(.collisions))]
pub struct CollisionError {
    pub collisions: Vec<RouteCollision>,
}

fn render_collisions(collisions: &[RouteCollision]) -> String {
    collisions
        .iter()
        .map(|c| {
            format!(
                "{} {} conflicts with {} ({})",
                c.method, c.path, c.registered_by, c.kind
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}
