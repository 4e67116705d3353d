use portico_auth::TokenBroker;
use portico_core::{GatewayError, RouteEntry};

const BEARER_PREFIX: &str = "Bearer ";

/// Successful outcome of the auth gate.
#[derive(Debug)]
pub enum AuthOutcome {
    /// The route is public; the request passes through untouched.
    Public,
    /// The caller was authenticated; the proxy must swap the Authorization
    /// header for the minted internal token.
    Authorized {
        internal_token: String,
        original_issuer: String,
        subject: String,
    },
}

/// Denial produced by the auth gate, mapped onto 401/403/500 by the proxy.
#[derive(Debug)]
pub enum AuthDenial {
    MissingToken,
    InvalidToken(GatewayError),
    InsufficientScopes {
        required: Vec<String>,
        provided: Vec<String>,
    },
    MintFailed(GatewayError),
}

/// Decide whether a matched request may proceed to the upstream service.
///
/// For non-public routes the external bearer token is verified, the route's
/// scope requirements are enforced, and a fresh internal token bound to the
/// target service is minted.
pub fn authorize(
    broker: &TokenBroker,
    entry: &RouteEntry,
    authorization: Option<&str>,
) -> Result<AuthOutcome, AuthDenial> {
    if entry.route.public {
        return Ok(AuthOutcome::Public);
    }

    let token = authorization
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .filter(|token| !token.is_empty())
        .ok_or(AuthDenial::MissingToken)?;

    let claims = broker
        .validate_external_token(token)
        .map_err(AuthDenial::InvalidToken)?;

    if !entry.route.scopes.is_empty() && !claims.has_all_scopes(&entry.route.scopes) {
        return Err(AuthDenial::InsufficientScopes {
            required: entry.route.scopes.clone(),
            provided: claims.scopes.clone(),
        });
    }

    let internal_token = broker
        .generate_internal_token(&claims, &entry.service_name)
        .map_err(AuthDenial::MintFailed)?;

    Ok(AuthOutcome::Authorized {
        internal_token,
        original_issuer: claims.iss.clone(),
        subject: claims.sub,
    })
}
