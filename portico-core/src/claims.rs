use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Claims the gateway accepts from external clients.
///
/// Field names match the JWT registered claim names so the struct can be
/// decoded straight from a token payload. Missing optional claims default to
/// empty rather than failing the parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

impl ExternalClaims {
    /// Re-check temporal bounds and the subject after parsing. The JWT layer
    /// already enforces `exp`/`nbf` during signature verification; this keeps
    /// the domain rules independent of the parsing library.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let now = Utc::now().timestamp();

        // A token without an `exp` claim deserializes to 0 and is rejected
        // as already expired; nothing the gateway accepts lives forever.
        if now > self.exp {
            return Err(GatewayError::TokenExpired);
        }
        if let Some(nbf) = self.nbf
            && now < nbf
        {
            return Err(GatewayError::TokenNotYetValid);
        }
        if self.sub.is_empty() {
            return Err(GatewayError::TokenInvalidSubject);
        }
        Ok(())
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn has_all_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|s| self.has_scope(s))
    }
}

/// Claims the gateway mints toward downstream services.
///
/// `aud` is bound to exactly one target service and `trace` records every
/// service the token has transited, growing by one per hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub iss: String,
    #[serde(default)]
    pub aud: String,
    #[serde(default)]
    pub trace: Vec<String>,
    #[serde(default)]
    pub original_iss: String,
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub exp: i64,
}

impl InternalClaims {
    pub fn validate(&self) -> Result<(), GatewayError> {
        let now = Utc::now().timestamp();

        if now > self.exp {
            return Err(GatewayError::TokenExpired);
        }
        if self.sub.is_empty() {
            return Err(GatewayError::TokenInvalidSubject);
        }
        if self.iss.is_empty() {
            return Err(GatewayError::TokenInvalidIssuer);
        }
        if self.aud.is_empty() {
            return Err(GatewayError::TokenInvalidAudience);
        }
        Ok(())
    }

    pub fn validate_audience(&self, expected: &str) -> Result<(), GatewayError> {
        if self.aud != expected {
            return Err(GatewayError::TokenAudienceMismatch {
                expected: expected.to_owned(),
                actual: self.aud.clone(),
            });
        }
        Ok(())
    }

    pub fn validate_issuer(&self, allowed: &[String]) -> Result<(), GatewayError> {
        if allowed.iter().any(|a| a == &self.iss) {
            return Ok(());
        }
        Err(GatewayError::TokenIssuerNotAllowed(self.iss.clone()))
    }

    pub fn add_to_trace(&mut self, service: &str) {
        self.trace.push(service.to_owned());
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn has_all_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|s| self.has_scope(s))
    }
}
