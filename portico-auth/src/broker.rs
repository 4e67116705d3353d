use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::de::DeserializeOwned;

use portico_core::{ExternalClaims, GATEWAY_AUDIENCE, GatewayError, InternalClaims};

use crate::pem::normalize_pem;

/// Construction parameters for the [`TokenBroker`].
#[derive(Debug, Clone, Default)]
pub struct TokenBrokerConfig {
    /// PEM-encoded RSA public key used for verification. Accepts PKCS#1 and
    /// PKIX/PKCS#8 encodings, multi-line or flattened onto one line.
    pub public_key_pem: Option<String>,
    /// PEM-encoded RSA private key used for minting. Same tolerances.
    pub private_key_pem: Option<String>,
    /// Issuer written into every minted token.
    pub issuer: String,
    /// Lifetime of minted internal tokens.
    pub internal_ttl: Duration,
    /// Issuers accepted on internal tokens.
    pub allowed_issuers: Vec<String>,
}

/// Validates external and service tokens and mints audience-bound internal
/// tokens.
///
/// Only RS256 is accepted; any other algorithm in a token header is treated
/// as malformed before signature verification is attempted.
pub struct TokenBroker {
    decoding_key: Option<DecodingKey>,
    encoding_key: Option<EncodingKey>,
    issuer: String,
    internal_ttl: Duration,
    allowed_issuers: Vec<String>,
}

impl TokenBroker {
    pub fn new(config: TokenBrokerConfig) -> Result<Self, GatewayError> {
        let decoding_key = config
            .public_key_pem
            .as_deref()
            .map(|pem| {
                DecodingKey::from_rsa_pem(normalize_pem(pem).as_bytes()).map_err(|e| {
                    GatewayError::InvalidRequest(format!("failed to parse public key: {e}"))
                })
            })
            .transpose()?;

        let encoding_key = config
            .private_key_pem
            .as_deref()
            .map(|pem| {
                EncodingKey::from_rsa_pem(normalize_pem(pem).as_bytes()).map_err(|e| {
                    GatewayError::InvalidRequest(format!("failed to parse private key: {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            decoding_key,
            encoding_key,
            issuer: config.issuer,
            internal_ttl: config.internal_ttl,
            allowed_issuers: config.allowed_issuers,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Whether the broker holds a private key and can mint tokens.
    pub fn can_sign(&self) -> bool {
        self.encoding_key.is_some()
    }

    /// Verify an external client token and extract its claims.
    pub fn validate_external_token(&self, token: &str) -> Result<ExternalClaims, GatewayError> {
        let claims: ExternalClaims = self.decode_claims(token)?;
        claims.validate()?;
        Ok(claims)
    }

    /// Mint an internal token toward `audience` from verified external
    /// claims. The trace starts fresh with this gateway as its only hop.
    pub fn generate_internal_token(
        &self,
        ext: &ExternalClaims,
        audience: &str,
    ) -> Result<String, GatewayError> {
        let now = Utc::now().timestamp();
        let claims = InternalClaims {
            sub: ext.sub.clone(),
            email: ext.email.clone(),
            scopes: ext.scopes.clone(),
            iss: self.issuer.clone(),
            aud: audience.to_owned(),
            trace: vec![self.issuer.clone()],
            original_iss: ext.iss.clone(),
            iat: now,
            exp: now + self.internal_ttl.as_secs() as i64,
        };
        self.sign(&claims)
    }

    /// Mint a hop token from an already-internal token, growing the trace by
    /// exactly one element.
    pub fn generate_service_token(
        &self,
        int: &InternalClaims,
        audience: &str,
    ) -> Result<String, GatewayError> {
        let now = Utc::now().timestamp();
        let mut trace = int.trace.clone();
        trace.push(self.issuer.clone());

        let claims = InternalClaims {
            sub: int.sub.clone(),
            email: int.email.clone(),
            scopes: int.scopes.clone(),
            iss: self.issuer.clone(),
            aud: audience.to_owned(),
            trace,
            original_iss: int.original_iss.clone(),
            iat: now,
            exp: now + self.internal_ttl.as_secs() as i64,
        };
        self.sign(&claims)
    }

    /// Verify an internal token and enforce the audience binding and issuer
    /// allow-list.
    pub fn validate_internal_token(
        &self,
        token: &str,
        expected_audience: &str,
    ) -> Result<InternalClaims, GatewayError> {
        let claims: InternalClaims = self.decode_claims(token)?;
        claims.validate()?;
        claims.validate_audience(expected_audience)?;
        claims.validate_issuer(&self.allowed_issuers)?;
        Ok(claims)
    }

    /// Verify a self-signed service token presented on registry endpoints
    /// and return the authenticated service name.
    pub fn validate_service_token(&self, token: &str) -> Result<String, GatewayError> {
        let claims: InternalClaims = self.decode_claims(token)?;

        if claims.aud != GATEWAY_AUDIENCE {
            return Err(GatewayError::TokenAudienceMismatch {
                expected: GATEWAY_AUDIENCE.to_owned(),
                actual: claims.aud,
            });
        }
        if claims.sub.is_empty() {
            return Err(GatewayError::TokenInvalidSubject);
        }
        Ok(claims.sub)
    }

    fn sign(&self, claims: &InternalClaims) -> Result<String, GatewayError> {
        let key = self
            .encoding_key
            .as_ref()
            .ok_or(GatewayError::SigningKeyMissing)?;
        encode(&Header::new(Algorithm::RS256), claims, key)
            .map_err(|e| GatewayError::TokenMalformed(e.to_string()))
    }

    fn decode_claims<T: DeserializeOwned>(&self, token: &str) -> Result<T, GatewayError> {
        let key = self
            .decoding_key
            .as_ref()
            .ok_or(GatewayError::VerificationKeyMissing)?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| GatewayError::TokenMalformed(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(GatewayError::TokenMalformed(format!(
                "unexpected signing algorithm {:?}",
                header.alg
            )));
        }

        let mut validation = Validation::new(Algorithm::RS256);
        // Audience and issuer are checked against the domain rules after
        // decoding; temporal claims are validated strictly (no leeway) so
        // boundary behavior is deterministic.
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::new();

        let data = decode::<T>(token, key, &validation).map_err(map_jwt_error)?;
        Ok(data.claims)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> GatewayError {
    match err.kind() {
        ErrorKind::ExpiredSignature => GatewayError::TokenExpired,
        ErrorKind::ImmatureSignature => GatewayError::TokenNotYetValid,
        ErrorKind::InvalidSignature => GatewayError::TokenInvalidSignature,
        _ => GatewayError::TokenMalformed(err.to_string()),
    }
}
