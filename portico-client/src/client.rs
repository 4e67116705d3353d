use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

use portico_core::{GATEWAY_AUDIENCE, RegisterRequest, RegisterResponse, ServiceInstance};

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifetime of the self-signed service tokens attached to registry calls.
const SERVICE_TOKEN_TTL: Duration = Duration::from_secs(60);

/// Default registration retry budget.
const DEFAULT_RETRIES: u32 = 5;

/// First retry delay; doubles per attempt up to [`MAX_BACKOFF`].
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token signing error: {0}")]
    Token(String),

    /// The gateway no longer knows this instance; re-register.
    #[error("instance not found")]
    InstanceNotFound,

    #[error("gateway returned {status}: {message}")]
    Api { status: StatusCode, message: String },
}

/// HTTP client for the gateway's registry endpoints.
///
/// Every call is authenticated with a freshly signed service token; tokens
/// are short-lived, so there is nothing to refresh or cache.
pub struct RegistryClient {
    http: reqwest::Client,
    gateway_url: String,
    service_name: String,
    encoding_key: EncodingKey,
    retries: u32,
    backoff: Duration,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("http", &self.http)
            .field("gateway_url", &self.gateway_url)
            .field("service_name", &self.service_name)
            .field("encoding_key", &"<redacted>")
            .field("retries", &self.retries)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Builder for configuring a [`RegistryClient`].
pub struct RegistryClientBuilder {
    gateway_url: String,
    service_name: String,
    private_key_pem: Option<String>,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
    http: Option<reqwest::Client>,
}

impl RegistryClientBuilder {
    pub fn new(gateway_url: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into().trim_end_matches('/').to_owned(),
            service_name: service_name.into(),
            private_key_pem: None,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            backoff: DEFAULT_BACKOFF,
            http: None,
        }
    }

    /// PEM-encoded RSA private key the service signs its tokens with.
    #[must_use]
    pub fn private_key_pem(mut self, pem: impl Into<String>) -> Self {
        self.private_key_pem = Some(pem.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How many times `register` retries transient failures.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Initial retry delay (doubles per attempt, capped at 30s).
    #[must_use]
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Use a custom reqwest client, e.g. with proxy or TLS settings.
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn build(self) -> Result<RegistryClient, Error> {
        let pem = self
            .private_key_pem
            .ok_or_else(|| Error::Configuration("private key is required".into()))?;
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| Error::Configuration(format!("failed to parse private key: {e}")))?;

        let http = match self.http {
            Some(client) => client,
            None => reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| Error::Configuration(e.to_string()))?,
        };

        Ok(RegistryClient {
            http,
            gateway_url: self.gateway_url,
            service_name: self.service_name,
            encoding_key,
            retries: self.retries,
            backoff: self.backoff,
        })
    }
}

#[derive(Serialize)]
struct ServiceTokenClaims<'a> {
    sub: &'a str,
    iss: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl RegistryClient {
    pub fn builder(
        gateway_url: impl Into<String>,
        service_name: impl Into<String>,
    ) -> RegistryClientBuilder {
        RegistryClientBuilder::new(gateway_url, service_name)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Register this service's instance and routes with the gateway.
    ///
    /// Transient failures (transport errors, 5xx) are retried with
    /// exponential backoff; permanent rejections such as route collisions
    /// surface immediately.
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, Error> {
        let mut backoff = self.backoff;
        let mut attempt = 0;

        loop {
            match self.try_register(request).await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < self.retries && is_transient(&err) => {
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries = self.retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "registration failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_register(&self, request: &RegisterRequest) -> Result<RegisterResponse, Error> {
        let response = self.post("/internal/registry/register", request).await?;

        match response.status() {
            StatusCode::CREATED => Ok(response.json().await?),
            status => Err(api_error(status, response).await),
        }
    }

    /// Refresh the gateway's liveness stamp for an instance.
    pub async fn heartbeat(&self, instance_id: &str) -> Result<(), Error> {
        let body = serde_json::json!({"instance_id": instance_id});
        let response = self.post("/internal/registry/heartbeat", &body).await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::InstanceNotFound),
            status => Err(api_error(status, response).await),
        }
    }

    /// Remove an instance from the gateway.
    pub async fn deregister(&self, instance_id: &str) -> Result<(), Error> {
        let body = serde_json::json!({"instance_id": instance_id});
        let response = self.post("/internal/registry/deregister", &body).await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::InstanceNotFound),
            status => Err(api_error(status, response).await),
        }
    }

    /// Snapshot of every service the gateway knows about.
    pub async fn services(&self) -> Result<HashMap<String, Vec<ServiceInstance>>, Error> {
        let token = self.service_token()?;
        let response = self
            .http
            .get(format!("{}/internal/registry/services", self.gateway_url))
            .header("X-Service-Token", token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                #[derive(serde::Deserialize)]
                struct ServicesResponse {
                    services: HashMap<String, Vec<ServiceInstance>>,
                }
                let body: ServicesResponse = response.json().await?;
                Ok(body.services)
            }
            status => Err(api_error(status, response).await),
        }
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, Error> {
        let token = self.service_token()?;
        Ok(self
            .http
            .post(format!("{}{}", self.gateway_url, path))
            .header("X-Service-Token", token)
            .json(body)
            .send()
            .await?)
    }

    /// Mint a short-lived RS256 service token for one registry call.
    fn service_token(&self) -> Result<String, Error> {
        let now = Utc::now().timestamp();
        let claims = ServiceTokenClaims {
            sub: &self.service_name,
            iss: &self.service_name,
            aud: GATEWAY_AUDIENCE,
            iat: now,
            exp: now + SERVICE_TOKEN_TTL.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| Error::Token(e.to_string()))
    }
}

async fn api_error(status: StatusCode, response: reqwest::Response) -> Error {
    let message = response.text().await.unwrap_or_default();
    Error::Api { status, message }
}

/// Whether an error is worth retrying: network trouble or a gateway-side
/// 5xx. Collisions and other 4xx rejections will not get better on their
/// own.
fn is_transient(err: &Error) -> bool {
    match err {
        Error::Http(_) => true,
        Error::Api { status, .. } => status.is_server_error(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIVATE_PEM: &str = include_str!("../testdata/rsa_private.pem");

    #[test]
    fn builder_requires_a_private_key() {
        let err = RegistryClient::builder("http://localhost:8080", "user-service")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn builder_rejects_a_bad_key() {
        let err = RegistryClient::builder("http://localhost:8080", "user-service")
            .private_key_pem("not a pem")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn builder_trims_trailing_slash() {
        let client = RegistryClient::builder("http://localhost:8080/", "user-service")
            .private_key_pem(PRIVATE_PEM)
            .build()
            .unwrap();
        assert_eq!(client.gateway_url, "http://localhost:8080");
    }

    #[test]
    fn service_tokens_carry_the_gateway_audience() {
        let client = RegistryClient::builder("http://localhost:8080", "user-service")
            .private_key_pem(PRIVATE_PEM)
            .build()
            .unwrap();

        let token = client.service_token().unwrap();
        // Decode the payload segment without verifying; the gateway side
        // covers verification.
        use base64::Engine;
        let payload = token.split('.').nth(1).unwrap();
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .unwrap();
        let claims: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(claims["sub"], "user-service");
        assert_eq!(claims["aud"], GATEWAY_AUDIENCE);
        assert!(claims["exp"].as_i64().unwrap() > claims["iat"].as_i64().unwrap());
    }

    mod retry {
        use std::net::SocketAddr;
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        use axum::http::StatusCode;
        use axum::routing::post;
        use axum::{Json, Router};

        use super::*;
        use portico_core::Route;

        /// Stub gateway that fails registration `failures` times before
        /// accepting it.
        async fn flaky_gateway(failures: usize, calls: Arc<AtomicUsize>) -> SocketAddr {
            let app = Router::new().route(
                "/internal/registry/register",
                post(move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        let attempt = calls.fetch_add(1, Ordering::SeqCst);
                        if attempt < failures {
                            return (
                                StatusCode::SERVICE_UNAVAILABLE,
                                Json(serde_json::json!({"error": "not ready"})),
                            );
                        }
                        (
                            StatusCode::CREATED,
                            Json(serde_json::json!({
                                "instance_id": "inst-1",
                                "heartbeat_interval": 30,
                                "heartbeat_url": "/internal/registry/heartbeat",
                                "registered_routes": ["GET:/api/v1/users"],
                            })),
                        )
                    }
                }),
            );

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            addr
        }

        fn request() -> RegisterRequest {
            RegisterRequest {
                service_name: "user-service".into(),
                host: "127.0.0.1".into(),
                port: 9001,
                health_url: "/health".into(),
                version: String::new(),
                base_path: "/api/v1".into(),
                routes: vec![Route {
                    method: "GET".into(),
                    path: "/users".into(),
                    public: true,
                    rate_limit: 0,
                    scopes: vec![],
                }],
                metadata: HashMap::new(),
            }
        }

        #[tokio::test]
        async fn register_retries_transient_failures() {
            let calls = Arc::new(AtomicUsize::new(0));
            let addr = flaky_gateway(2, Arc::clone(&calls)).await;

            let client = RegistryClient::builder(format!("http://{addr}"), "user-service")
                .private_key_pem(PRIVATE_PEM)
                .backoff(Duration::from_millis(10))
                .build()
                .unwrap();

            let response = client.register(&request()).await.unwrap();
            assert_eq!(response.instance_id, "inst-1");
            assert_eq!(calls.load(Ordering::SeqCst), 3);
        }

        #[tokio::test]
        async fn register_gives_up_after_retry_budget() {
            let calls = Arc::new(AtomicUsize::new(0));
            let addr = flaky_gateway(usize::MAX, Arc::clone(&calls)).await;

            let client = RegistryClient::builder(format!("http://{addr}"), "user-service")
                .private_key_pem(PRIVATE_PEM)
                .retries(2)
                .backoff(Duration::from_millis(5))
                .build()
                .unwrap();

            let err = client.register(&request()).await.unwrap_err();
            assert!(matches!(err, Error::Api { status, .. } if status.is_server_error()));
            assert_eq!(calls.load(Ordering::SeqCst), 3);
        }
    }
}
