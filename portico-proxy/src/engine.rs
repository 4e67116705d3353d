use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, HOST};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{debug, warn};

use portico_auth::TokenBroker;
use portico_core::ServiceInstance;
use portico_limiter::{RateLimitDecision, RateLimiter, ip_key, route_ip_key, route_user_key};
use portico_registry::{Registry, RoundRobinBalancer};

use crate::gate::{AuthDenial, AuthOutcome, authorize};
use crate::headers::{client_ip, forwarded_for_chain, peer_ip, strip_hop_by_hop};
use crate::matcher::match_route;

/// Global request-rate limits applied when a route carries no override.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub user_rpm: u32,
    pub ip_rpm: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            user_rpm: 100,
            ip_rpm: 60,
        }
    }
}

/// The proxy pipeline: rate-limit gate, route matcher, auth gate, instance
/// selection, upstream dispatch.
///
/// The engine owns no HTTP server; it consumes an incoming request and
/// produces a response, which keeps every gate reachable from tests.
pub struct ProxyEngine {
    registry: Arc<Registry>,
    balancer: RoundRobinBalancer,
    broker: Option<Arc<TokenBroker>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    policy: RateLimitPolicy,
    client: reqwest::Client,
}

/// Assembles a [`ProxyEngine`]; the broker and limiter are optional, the
/// registry is not.
pub struct ProxyEngineBuilder {
    registry: Arc<Registry>,
    broker: Option<Arc<TokenBroker>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    policy: RateLimitPolicy,
    client: Option<reqwest::Client>,
}

impl ProxyEngineBuilder {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            broker: None,
            limiter: None,
            policy: RateLimitPolicy::default(),
            client: None,
        }
    }

    #[must_use]
    pub fn broker(mut self, broker: Arc<TokenBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    #[must_use]
    pub fn limiter(mut self, limiter: Arc<dyn RateLimiter>, policy: RateLimitPolicy) -> Self {
        self.limiter = Some(limiter);
        self.policy = policy;
        self
    }

    /// Use a custom upstream client, e.g. with tuned timeouts.
    #[must_use]
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> ProxyEngine {
        ProxyEngine {
            registry: self.registry,
            balancer: RoundRobinBalancer::new(),
            broker: self.broker,
            limiter: self.limiter,
            policy: self.policy,
            client: self.client.unwrap_or_default(),
        }
    }
}

impl ProxyEngine {
    pub fn builder(registry: Arc<Registry>) -> ProxyEngineBuilder {
        ProxyEngineBuilder::new(registry)
    }

    /// Run one request through the full pipeline.
    pub async fn handle(&self, req: Request) -> Response {
        // Two distinct addresses: the rate-limit identity honors a prior
        // proxy's X-Forwarded-For, while the forwarding chain records the
        // peer that actually connected to this hop.
        let client_ip = client_ip(&req);
        let peer_ip = peer_ip(&req);

        // Gate: global rate limit. Backend failures fail open.
        let mut limit_decision = None;
        if let Some(limiter) = &self.limiter {
            match limiter.allow(&ip_key(&client_ip), self.policy.ip_rpm).await {
                Ok(decision) if !decision.allowed => {
                    return rate_limit_headers(rate_limited_response(), Some(&decision));
                }
                Ok(decision) => limit_decision = Some(decision),
                Err(e) => warn!(error = %e, "rate limiter unavailable, failing open"),
            }
        }

        // Gate: route matching.
        let method = req.method().as_str().to_owned();
        let path = req.uri().path().to_owned();
        let Some(matched) = match_route(&self.registry, &method, &path).await else {
            debug!(%method, %path, "no route matched");
            return rate_limit_headers(not_found_response(), limit_decision.as_ref());
        };
        let entry = matched.entry;

        // Gate: authentication and internal-token exchange.
        let mut auth = None;
        let mut user_id = None;
        if let Some(broker) = &self.broker {
            let authorization = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok());
            match authorize(broker, &entry, authorization) {
                Ok(AuthOutcome::Public) => {}
                Ok(AuthOutcome::Authorized {
                    internal_token,
                    original_issuer,
                    subject,
                }) => {
                    user_id = Some(subject);
                    auth = Some((internal_token, original_issuer));
                }
                Err(denial) => {
                    return rate_limit_headers(denial_response(denial), limit_decision.as_ref());
                }
            }
        }

        // Gate: per-route rate limit override, keyed by the authenticated
        // user when there is one.
        if entry.route.rate_limit > 0
            && let Some(limiter) = &self.limiter
        {
            let route_key = format!("{}:{}", entry.route.method, entry.route.full_path(&entry.base_path));
            let bucket = match &user_id {
                Some(id) => route_user_key(&route_key, id),
                None => route_ip_key(&route_key, &client_ip),
            };
            match limiter.allow(&bucket, entry.route.rate_limit).await {
                Ok(decision) if !decision.allowed => {
                    return rate_limit_headers(rate_limited_response(), Some(&decision));
                }
                Ok(decision) => limit_decision = Some(decision),
                Err(e) => warn!(error = %e, "rate limiter unavailable, failing open"),
            }
        }

        // Gate: healthy instance selection.
        let instances = self.registry.healthy_instances(&entry.service_name).await;
        if instances.is_empty() {
            return rate_limit_headers(
                unavailable_response(Some(&entry.service_name)),
                limit_decision.as_ref(),
            );
        }
        let Some(instance) = self.balancer.select(&instances) else {
            return rate_limit_headers(unavailable_response(None), limit_decision.as_ref());
        };

        let response = self
            .forward(req, instance, &entry.service_name, &peer_ip, auth)
            .await;
        rate_limit_headers(response, limit_decision.as_ref())
    }

    /// Dispatch the request to the chosen instance, rewriting headers per
    /// the forwarding policy and streaming the upstream response back.
    async fn forward(
        &self,
        req: Request,
        instance: &ServiceInstance,
        service_name: &str,
        peer_ip: &str,
        auth: Option<(String, String)>,
    ) -> Response {
        let (parts, body) = req.into_parts();

        let mut url = format!("http://{}{}", instance.address(), parts.uri.path());
        if let Some(query) = parts.uri.query() {
            url.push('?');
            url.push_str(query);
        }

        let incoming_host = parts.headers.get(HOST).cloned();
        let incoming_proto = parts.headers.get("x-forwarded-proto").cloned();
        let prior_forwarded_for = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        // The upstream client derives these from the target URL and body.
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);

        if let Some((internal_token, original_issuer)) = auth {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {internal_token}")) {
                headers.insert(AUTHORIZATION, value);
            }
            if let Ok(value) = HeaderValue::from_str(&original_issuer) {
                headers.insert("x-original-issuer", value);
            }
        }

        let chain = forwarded_for_chain(prior_forwarded_for.as_deref(), peer_ip);
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert("x-forwarded-for", value);
        }
        if let Some(host) = incoming_host {
            headers.insert("x-forwarded-host", host);
        }
        let proto = incoming_proto.unwrap_or_else(|| HeaderValue::from_static("http"));
        headers.insert("x-forwarded-proto", proto);
        if let Ok(value) = HeaderValue::from_str(service_name) {
            headers.insert("x-forwarded-service", value);
        }

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        let upstream = match upstream {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url = %url, error = %e, "upstream request failed");
                return json_response(
                    StatusCode::BAD_GATEWAY,
                    json!({
                        "error": "upstream_error",
                        "message": format!("failed to connect to upstream: {e}"),
                    }),
                );
            }
        };

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut builder = Response::builder().status(status);
        if let Some(headers) = builder.headers_mut() {
            *headers = response_headers;
        }
        match builder.body(Body::from_stream(upstream.bytes_stream())) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "failed to assemble upstream response");
                json_response(
                    StatusCode::BAD_GATEWAY,
                    json!({"error": "upstream_error", "message": e.to_string()}),
                )
            }
        }
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

fn not_found_response() -> Response {
    json_response(
        StatusCode::NOT_FOUND,
        json!({
            "error": "route_not_found",
            "message": "no service registered for this route",
        }),
    )
}

fn unavailable_response(service: Option<&str>) -> Response {
    let body = match service {
        Some(service) => json!({
            "error": "service_unavailable",
            "message": "no healthy instances available",
            "service": service,
        }),
        None => json!({
            "error": "service_unavailable",
            "message": "failed to select instance",
        }),
    };
    json_response(StatusCode::SERVICE_UNAVAILABLE, body)
}

fn rate_limited_response() -> Response {
    json_response(
        StatusCode::TOO_MANY_REQUESTS,
        json!({
            "error": "rate_limit_exceeded",
            "message": "too many requests, please try again later",
        }),
    )
}

fn denial_response(denial: AuthDenial) -> Response {
    match denial {
        AuthDenial::MissingToken => json_response(
            StatusCode::UNAUTHORIZED,
            json!({
                "error": "unauthorized",
                "message": "missing authorization token",
            }),
        ),
        AuthDenial::InvalidToken(err) => json_response(
            StatusCode::UNAUTHORIZED,
            json!({
                "error": "unauthorized",
                "message": "invalid token",
                "details": err.to_string(),
            }),
        ),
        AuthDenial::InsufficientScopes { required, provided } => json_response(
            StatusCode::FORBIDDEN,
            json!({
                "error": "forbidden",
                "message": "insufficient scopes",
                "required": required,
                "provided": provided,
            }),
        ),
        AuthDenial::MintFailed(err) => {
            warn!(error = %err, "failed to generate internal token");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "internal_error",
                    "message": "failed to generate internal token",
                }),
            )
        }
    }
}

/// Stamp the `X-RateLimit-*` contract headers onto any gated response.
fn rate_limit_headers(mut response: Response, decision: Option<&RateLimitDecision>) -> Response {
    if let Some(decision) = decision {
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-limit", decision.limit.into());
        headers.insert("x-ratelimit-remaining", decision.remaining.into());
        headers.insert("x-ratelimit-reset", decision.reset_at.timestamp().into());
    }
    response
}
