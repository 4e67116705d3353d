use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use portico_auth::TokenBroker;
use portico_proxy::ProxyEngine;
use portico_registry::Registry;

use crate::config::Config;
use crate::handlers::{health, registry};
use crate::middleware::{RequestIdLayer, TraceContextLayer};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    /// Optional token broker (None when JWT keys are not configured).
    pub broker: Option<Arc<TokenBroker>>,
    pub engine: Arc<ProxyEngine>,
    pub start_time: Instant,
    pub version: String,
}

/// Build the Axum router: health probes, registry endpoints, and the
/// catch-all proxy fallback, wrapped in the ambient middleware stack.
pub fn router(state: AppState, config: &Config) -> Router {
    let registry_api = Router::new()
        .route("/register", post(registry::register))
        .route("/heartbeat", post(registry::heartbeat))
        .route("/deregister", post(registry::deregister))
        .route("/services", get(registry::services));

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .nest("/internal/registry", registry_api)
        .fallback(proxy)
        .with_state(state)
        .layer(cors_layer(config))
        .layer(TraceContextLayer::new())
        .layer(RequestIdLayer::new())
        .layer(CatchPanicLayer::custom(recover))
        .layer(TraceLayer::new_for_http())
}

/// Catch-all handler: everything that is not a gateway endpoint goes
/// through the proxy pipeline.
async fn proxy(State(state): State<AppState>, req: Request) -> Response {
    state.engine.handle(req).await
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: AllowOrigin = if config.cors_allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        config
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>()
            .into()
    };

    let methods: AllowMethods = config
        .cors_allowed_methods
        .iter()
        .filter_map(|method| method.parse::<Method>().ok())
        .collect::<Vec<_>>()
        .into();

    let headers: AllowHeaders = config
        .cors_allowed_headers
        .iter()
        .filter_map(|header| header.parse::<HeaderName>().ok())
        .collect::<Vec<_>>()
        .into();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
}

/// Recovery interceptor: a panicking handler becomes a 500 instead of a
/// closed connection.
fn recover(err: Box<dyn std::any::Any + Send + 'static>) -> axum::http::Response<axum::body::Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_owned()
    } else {
        "unknown panic".to_owned()
    };
    error!(panic = %detail, "request handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(json!({
            "error": "internal_error",
            "message": "internal server error",
        })),
    )
        .into_response()
}
