use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{info, warn};

use portico_core::{
    DeregisterRequest, GatewayError, HeartbeatRequest, HeartbeatResponse, RegisterRequest,
};

use crate::router::AppState;

pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";

/// `POST /internal/registry/register`
///
/// Registers a service instance and its routes. The authenticated token
/// subject must match the body's `service_name` so one service cannot
/// install routes in another's name.
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let service = match authenticate_service(&state, &headers) {
        Ok(service) => service,
        Err(response) => return response,
    };

    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_body(&rejection),
    };

    if let Some(authenticated) = &service
        && authenticated != &req.service_name
    {
        warn!(
            token_subject = %authenticated,
            service_name = %req.service_name,
            "service token subject does not match registration body"
        );
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "forbidden",
                "message": "service token subject does not match service_name",
            })),
        )
            .into_response();
    }

    match state.registry.register(req).await {
        Ok(resp) => (StatusCode::CREATED, Json(resp)).into_response(),
        Err(GatewayError::Collision(collision)) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "route_collision",
                "message": "one or more routes are already registered",
                "collisions": collision.collisions,
            })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "registration_failed",
                "message": err.to_string(),
            })),
        )
            .into_response(),
    }
}

/// `POST /internal/registry/heartbeat`
pub async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Response {
    if let Err(response) = authenticate_service(&state, &headers) {
        return response;
    }
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_body(&rejection),
    };

    match state.registry.heartbeat(&req.instance_id).await {
        Ok(()) => Json(HeartbeatResponse {
            status: "ok".into(),
        })
        .into_response(),
        Err(GatewayError::InstanceNotFound) => instance_not_found(),
        Err(err) => internal_error("heartbeat_failed", &err),
    }
}

/// `POST /internal/registry/deregister`
pub async fn deregister(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<DeregisterRequest>, JsonRejection>,
) -> Response {
    if let Err(response) = authenticate_service(&state, &headers) {
        return response;
    }
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_body(&rejection),
    };

    match state.registry.deregister(&req.instance_id).await {
        Ok(()) => {
            info!(instance_id = %req.instance_id, "instance deregistered");
            Json(json!({"status": "deregistered"})).into_response()
        }
        Err(GatewayError::InstanceNotFound) => instance_not_found(),
        Err(err) => internal_error("deregister_failed", &err),
    }
}

/// `GET /internal/registry/services` -- snapshot of every service and its
/// instances.
pub async fn services(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authenticate_service(&state, &headers) {
        return response;
    }

    let services = state.registry.all_services().await;
    Json(json!({"services": services})).into_response()
}

/// Validate the `X-Service-Token` header and return the authenticated
/// service name. With no broker configured, registry endpoints are open and
/// the identity is unknown.
fn authenticate_service(state: &AppState, headers: &HeaderMap) -> Result<Option<String>, Response> {
    let Some(broker) = &state.broker else {
        return Ok(None);
    };

    let token = headers
        .get(SERVICE_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if token.is_empty() {
        return Err(invalid_token());
    }

    match broker.validate_service_token(token) {
        Ok(service) => Ok(Some(service)),
        Err(err) => {
            warn!(error = %err, "service token rejected");
            Err(invalid_token())
        }
    }
}

fn invalid_token() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "invalid_token"})),
    )
        .into_response()
}

fn invalid_body(rejection: &JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": "invalid_request",
            "message": rejection.body_text(),
        })),
    )
        .into_response()
}

fn instance_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "instance_not_found",
            "message": "the specified instance does not exist",
        })),
    )
        .into_response()
}

fn internal_error(tag: &str, err: &GatewayError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": tag, "message": err.to_string()})),
    )
        .into_response()
}
