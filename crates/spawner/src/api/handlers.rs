//! Request handlers.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::identity::{extract_session_id, path_of};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Header Traefik's forward-auth uses to pass the original request URI.
pub const FORWARDED_URI_HEADER: &str = "x-forwarded-uri";

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Fallback for `/u/<id>...` requests that no session route matched yet.
///
/// Provisions the session, then redirects to the same URL so the retry hits
/// the freshly registered route. Only `GET` and `HEAD` provision.
#[instrument(skip(state), fields(method = %method, path = %uri.path()))]
pub async fn spawn_session(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
) -> ApiResult<Response> {
    let session =
        extract_session_id(uri.path()).ok_or_else(|| ApiError::bad_request("use /u/<id>"))?;
    if method != Method::GET && method != Method::HEAD {
        return Err(ApiError::method_not_allowed("method not allowed"));
    }

    let readiness = state
        .sessions
        .ensure_ready(&session)
        .await
        .map_err(|e| {
            error!("Provisioning session {} failed: {}", session, e);
            ApiError::service_unavailable("session unavailable")
        })?;
    debug!(%session, ?readiness, "session provisioned");

    let location = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
        .to_string();

    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// Forward-auth callback: allow requests under `/u/<id>` and record activity.
pub async fn forward_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> ApiResult<&'static str> {
    let forwarded = headers
        .get(FORWARDED_URI_HEADER)
        .and_then(|value| value.to_str().ok());
    let path = match forwarded {
        Some(original) => path_of(original),
        None => uri.path(),
    };

    let session = extract_session_id(path).ok_or_else(|| ApiError::forbidden("forbidden"))?;
    let name = state.sessions.container_name(&session);
    state.activity.touch(&name).await;

    Ok("ok")
}
