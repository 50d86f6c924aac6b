// Request handlers for API endpoints

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use tracing::{debug, info, warn};

use crate::api::middleware::request_id;
use crate::api::responses::{ApiError, HealthResponse, ServiceInfo};
use crate::api::AppState;
use crate::core::jsonrpc::PendingRequest;

/// JSON-RPC forwarding handler
///
/// POST / (any path)
///
/// Request flow:
/// 1. Extract request ID from headers or generate UUID
/// 2. Decode the envelope; a missing `method` is answered locally
/// 3. Hand the request to the forwarder (session acquisition, upstream call, renewal retry)
/// 4. Encode the outcome, echoing the caller's id on errors
///
/// If the client disconnects this future is dropped, which aborts the
/// in-flight upstream call. A handshake it started keeps running.
pub async fn forward_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id(&headers);

    let request = match PendingRequest::parse(body) {
        Ok(request) => request,
        Err(rejected) => {
            warn!(
                request_id = %request_id,
                error = %rejected.error,
                "Rejected malformed JSON-RPC request"
            );
            return ApiError::new(rejected.error, rejected.id).into_response();
        }
    };

    info!(
        method = %request.method,
        request_id = %request_id,
        "Received JSON-RPC request"
    );

    let id = request.id.clone();
    match app_state.forwarder.forward(request).await {
        Ok(outcome) => {
            debug!(request_id = %request_id, status = outcome.status, "Forwarded request completed");
            outcome.into_response()
        }
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Forwarding failed");
            ApiError::new(e, id).into_response()
        }
    }
}

/// Health check handler
///
/// GET /health
///
/// Probes the upstream without credentials; never creates, reads or
/// invalidates the session. 200 when the upstream answers below 500, 503 otherwise.
pub async fn health_handler(
    State(app_state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let probe = tokio::time::timeout(
        app_state.config.health_timeout(),
        app_state.upstream.ping(),
    )
    .await;

    let (status, upstream) = match probe {
        Ok(Ok(code)) if code < 500 => (StatusCode::OK, "reachable".to_string()),
        Ok(Ok(code)) => {
            warn!(status = code, "Upstream health probe returned server error");
            (StatusCode::SERVICE_UNAVAILABLE, format!("error: HTTP {}", code))
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Upstream health probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unreachable".to_string())
        }
        Err(_) => {
            warn!("Upstream health probe timed out");
            (StatusCode::SERVICE_UNAVAILABLE, "unreachable: timeout".to_string())
        }
    };

    let proxy = if status == StatusCode::OK { "healthy" } else { "degraded" };

    (
        status,
        Json(HealthResponse {
            proxy: proxy.to_string(),
            upstream,
            upstream_url: app_state.config.upstream_base_url.clone(),
        }),
    )
}

/// Service descriptor handler
///
/// GET /
pub async fn service_info_handler(State(app_state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
        upstream_url: app_state.config.upstream_base_url.clone(),
    })
}
