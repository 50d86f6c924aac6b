// Middleware stack for observability and protection

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    BoxError, Json,
};
use tower_http::{
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::core::errors::ProxyError;
use crate::core::jsonrpc::{JsonRpcErrorResponse, RequestId};

/// Tracing middleware
///
/// Logs method, path, status and latency for every inbound request.
pub fn tracing_layer() -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
}

/// Body size limit middleware
///
/// Returns 413 Payload Too Large if exceeded; see [`payload_too_large_as_jsonrpc`]
pub fn body_size_limit_layer(limit: usize) -> RequestBodyLimitLayer {
    RequestBodyLimitLayer::new(limit)
}

/// Rewrite the plain-text 413 produced by the body limit into a JSON-RPC
/// -32600 error.
///
/// The oversized body is never read, so the id is reported as `null`, as
/// JSON-RPC prescribes when the request id cannot be determined.
pub async fn payload_too_large_as_jsonrpc(response: Response) -> Response {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if response.status() != StatusCode::PAYLOAD_TOO_LARGE || is_json {
        return response;
    }

    let error = ProxyError::InvalidRequest("request body too large".to_string());
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(JsonRpcErrorResponse::from_proxy_error(&error, RequestId::null())),
    )
        .into_response()
}

/// Convert errors raised by the outer tower stack into JSON-RPC error bodies.
///
/// The body has not been parsed when the gateway timeout fires, so the id is
/// reported as `null`.
pub async fn handle_gateway_error(err: BoxError) -> (StatusCode, Json<JsonRpcErrorResponse>) {
    let (status, error) = if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::GATEWAY_TIMEOUT, ProxyError::Timeout(0))
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::UpstreamUnreachable(err.to_string()),
        )
    };

    (status, Json(JsonRpcErrorResponse::from_proxy_error(&error, RequestId::null())))
}

/// Extract the caller's `x-request-id` or generate one
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
