// Response types for API endpoints

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::core::errors::ProxyError;
use crate::core::jsonrpc::{JsonRpcErrorResponse, RequestId, UpstreamBody};
use crate::proxy::ForwardOutcome;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub proxy: String,
    pub upstream: String,
    pub upstream_url: String,
}

/// Service descriptor served on `GET /`
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub status: String,
    pub upstream_url: String,
}

/// Proxy failure bound to the caller's JSON-RPC id
#[derive(Debug)]
pub struct ApiError {
    pub error: ProxyError,
    pub id: RequestId,
}

impl ApiError {
    pub fn new(error: ProxyError, id: RequestId) -> Self {
        Self { error, id }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(JsonRpcErrorResponse::from_proxy_error(&self.error, self.id));
        (status, body).into_response()
    }
}

/// Upstream status is mirrored. JSON documents are written out as the bytes
/// the upstream sent (id aside); raw bodies keep the upstream content type.
impl IntoResponse for ForwardOutcome {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);

        match self.body {
            UpstreamBody::Json(document) => (
                status,
                [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                document,
            )
                .into_response(),
            UpstreamBody::Empty => status.into_response(),
            UpstreamBody::Raw(bytes) => {
                let mut response = (status, bytes).into_response();
                if let Some(value) = self
                    .content_type
                    .as_deref()
                    .and_then(|ct| HeaderValue::from_str(ct).ok())
                {
                    response.headers_mut().insert(header::CONTENT_TYPE, value);
                }
                response
            }
        }
    }
}
