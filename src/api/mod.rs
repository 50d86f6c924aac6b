// Axum web server layer

use axum::{error_handling::HandleErrorLayer, routing::{get, post}, Router};
use bytes::Bytes;
use std::sync::Arc;
use tower::ServiceBuilder;

pub mod handlers;
pub mod middleware;
pub mod responses;

use crate::core::errors::ProxyError;
use crate::core::session::{Session, SessionGrant};
use crate::proxy::RequestForwarder;

/// Application state containing all shared dependencies
///
/// The gateway keeps no per-request state of its own; the session lives
/// inside the forwarder's session manager.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Arc<RequestForwarder>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub config: Arc<Config>,
}

/// Raw result of one upstream call
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: u16,
    pub body: Bytes,
    pub content_type: Option<String>,
    /// Session id the upstream put in the session header of its response
    pub announced_session: Option<String>,
}

/// Transport to the stateful upstream
///
/// Implementations hold no session state between calls.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Perform the session-establishment handshake
    async fn establish_session(&self) -> Result<SessionGrant, ProxyError>;

    /// Forward `envelope` verbatim with the session credential attached.
    ///
    /// Network failures map to `UpstreamUnreachable`, an elapsed request
    /// timeout to `Timeout`. Any HTTP status is a successful reply.
    async fn call(&self, session: &Session, envelope: &Bytes) -> Result<UpstreamReply, ProxyError>;

    /// Lightweight reachability probe without credentials; returns the HTTP status
    async fn ping(&self) -> Result<u16, ProxyError>;
}

/// Configuration struct
// Re-export Config from config module
pub use crate::config::Config;

/// Create the Axum router with all routes and middleware
///
/// Routes:
/// - `POST /` and `POST` on any other path - JSON-RPC forwarding (path is not inspected)
/// - `GET /health` - upstream reachability, never touches the session
/// - `GET /` - service descriptor
///
/// Middleware stack (outermost to innermost):
/// - Gateway timeout (tower::timeout) answered with a JSON-RPC error
/// - 413 rewrite into a JSON-RPC error
/// - Body size limit (tower-http::limit)
/// - Tracing (tower-http::trace)
pub fn create_router(app_state: &AppState) -> Router<AppState> {
    let router = Router::new()
        .route("/", get(handlers::service_info_handler).post(handlers::forward_handler))
        .route("/health", get(handlers::health_handler).post(handlers::forward_handler))
        .route("/*path", post(handlers::forward_handler))
        .layer(middleware::tracing_layer())
        .layer(middleware::body_size_limit_layer(app_state.config.body_size_limit_bytes))
        .layer(axum::middleware::map_response(middleware::payload_too_large_as_jsonrpc));

    // HandleErrorLayer must come BEFORE timeout to catch the timeout error
    let middleware_stack = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(middleware::handle_gateway_error))
        .timeout(app_state.config.gateway_timeout())
        .into_inner();

    router.layer(middleware_stack)
}
