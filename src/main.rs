// Main entry point for the session-bridging proxy

use session_bridge::api::{create_router, AppState, UpstreamClient};
use session_bridge::config::Config;
use session_bridge::proxy::{HttpUpstreamClient, RequestForwarder};
use session_bridge::state::SessionManager;

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load and validate configuration first (before any logging)
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // 2. Initialize tracing subscriber with config values
    init_tracing(&config);

    info!(
        upstream = %config.upstream_base_url,
        bind_address = %config.bind_address(),
        session_max_age_secs = config.session_max_age_secs,
        request_timeout_secs = config.request_timeout_secs,
        "Configuration loaded"
    );

    // 3. Upstream transport
    let upstream: Arc<dyn UpstreamClient> = Arc::new(HttpUpstreamClient::new(&config).map_err(|e| {
        error!(error = %e, "Failed to create upstream client");
        e
    })?);

    // 4. Session manager and forwarder
    let sessions = Arc::new(SessionManager::new(upstream.clone(), config.session_max_age()));
    let forwarder = Arc::new(RequestForwarder::new(
        sessions.clone(),
        upstream.clone(),
        config.invalid_session_signature(),
    ));

    // 5. Best-effort session before the first caller shows up
    if config.eager_session {
        match sessions.acquire().await {
            Ok(session) => info!(session = %session.short_id(), "Initial session established"),
            Err(e) => warn!(error = %e, "Initial session not established, will retry on first request"),
        }
    }

    // 6. Router
    let app_state = AppState {
        forwarder,
        upstream,
        config: Arc::new(config.clone()),
    };
    let router = create_router(&app_state).with_state(app_state);

    // 7. Start HTTP server
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind to address");
        e
    })?;

    info!(addr = %addr, "Proxy listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            e
        })?;

    info!("Proxy shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber based on configuration
///
/// RUST_LOG takes precedence over LOG_LEVEL.
fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            info!("SIGTERM received, starting graceful shutdown");
        },
    }
}
