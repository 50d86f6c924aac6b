// HTTP client for the stateful upstream

use crate::api::{UpstreamClient, UpstreamReply};
use crate::config::Config;
use crate::core::errors::ProxyError;
use crate::core::session::{short_id, Session, SessionGrant};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderName, ACCEPT, CONTENT_TYPE, COOKIE};
use reqwest::{Client, Method, Response};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info};
use url::Url;

const ACCEPT_JSON_OR_SSE: &str = "application/json, text/event-stream";

/// HTTP transport to the stateful upstream
///
/// Carries the session explicitly on every call; the underlying client has
/// no cookie store, so nothing leaks between sessions.
pub struct HttpUpstreamClient {
    http_client: Client,
    endpoint: Url,
    handshake_method: Method,
    handshake_url: Url,
    handshake_body: Bytes,
    health_url: Url,
    session_header: HeaderName,
    session_cookie: String,
    default_timeout: Duration,
    health_timeout: Duration,
}

impl HttpUpstreamClient {
    /// Create a client with connection pooling
    ///
    /// # Returns
    /// * `Result<Self, ProxyError>` - client instance or configuration error
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        let timeout = config.request_timeout();
        let connect_timeout = timeout.min(Duration::from_secs(2)); // Fail fast on connection

        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .tcp_nodelay(true)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ProxyError::ConfigurationError(format!(
                "Failed to create HTTP client: {}", e
            )))?;

        let handshake_method = Method::from_bytes(config.handshake_method.as_bytes())
            .map_err(|e| ProxyError::ConfigurationError(format!(
                "Invalid HANDSHAKE_METHOD '{}': {}", config.handshake_method, e
            )))?;

        let session_header = HeaderName::from_bytes(config.session_header.as_bytes())
            .map_err(|e| ProxyError::ConfigurationError(format!(
                "Invalid SESSION_HEADER '{}': {}", config.session_header, e
            )))?;

        Ok(Self {
            http_client,
            endpoint: config.upstream_url()?,
            handshake_method,
            handshake_url: config.handshake_url()?,
            handshake_body: Bytes::from(config.handshake_body.clone()),
            health_url: config.health_url()?,
            session_header,
            session_cookie: config.session_cookie.clone(),
            default_timeout: timeout,
            health_timeout: config.health_timeout(),
        })
    }

    /// Map a transport error for a forwarded call
    fn classify_call_error(&self, e: reqwest::Error) -> ProxyError {
        if e.is_timeout() {
            ProxyError::Timeout(self.default_timeout.as_secs())
        } else if e.is_connect() {
            ProxyError::UpstreamUnreachable(format!("Connection failed: {}", e))
        } else {
            ProxyError::UpstreamUnreachable(format!("HTTP request failed: {}", e))
        }
    }

    /// Session id announced in the configured response header
    fn header_session(&self, response: &Response) -> Option<String> {
        response
            .headers()
            .get(&self.session_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Session credential from the handshake response: header first, then cookie.
    ///
    /// The cookie's `Max-Age`/`Expires` is reported as the grant TTL either way.
    pub(crate) fn extract_grant(&self, response: &Response) -> Option<SessionGrant> {
        let cookie = response
            .cookies()
            .find(|c| c.name() == self.session_cookie)
            .map(|c| (c.value().to_string(), cookie_ttl(c.max_age(), c.expires())));

        let (cookie_token, ttl) = match cookie {
            Some((value, ttl)) => (Some(value).filter(|v| !v.is_empty()), ttl),
            None => (None, None),
        };

        let token = self.header_session(response).or(cookie_token)?;
        let grant = SessionGrant::new(token);
        Some(match ttl {
            Some(ttl) => grant.with_ttl(ttl),
            None => grant,
        })
    }
}

/// Remaining lifetime declared by a cookie; `Max-Age` wins over `Expires`
pub(crate) fn cookie_ttl(max_age: Option<Duration>, expires: Option<SystemTime>) -> Option<Duration> {
    max_age.or_else(|| {
        expires.map(|at| at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
    })
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn establish_session(&self) -> Result<SessionGrant, ProxyError> {
        debug!(url = %self.handshake_url, method = %self.handshake_method, "Sending session handshake");

        let response = self
            .http_client
            .request(self.handshake_method.clone(), self.handshake_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_JSON_OR_SSE)
            .body(self.handshake_body.clone())
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, url = %self.handshake_url, "Session handshake request failed");
                ProxyError::UpstreamUnreachable(format!("Handshake failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(status = %status, url = %self.handshake_url, "Session handshake rejected");
            return Err(ProxyError::UpstreamUnreachable(format!(
                "Handshake returned HTTP {}", status
            )));
        }

        let grant = self.extract_grant(&response).ok_or_else(|| {
            error!(url = %self.handshake_url, "Handshake response carried no session id");
            ProxyError::UpstreamUnreachable("Handshake response carried no session id".to_string())
        })?;

        info!(
            session = %short_id(&grant.token),
            cookie_ttl_secs = ?grant.ttl.map(|t| t.as_secs()),
            "Upstream granted session"
        );
        Ok(grant)
    }

    async fn call(&self, session: &Session, envelope: &Bytes) -> Result<UpstreamReply, ProxyError> {
        let response = self
            .http_client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_JSON_OR_SSE)
            .header(self.session_header.clone(), session.id())
            .header(COOKIE, format!("{}={}", self.session_cookie, session.id()))
            .body(envelope.clone())
            .send()
            .await
            .map_err(|e| self.classify_call_error(e))?;

        let status = response.status().as_u16();
        let announced_session = self.header_session(&response);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| self.classify_call_error(e))?;

        debug!(
            status,
            session = %session.short_id(),
            bytes = body.len(),
            "Upstream replied"
        );

        Ok(UpstreamReply {
            status,
            body,
            content_type,
            announced_session,
        })
    }

    async fn ping(&self) -> Result<u16, ProxyError> {
        let response = self
            .http_client
            .get(self.health_url.clone())
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProxyError::Timeout(self.health_timeout.as_secs())
                } else {
                    ProxyError::UpstreamUnreachable(format!("Health probe failed: {}", e))
                }
            })?;

        Ok(response.status().as_u16())
    }
}
