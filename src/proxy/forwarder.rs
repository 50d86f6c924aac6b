// Drives one inbound request through session acquisition, upstream call and renewal retry

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::api::{UpstreamClient, UpstreamReply};
use crate::core::errors::ProxyError;
use crate::core::jsonrpc::{decode_upstream_body, restore_id, PendingRequest, UpstreamBody};
use crate::core::session::Session;
use crate::proxy::signature::InvalidSessionSignature;
use crate::state::SessionManager;

/// Session renewals allowed per inbound request (`attempt` goes 0 -> 1, then terminal)
pub const MAX_SESSION_RENEWALS: u8 = 1;

/// What the gateway writes back for a forwarded request
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardOutcome {
    pub status: u16,
    pub body: UpstreamBody,
    pub content_type: Option<String>,
}

/// Where a single upstream attempt left the request
enum Attempt {
    Done(UpstreamReply),
    Renew,
}

/// Applies the single-retry-on-invalidation policy.
///
/// All failure classification lives here; the gateway only encodes what it
/// gets back. Timeouts and network failures are returned as-is and never
/// invalidate the session.
pub struct RequestForwarder {
    sessions: Arc<SessionManager>,
    upstream: Arc<dyn UpstreamClient>,
    signature: InvalidSessionSignature,
}

impl RequestForwarder {
    pub fn new(
        sessions: Arc<SessionManager>,
        upstream: Arc<dyn UpstreamClient>,
        signature: InvalidSessionSignature,
    ) -> Self {
        Self {
            sessions,
            upstream,
            signature,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Forward one request, renewing the session at most once.
    ///
    /// The returned outcome carries the caller's `id` whatever happened upstream.
    pub async fn forward(&self, mut request: PendingRequest) -> Result<ForwardOutcome, ProxyError> {
        loop {
            let session = self.sessions.acquire().await?;

            match self.attempt(&request, &session).await? {
                Attempt::Done(reply) => return self.finish(&request, reply),
                Attempt::Renew if request.attempt < MAX_SESSION_RENEWALS => {
                    warn!(
                        method = %request.method,
                        session = %session.short_id(),
                        attempt = request.attempt,
                        "Upstream rejected session, renewing and retrying"
                    );
                    self.sessions.invalidate(session.id());
                    request.attempt += 1;
                }
                Attempt::Renew => {
                    error!(
                        method = %request.method,
                        session = %session.short_id(),
                        attempt = request.attempt,
                        "Upstream rejected renewed session"
                    );
                    return Err(ProxyError::SessionInvalid);
                }
            }
        }
    }

    /// One upstream call with the given session
    async fn attempt(&self, request: &PendingRequest, session: &Session) -> Result<Attempt, ProxyError> {
        let reply = self
            .upstream
            .call(session, &request.body)
            .await
            .map_err(|e| {
                warn!(method = %request.method, error = %e, "Upstream call failed");
                e
            })?;

        if self.signature.matches(reply.status, &reply.body) {
            return Ok(Attempt::Renew);
        }

        if let Some(announced) = reply.announced_session.as_deref() {
            self.sessions.rotate(session.id(), announced);
        }

        debug!(method = %request.method, status = reply.status, "Upstream call completed");
        Ok(Attempt::Done(reply))
    }

    fn finish(&self, request: &PendingRequest, reply: UpstreamReply) -> Result<ForwardOutcome, ProxyError> {
        let body = decode_upstream_body(reply.status, &reply.body).map_err(|e| {
            error!(method = %request.method, status = reply.status, error = %e, "Undecodable upstream response");
            e
        })?;

        let body = match body {
            UpstreamBody::Json(document) => UpstreamBody::Json(restore_id(document, &request.id)),
            other => other,
        };

        Ok(ForwardOutcome {
            status: reply.status,
            body,
            content_type: reply.content_type,
        })
    }
}
