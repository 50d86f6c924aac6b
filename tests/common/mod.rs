// Common test utilities and helpers for all test modules

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use serde_json::{json, Value};
use session_bridge::api::{create_router, AppState, UpstreamClient, UpstreamReply};
use session_bridge::config::Config;
use session_bridge::core::errors::ProxyError;
use session_bridge::core::session::{Session, SessionGrant};
use session_bridge::proxy::RequestForwarder;
use session_bridge::state::SessionManager;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

/// Scripted behaviour of one upstream call
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 with `{"result":{"tools":[]}}` echoing the forwarded id
    Echo,
    /// Arbitrary status and body
    Raw(u16, String),
    /// 404 "Session not found", matching the default signature
    SessionInvalid,
    /// The call timed out
    Timeout,
    /// The connection failed
    Unreachable,
    /// Like `Echo`, but announcing a new session id in the response header
    Announce(String),
}

/// In-memory upstream that counts handshakes and calls
pub struct FakeUpstream {
    handshakes: AtomicUsize,
    calls: AtomicUsize,
    pings: AtomicUsize,
    handshake_delay: Duration,
    failing_handshakes: AtomicUsize,
    failing_from: Option<usize>,
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    ping_result: Result<u16, ProxyError>,
    seen_sessions: Mutex<Vec<String>>,
    seen_bodies: Mutex<Vec<Bytes>>,
}

impl Default for FakeUpstream {
    fn default() -> Self {
        Self {
            handshakes: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            handshake_delay: Duration::ZERO,
            failing_handshakes: AtomicUsize::new(0),
            failing_from: None,
            replies: Mutex::new(VecDeque::new()),
            fallback: Reply::Echo,
            ping_result: Ok(200),
            seen_sessions: Mutex::new(Vec::new()),
            seen_bodies: Mutex::new(Vec::new()),
        }
    }
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = delay;
        self
    }

    /// The first `n` handshakes fail with `UpstreamUnreachable`
    pub fn with_failing_handshakes(self, n: usize) -> Self {
        self.failing_handshakes.store(n, Ordering::SeqCst);
        self
    }

    /// Handshake number `n` and every later one fail
    pub fn with_handshakes_failing_from(mut self, n: usize) -> Self {
        self.failing_from = Some(n);
        self
    }

    /// Replies consumed in order, one per call
    pub fn with_replies(self, replies: Vec<Reply>) -> Self {
        *self.replies.lock().unwrap() = replies.into();
        self
    }

    /// Reply used once the scripted ones run out
    pub fn with_fallback(mut self, reply: Reply) -> Self {
        self.fallback = reply;
        self
    }

    pub fn with_ping(mut self, result: Result<u16, ProxyError>) -> Self {
        self.ping_result = result;
        self
    }

    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Session ids presented on each call, in order
    pub fn seen_sessions(&self) -> Vec<String> {
        self.seen_sessions.lock().unwrap().clone()
    }

    pub fn seen_bodies(&self) -> Vec<Bytes> {
        self.seen_bodies.lock().unwrap().clone()
    }
}

fn echo(envelope: &Bytes) -> String {
    let id = serde_json::from_slice::<Value>(envelope)
        .ok()
        .and_then(|v| v.get("id").cloned())
        .unwrap_or(Value::Null);
    json!({"jsonrpc": "2.0", "result": {"tools": []}, "id": id}).to_string()
}

fn reply(status: u16, body: String, announced_session: Option<String>) -> UpstreamReply {
    UpstreamReply {
        status,
        body: Bytes::from(body),
        content_type: Some("application/json".to_string()),
        announced_session,
    }
}

#[async_trait::async_trait]
impl UpstreamClient for FakeUpstream {
    async fn establish_session(&self) -> Result<SessionGrant, ProxyError> {
        let n = self.handshakes.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.handshake_delay.is_zero() {
            tokio::time::sleep(self.handshake_delay).await;
        }

        let should_fail = self
            .failing_handshakes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
            || self.failing_from.is_some_and(|from| n >= from);
        if should_fail {
            return Err(ProxyError::UpstreamUnreachable("connection refused".to_string()));
        }

        Ok(SessionGrant::new(format!("session-{}", n)))
    }

    async fn call(&self, session: &Session, envelope: &Bytes) -> Result<UpstreamReply, ProxyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_sessions.lock().unwrap().push(session.id().to_string());
        self.seen_bodies.lock().unwrap().push(envelope.clone());

        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match next {
            Reply::Echo => Ok(reply(200, echo(envelope), None)),
            Reply::Raw(status, body) => Ok(reply(status, body, None)),
            Reply::SessionInvalid => Ok(reply(404, "Session not found".to_string(), None)),
            Reply::Timeout => Err(ProxyError::Timeout(5)),
            Reply::Unreachable => Err(ProxyError::UpstreamUnreachable("connection reset".to_string())),
            Reply::Announce(id) => Ok(reply(200, echo(envelope), Some(id))),
        }
    }

    async fn ping(&self) -> Result<u16, ProxyError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.ping_result.clone()
    }
}

/// Wire a forwarder and router around the given upstream
pub fn build_app(upstream: Arc<FakeUpstream>) -> (Router, AppState) {
    build_app_with_config(upstream, Config::test_config())
}

pub fn build_app_with_config(upstream: Arc<FakeUpstream>, config: Config) -> (Router, AppState) {
    let upstream: Arc<dyn UpstreamClient> = upstream;
    let sessions = Arc::new(SessionManager::new(upstream.clone(), config.session_max_age()));
    let forwarder = Arc::new(RequestForwarder::new(
        sessions,
        upstream.clone(),
        config.invalid_session_signature(),
    ));

    let app_state = AppState {
        forwarder,
        upstream,
        config: Arc::new(config),
    };
    let router = create_router(&app_state).with_state(app_state.clone());
    (router, app_state)
}

/// POST a raw body and decode the JSON answer (`Value::Null` for an empty body)
pub async fn post_raw(app: &Router, path: &str, body: impl Into<Body>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// POST a raw body and return the answer's exact bytes
pub async fn post_bytes(app: &Router, path: &str, body: &'static str) -> (StatusCode, Bytes) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes)
}

pub async fn post_json(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    post_raw(app, path, body.to_string()).await
}

pub async fn get_json(app: &Router, path: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(path).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}
