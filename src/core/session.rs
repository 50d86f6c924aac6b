// Upstream session value object

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle of an upstream session
///
/// `Pending` while the handshake is in flight, `Active` once installed,
/// `Invalid` after the upstream rejected it or it aged out. Invalid is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Active,
    Invalid,
}

/// What a successful handshake yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    /// Opaque credential, never interpreted
    pub token: String,
    /// Lifetime declared by the upstream cookie (`Max-Age` / `Expires`), if any
    pub ttl: Option<Duration>,
}

impl SessionGrant {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// An upstream session.
///
/// Owned by the session manager; everyone else only ever sees a clone that
/// lives for one upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: String,
    created_at: Instant,
    expires_at: Instant,
    established_at: DateTime<Utc>,
    state: SessionState,
}

impl Session {
    /// Activate a granted session now
    pub fn activate(grant: SessionGrant, max_age: Duration) -> Self {
        Self::activate_at(grant, max_age, Instant::now())
    }

    /// Activate a granted session at `now`.
    ///
    /// Expiry is `now + max_age`, clamped to the cookie lifetime when the
    /// upstream declared a shorter one.
    pub fn activate_at(grant: SessionGrant, max_age: Duration, now: Instant) -> Self {
        let lifetime = match grant.ttl {
            Some(ttl) => ttl.min(max_age),
            None => max_age,
        };

        Self {
            id: grant.token,
            created_at: now,
            expires_at: now + lifetime,
            established_at: Utc::now(),
            state: SessionState::Active,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// First 8 characters of the id, the only part that is ever logged
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Active and not yet past its expiry
    pub fn is_usable(&self, now: Instant) -> bool {
        self.state == SessionState::Active && now < self.expires_at
    }

    pub(crate) fn mark_invalid(&mut self) {
        self.state = SessionState::Invalid;
    }

    /// Adopt an id the upstream announced for this same session
    pub(crate) fn rotate(&mut self, id: String) {
        self.id = id;
    }
}

/// Truncate a session id for logging
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
