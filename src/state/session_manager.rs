// Owner of the upstream session slot

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::UpstreamClient;
use crate::core::errors::ProxyError;
use crate::core::session::{short_id, Session, SessionState};

type HandshakeFuture = Shared<BoxFuture<'static, Result<Session, ProxyError>>>;

/// The single session slot
enum Slot {
    Vacant,
    /// A handshake is in flight; every caller awaits the same future
    Pending {
        generation: u64,
        handshake: HandshakeFuture,
    },
    Held(Session),
}

struct Inner {
    slot: Mutex<Slot>,
    upstream: Arc<dyn UpstreamClient>,
    max_age: Duration,
    handshakes: AtomicU64,
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        // Slot transitions never panic midway, so a poisoned lock still holds a coherent slot
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out a currently valid upstream session.
///
/// The get-or-create decision happens inside one critical section, so N
/// callers that find no usable session produce exactly one handshake. The
/// handshake runs on its own task: a caller that goes away does not cancel it,
/// and the other waiters still receive its result. The mutex is never held
/// across an await.
///
/// ```text
/// Vacant ──acquire()──→ Pending ──ok──→ Held(Active) ──invalidate()/expiry──→ Held(Invalid)
///   ↑                      │                                                     │
///   └────────err───────────┘                          acquire() starts a new handshake
/// ```
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager with no session; the first `acquire` performs the handshake
    pub fn new(upstream: Arc<dyn UpstreamClient>, max_age: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Vacant),
                upstream,
                max_age,
                handshakes: AtomicU64::new(0),
            }),
        }
    }

    /// Return the held session if it is still usable, otherwise perform (or
    /// join) a handshake.
    ///
    /// # Errors
    /// [`ProxyError::UpstreamUnreachable`] when the handshake fails. Nothing is
    /// installed in that case and the next call starts a fresh handshake.
    pub async fn acquire(&self) -> Result<Session, ProxyError> {
        let handshake = {
            let mut slot = self.inner.lock_slot();
            let in_flight = match &mut *slot {
                Slot::Held(session) if session.is_usable(Instant::now()) => {
                    return Ok(session.clone());
                }
                Slot::Pending { handshake, .. } => {
                    debug!("Joining in-flight session handshake");
                    Some(handshake.clone())
                }
                Slot::Held(session) => {
                    if session.state() == SessionState::Active {
                        info!(session = %session.short_id(), "Session reached max age, renewing");
                        session.mark_invalid();
                    }
                    None
                }
                Slot::Vacant => None,
            };

            match in_flight {
                Some(handshake) => handshake,
                None => self.begin_handshake(&mut slot),
            }
        };

        handshake.await
    }

    /// Mark the held session invalid, but only if it is the one named.
    ///
    /// Returns `false` (and changes nothing) when `session_id` refers to a
    /// session that has already been replaced.
    pub fn invalidate(&self, session_id: &str) -> bool {
        let mut slot = self.inner.lock_slot();
        if let Slot::Held(session) = &mut *slot {
            if session.id() == session_id && session.state() == SessionState::Active {
                session.mark_invalid();
                info!(session = %short_id(session_id), "Session invalidated");
                return true;
            }
        }

        debug!(session = %short_id(session_id), "Ignoring stale invalidation");
        false
    }

    /// Adopt a new id the upstream announced for the held session.
    ///
    /// Same stale guard as [`invalidate`](Self::invalidate): only applies when
    /// `current_id` is still the held, active session.
    pub fn rotate(&self, current_id: &str, announced_id: &str) -> bool {
        if announced_id.is_empty() || announced_id == current_id {
            return false;
        }

        let mut slot = self.inner.lock_slot();
        if let Slot::Held(session) = &mut *slot {
            if session.id() == current_id && session.state() == SessionState::Active {
                session.rotate(announced_id.to_string());
                info!(
                    from = %short_id(current_id),
                    to = %short_id(announced_id),
                    "Session id rotated by upstream"
                );
                return true;
            }
        }
        false
    }

    /// Copy of the held session, if any (pending handshakes report `None`)
    pub fn snapshot(&self) -> Option<Session> {
        match &*self.inner.lock_slot() {
            Slot::Held(session) => Some(session.clone()),
            _ => None,
        }
    }

    /// State of the slot, `None` when no session was ever established
    pub fn state(&self) -> Option<SessionState> {
        match &*self.inner.lock_slot() {
            Slot::Vacant => None,
            Slot::Pending { .. } => Some(SessionState::Pending),
            Slot::Held(session) => Some(session.state()),
        }
    }

    /// Number of handshakes started since creation
    pub fn handshakes_started(&self) -> u64 {
        self.inner.handshakes.load(Ordering::Relaxed)
    }

    /// Spawn a handshake and park its shared future in the slot.
    ///
    /// Called with the slot lock held; the spawned task takes the lock only
    /// after the upstream call returns.
    fn begin_handshake(&self, slot: &mut MutexGuard<'_, Slot>) -> HandshakeFuture {
        let generation = self.inner.handshakes.fetch_add(1, Ordering::Relaxed) + 1;
        info!(generation, "Establishing upstream session");

        let task_inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = task_inner.upstream.establish_session().await;
            let mut slot = task_inner.lock_slot();
            match result {
                Ok(grant) => {
                    let session = Session::activate(grant, task_inner.max_age);
                    info!(
                        generation,
                        session = %session.short_id(),
                        established_at = %session.established_at(),
                        "Session established"
                    );
                    *slot = Slot::Held(session.clone());
                    Ok(session)
                }
                Err(e) => {
                    warn!(generation, error = %e, "Failed to establish session");
                    *slot = Slot::Vacant;
                    Err(as_unreachable(e))
                }
            }
        });

        let join_inner = Arc::clone(&self.inner);
        let handshake = async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    // The task died before touching the slot; release it so later callers retry
                    let mut slot = join_inner.lock_slot();
                    if matches!(&*slot, Slot::Pending { generation: g, .. } if *g == generation) {
                        *slot = Slot::Vacant;
                    }
                    Err(ProxyError::UpstreamUnreachable(format!(
                        "session handshake aborted: {}",
                        join_error
                    )))
                }
            }
        }
        .boxed()
        .shared();

        **slot = Slot::Pending {
            generation,
            handshake: handshake.clone(),
        };
        handshake
    }
}

/// Every handshake failure is reported to callers as unreachable
fn as_unreachable(err: ProxyError) -> ProxyError {
    match err {
        ProxyError::UpstreamUnreachable(_) => err,
        other => ProxyError::UpstreamUnreachable(other.to_string()),
    }
}
