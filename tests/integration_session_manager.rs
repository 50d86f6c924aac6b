// Concurrency tests for the session slot

mod common;

use common::FakeUpstream;
use futures::future::join_all;
use session_bridge::core::errors::ProxyError;
use session_bridge::core::session::SessionState;
use session_bridge::state::SessionManager;
use std::sync::Arc;
use std::time::Duration;

fn manager(upstream: &Arc<FakeUpstream>) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(upstream.clone(), Duration::from_secs(3600)))
}

#[tokio::test]
async fn test_concurrent_acquire_performs_single_handshake() {
    let upstream = Arc::new(FakeUpstream::new().with_handshake_delay(Duration::from_millis(50)));
    let sessions = manager(&upstream);

    let tasks = (0..50).map(|_| {
        let sessions = sessions.clone();
        tokio::spawn(async move { sessions.acquire().await })
    });
    let results = join_all(tasks).await;

    assert_eq!(upstream.handshakes(), 1);
    for result in results {
        let session = result.unwrap().unwrap();
        assert_eq!(session.id(), "session-1");
    }
    assert_eq!(sessions.state(), Some(SessionState::Active));
}

#[tokio::test]
async fn test_waiters_share_handshake_failure_without_poisoning() {
    let upstream = Arc::new(
        FakeUpstream::new()
            .with_handshake_delay(Duration::from_millis(20))
            .with_failing_handshakes(1),
    );
    let sessions = manager(&upstream);

    let tasks = (0..10).map(|_| {
        let sessions = sessions.clone();
        tokio::spawn(async move { sessions.acquire().await })
    });
    for result in join_all(tasks).await {
        assert!(matches!(
            result.unwrap(),
            Err(ProxyError::UpstreamUnreachable(_))
        ));
    }
    assert_eq!(upstream.handshakes(), 1);
    assert_eq!(sessions.state(), None);

    // Nothing was cached, so the next caller starts a fresh handshake
    let session = sessions.acquire().await.unwrap();
    assert_eq!(session.id(), "session-2");
    assert_eq!(upstream.handshakes(), 2);
}

#[tokio::test]
async fn test_stale_invalidation_keeps_replacement() {
    let upstream = Arc::new(FakeUpstream::new());
    let sessions = manager(&upstream);

    let a = sessions.acquire().await.unwrap();
    assert!(sessions.invalidate(a.id()));
    let b = sessions.acquire().await.unwrap();
    assert_ne!(a.id(), b.id());

    // A late report about A must not touch B
    assert!(!sessions.invalidate(a.id()));
    assert_eq!(sessions.state(), Some(SessionState::Active));

    let again = sessions.acquire().await.unwrap();
    assert_eq!(again.id(), b.id());
    assert_eq!(upstream.handshakes(), 2);
}

#[tokio::test]
async fn test_concurrent_invalidations_renew_once() {
    let upstream = Arc::new(FakeUpstream::new().with_handshake_delay(Duration::from_millis(10)));
    let sessions = manager(&upstream);
    let original = sessions.acquire().await.unwrap();

    // Every holder of the old session reports it; only the first report counts
    let reports = (0..20).map(|_| {
        let sessions = sessions.clone();
        let id = original.id().to_string();
        tokio::spawn(async move {
            sessions.invalidate(&id);
            sessions.acquire().await
        })
    });
    let renewed: Vec<_> = join_all(reports)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap().id().to_string())
        .collect();

    assert_eq!(upstream.handshakes(), 2);
    assert!(renewed.iter().all(|id| id == "session-2"));
}

#[tokio::test]
async fn test_abandoned_initiator_does_not_cancel_handshake() {
    let upstream = Arc::new(FakeUpstream::new().with_handshake_delay(Duration::from_millis(200)));
    let sessions = manager(&upstream);

    let initiator = {
        let sessions = sessions.clone();
        tokio::spawn(async move { sessions.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(sessions.state(), Some(SessionState::Pending));

    let waiter = {
        let sessions = sessions.clone();
        tokio::spawn(async move { sessions.acquire().await })
    };
    initiator.abort();

    let session = waiter.await.unwrap().unwrap();
    assert_eq!(session.id(), "session-1");
    assert_eq!(upstream.handshakes(), 1);
    assert_eq!(sessions.state(), Some(SessionState::Active));
}

#[tokio::test]
async fn test_handshake_completes_with_no_waiters_left() {
    let upstream = Arc::new(FakeUpstream::new().with_handshake_delay(Duration::from_millis(50)));
    let sessions = manager(&upstream);

    // Caller gives up long before the upstream answers
    let gave_up = tokio::time::timeout(Duration::from_millis(5), sessions.acquire()).await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sessions.state(), Some(SessionState::Active));
    assert_eq!(sessions.acquire().await.unwrap().id(), "session-1");
    assert_eq!(upstream.handshakes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_max_age_forces_renewal() {
    let upstream = Arc::new(FakeUpstream::new());
    let sessions = Arc::new(SessionManager::new(upstream.clone(), Duration::from_secs(10)));

    let first = sessions.acquire().await.unwrap();
    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(sessions.acquire().await.unwrap().id(), first.id());

    tokio::time::advance(Duration::from_secs(6)).await;
    let renewed = sessions.acquire().await.unwrap();
    assert_eq!(renewed.id(), "session-2");
    assert_eq!(upstream.handshakes(), 2);
}
