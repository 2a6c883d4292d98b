//! Single-flight token renewal.
//!
//! The first caller to ask for a refresh becomes the leader and spawns the
//! network call on its own task. Everyone arriving while it runs awaits the
//! same shared future, so N concurrent callers cost one request and all see
//! the same [`RefreshOutcome`]. The spawned task owns the work: a caller that
//! stops waiting does not cancel the refresh for the others.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::session::{TokenPair, TokenState};

/// Result of one refresh attempt, shared by every caller that waited on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Success(TokenPair),
    /// No refresh token stored; nothing was sent
    NoRefreshTokenAvailable,
    /// The server refused the refresh token; the session has been cleared
    Rejected(u16),
    /// Timeout, connectivity, malformed response or local persistence
    /// failure. The session is left as it was.
    TransportError(String),
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RefreshOutcome::Success(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("refresh token rejected with status {0}")]
    Rejected(u16),

    #[error("refresh request failed: {0}")]
    Transport(String),
}

/// The network half of a refresh: exchange the stored refresh token for a
/// new pair. The implementation is responsible for attaching the refresh
/// token as the bearer credential.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<TokenPair, RefreshError>;
}

type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    tokens: Arc<TokenState>,
    refresher: Arc<dyn TokenRefresher>,
    in_flight: Mutex<Option<PendingRefresh>>,
    network_calls: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(tokens: Arc<TokenState>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tokens,
                refresher,
                in_flight: Mutex::new(None),
                network_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Refresh the token pair, joining an in-flight refresh if there is one.
    pub async fn request_refresh(&self) -> RefreshOutcome {
        let pending = {
            let mut slot = self.inner.in_flight.lock().await;
            match slot.as_ref() {
                Some(pending) => {
                    debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    let pending = self.start();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Number of refresh requests actually sent to the server
    pub fn refresh_count(&self) -> u64 {
        self.inner.network_calls.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> &Arc<TokenState> {
        &self.inner.tokens
    }

    /// Spawn the leader task. Must be called with the in-flight slot locked;
    /// the task clears the slot when done, so it cannot race the caller
    /// storing it.
    fn start(&self) -> PendingRefresh {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(inner.lead())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    error!("Token refresh task panicked");
                    RefreshOutcome::TransportError("refresh task panicked".to_string())
                });
            inner.in_flight.lock().await.take();
            outcome
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                error!(error = %e, "Token refresh task failed");
                RefreshOutcome::TransportError(format!("refresh task failed: {}", e))
            })
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn lead(&self) -> RefreshOutcome {
        if self.tokens.current_refresh_token().await.is_none() {
            info!("No refresh token stored, skipping refresh");
            return RefreshOutcome::NoRefreshTokenAvailable;
        }

        self.network_calls.fetch_add(1, Ordering::SeqCst);
        debug!("Requesting new token pair");

        match self.refresher.refresh().await {
            Ok(pair) => {
                // Followers only see the outcome after this write completes
                if let Err(e) = self.tokens.replace(pair.clone()).await {
                    error!(error = %e, "Failed to persist refreshed tokens");
                    return RefreshOutcome::TransportError(format!(
                        "failed to persist refreshed tokens: {:#}",
                        e
                    ));
                }
                info!("Token pair refreshed");
                RefreshOutcome::Success(pair)
            }
            Err(RefreshError::Rejected(status)) => {
                warn!(status, "Refresh token rejected, clearing session");
                if let Err(e) = self.tokens.clear().await {
                    error!(error = %e, "Failed to clear rejected session");
                }
                RefreshOutcome::Rejected(status)
            }
            Err(RefreshError::Transport(cause)) => {
                warn!(%cause, "Token refresh failed, keeping session");
                RefreshOutcome::TransportError(cause)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialStore, FileCredentialStore};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Answers every refresh with the same scripted result after a delay
    struct ScriptedRefresher {
        result: Result<TokenPair, RefreshError>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedRefresher {
        fn new(result: Result<TokenPair, RefreshError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                delay: Duration::from_millis(200),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRefresher for ScriptedRefresher {
        async fn refresh(&self) -> Result<TokenPair, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    struct PanickingRefresher;

    #[async_trait]
    impl TokenRefresher for PanickingRefresher {
        async fn refresh(&self) -> Result<TokenPair, RefreshError> {
            panic!("boom");
        }
    }

    fn setup(
        dir: &std::path::Path,
        stored: Option<TokenPair>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> (RefreshCoordinator, Arc<FileCredentialStore>) {
        let store = Arc::new(FileCredentialStore::new(dir));
        if let Some(pair) = stored {
            store.save(&pair).unwrap();
        }
        let tokens = Arc::new(TokenState::new(store.clone()));
        (RefreshCoordinator::new(tokens, refresher), store)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = TokenPair::new("access-2", "refresh-2");
        let refresher = ScriptedRefresher::new(Ok(fresh.clone()));
        let (coordinator, store) = setup(
            dir.path(),
            Some(TokenPair::new("access-1", "refresh-1")),
            refresher.clone(),
        );

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.request_refresh().await })
            })
            .collect();
        let outcomes = futures::future::join_all(tasks).await;

        assert_eq!(refresher.calls(), 1);
        assert_eq!(coordinator.refresh_count(), 1);
        for outcome in outcomes {
            assert_eq!(outcome.unwrap(), RefreshOutcome::Success(fresh.clone()));
        }
        assert_eq!(store.load().unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn test_sequential_refreshes_each_hit_the_network() {
        let dir = tempfile::tempdir().unwrap();
        let refresher = ScriptedRefresher::new(Ok(TokenPair::new("access-2", "refresh-2")));
        let (coordinator, _) = setup(
            dir.path(),
            Some(TokenPair::new("access-1", "refresh-1")),
            refresher.clone(),
        );

        assert!(coordinator.request_refresh().await.is_success());
        assert!(coordinator.request_refresh().await.is_success());
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let refresher = ScriptedRefresher::new(Ok(TokenPair::new("a", "r")));
        let (coordinator, _) = setup(dir.path(), None, refresher.clone());

        let outcome = coordinator.request_refresh().await;

        assert_eq!(outcome, RefreshOutcome::NoRefreshTokenAvailable);
        assert_eq!(refresher.calls(), 0);
        assert_eq!(coordinator.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_rejection_clears_session() {
        let dir = tempfile::tempdir().unwrap();
        let refresher = ScriptedRefresher::new(Err(RefreshError::Rejected(401)));
        let (coordinator, store) = setup(
            dir.path(),
            Some(TokenPair::new("access-1", "refresh-1")),
            refresher,
        );
        store.save_user_id("user-1").unwrap();

        let outcome = coordinator.request_refresh().await;

        assert_eq!(outcome, RefreshOutcome::Rejected(401));
        assert!(store.load().unwrap().is_none());
        assert!(store.load_user_id().unwrap().is_none());
        assert!(coordinator.tokens().current_refresh_token().await.is_none());
    }

    #[tokio::test]
    async fn test_transport_error_keeps_session() {
        let dir = tempfile::tempdir().unwrap();
        let original = TokenPair::new("access-1", "refresh-1");
        let refresher =
            ScriptedRefresher::new(Err(RefreshError::Transport("timed out".to_string())));
        let (coordinator, store) = setup(dir.path(), Some(original.clone()), refresher);

        let outcome = coordinator.request_refresh().await;

        assert_eq!(outcome, RefreshOutcome::TransportError("timed out".to_string()));
        assert_eq!(store.load().unwrap(), Some(original));
    }

    #[tokio::test]
    async fn test_panicking_refresher_becomes_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store) = setup(
            dir.path(),
            Some(TokenPair::new("access-1", "refresh-1")),
            Arc::new(PanickingRefresher),
        );

        let outcome = coordinator.request_refresh().await;
        assert!(matches!(outcome, RefreshOutcome::TransportError(_)));
        assert!(store.load().unwrap().is_some());

        // The in-flight marker was released, so a later call starts afresh
        let again = coordinator.request_refresh().await;
        assert!(matches!(again, RefreshOutcome::TransportError(_)));
        assert_eq!(coordinator.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = TokenPair::new("access-2", "refresh-2");
        let refresher = ScriptedRefresher::new(Ok(fresh.clone()));
        let (coordinator, store) = setup(
            dir.path(),
            Some(TokenPair::new("access-1", "refresh-1")),
            refresher.clone(),
        );

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            coordinator.request_refresh(),
        )
        .await;
        assert!(abandoned.is_err());

        let outcome = coordinator.request_refresh().await;

        assert_eq!(outcome, RefreshOutcome::Success(fresh.clone()));
        assert_eq!(refresher.calls(), 1);
        assert_eq!(store.load().unwrap(), Some(fresh));
    }
}
