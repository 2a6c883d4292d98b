use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::credentials::CredentialStore;

/// Access/refresh bearer tokens issued together by the server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens must never end up in logs
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &format_args!("<{} bytes>", self.access_token.len()))
            .field("refresh_token", &format_args!("<{} bytes>", self.refresh_token.len()))
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub tokens: Option<TokenPair>,
    pub user_id: Option<String>,
}

impl Session {
    /// Access token, treating an empty string as absent
    pub fn access_token(&self) -> Option<&str> {
        self.tokens
            .as_ref()
            .map(|t| t.access_token.as_str())
            .filter(|t| !t.is_empty())
    }

    /// Refresh token, treating an empty string as absent
    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens
            .as_ref()
            .map(|t| t.refresh_token.as_str())
            .filter(|t| !t.is_empty())
    }
}

/// In-memory mirror of the [`CredentialStore`], loaded on first access.
///
/// Every mutation goes through here so memory and disk agree. Reads never
/// fail: a missing or unreadable record is an empty session.
pub struct TokenState {
    store: Arc<dyn CredentialStore>,
    cache: RwLock<Option<Session>>,
}

impl TokenState {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(None),
        }
    }

    /// Current session, loading it from the store the first time
    pub async fn snapshot(&self) -> Session {
        if let Some(session) = self.cache.read().await.as_ref() {
            return session.clone();
        }

        let mut cache = self.cache.write().await;
        if let Some(session) = cache.as_ref() {
            return session.clone();
        }
        let session = self.load_from_store().await;
        *cache = Some(session.clone());
        session
    }

    pub async fn current_access_token(&self) -> Option<String> {
        self.snapshot().await.access_token().map(str::to_string)
    }

    pub async fn current_refresh_token(&self) -> Option<String> {
        self.snapshot().await.refresh_token().map(str::to_string)
    }

    pub async fn user_id(&self) -> Option<String> {
        self.snapshot().await.user_id
    }

    /// Swap in a new pair. Memory is updated even if persisting fails, so
    /// the running process keeps using the tokens the server just issued.
    pub async fn replace(&self, pair: TokenPair) -> Result<()> {
        let mut cache = self.cache.write().await;
        let mut session = match cache.take() {
            Some(session) => session,
            None => self.load_from_store().await,
        };
        session.tokens = Some(pair.clone());
        *cache = Some(session);
        self.with_store(move |store| store.save(&pair)).await
    }

    pub async fn set_user_id(&self, user_id: &str) -> Result<()> {
        let mut cache = self.cache.write().await;
        let mut session = match cache.take() {
            Some(session) => session,
            None => self.load_from_store().await,
        };
        session.user_id = Some(user_id.to_string());
        *cache = Some(session);
        let user_id = user_id.to_string();
        self.with_store(move |store| store.save_user_id(&user_id)).await
    }

    /// Drop the session from memory and from the store
    pub async fn clear(&self) -> Result<()> {
        let mut cache = self.cache.write().await;
        *cache = Some(Session::default());
        self.with_store(|store| store.clear()).await
    }

    /// Run a store operation on the blocking pool. Callers keep the cache
    /// guard held across it so memory and disk change in the same order.
    async fn with_store<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CredentialStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .context("Credential store task failed")?
    }

    async fn load_from_store(&self) -> Session {
        let loaded = self
            .with_store(|store| Ok((store.load(), store.load_user_id())))
            .await;
        let (tokens, user_id) = loaded.unwrap_or_else(|e| (Err(e), Ok(None)));
        let tokens = tokens.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load stored tokens, treating as signed out");
            None
        });
        let user_id = user_id.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load stored user id");
            None
        });
        debug!(
            has_tokens = tokens.is_some(),
            has_user_id = user_id.is_some(),
            "Session loaded from credential store"
        );
        Session { tokens, user_id }
    }
}
