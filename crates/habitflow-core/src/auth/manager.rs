use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{debug, info, warn};

use super::bootstrap::BootstrapSequencer;
use super::credentials::{CredentialStore, FileCredentialStore, KeyringCredentialStore};
use super::refresh::{RefreshCoordinator, RefreshOutcome};
use super::session::TokenState;
use crate::api::{AuthApi, AuthResponse, AuthenticatingTransport, User};
use crate::config::{Config, CredentialBackend};

/// The one session object per installation.
///
/// Owns the token state and hands out the pieces built on it: the refresh
/// coordinator, the bootstrap sequencer and the transport for ordinary API
/// calls. Login, sign-up and logout are explicit user actions and write the
/// session directly; refresh-driven writes go through the coordinator.
pub struct AuthManager {
    tokens: Arc<TokenState>,
    api: Arc<AuthApi>,
    coordinator: RefreshCoordinator,
    transport: AuthenticatingTransport,
}

impl AuthManager {
    /// Build from config, choosing the credential backend it names
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn CredentialStore> = match config.credential_backend {
            CredentialBackend::File => Arc::new(FileCredentialStore::new(config.data_dir()?)),
            CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::new()?),
        };
        Self::new(config, store)
    }

    pub fn new(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        let tokens = Arc::new(TokenState::new(store));
        // Auth endpoints never retry on 401; they sit underneath the retry
        let plain = AuthenticatingTransport::new(client, &config.base_url, Arc::clone(&tokens))?;
        let api = Arc::new(AuthApi::new(plain.clone()));
        let coordinator = RefreshCoordinator::new(Arc::clone(&tokens), api.clone());

        let transport = if config.retry_on_unauthorized {
            plain.with_refresh_retry(coordinator.clone())
        } else {
            plain
        };

        debug!(
            base_url = %config.base_url,
            backend = ?config.credential_backend,
            retry = config.retry_on_unauthorized,
            "Auth manager ready"
        );

        Ok(Self {
            tokens,
            api,
            coordinator,
            transport,
        })
    }

    /// Sign in and persist the issued session
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let response = self
            .api
            .sign_in(email, password)
            .await
            .context("Sign in failed")?;
        self.persist(response).await
    }

    /// Register and persist the issued session
    pub async fn sign_up(&self, username: &str, email: &str, password: &str) -> Result<User> {
        let response = self
            .api
            .sign_up(username, email, password)
            .await
            .context("Sign up failed")?;
        self.persist(response).await
    }

    /// Invalidate the session on the server if possible, then always clear
    /// it locally. The server result is returned for display only; local
    /// state is cleared either way.
    pub async fn logout(&self) -> Result<()> {
        let server_result = self.api.logout().await;
        if let Err(ref e) = server_result {
            warn!(error = %e, "Server logout failed, clearing local session anyway");
        }

        self.tokens
            .clear()
            .await
            .context("Failed to clear local session")?;
        info!("Logged out");

        server_result.context("Server logout failed")
    }

    pub async fn reset_password(&self, email: &str) -> Result<String> {
        self.api
            .reset_password(email)
            .await
            .context("Password reset request failed")
    }

    /// A fresh cold-start sequencer over this session
    pub fn bootstrap(&self) -> BootstrapSequencer {
        BootstrapSequencer::new(self.coordinator.clone())
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        self.coordinator.request_refresh().await
    }

    /// Transport for ordinary API calls
    pub fn transport(&self) -> &AuthenticatingTransport {
        &self.transport
    }

    pub async fn user_id(&self) -> Option<String> {
        self.tokens.user_id().await
    }

    /// Whether a refresh token is stored; says nothing about server validity
    pub async fn is_signed_in(&self) -> bool {
        self.tokens.current_refresh_token().await.is_some()
    }

    async fn persist(&self, response: AuthResponse) -> Result<User> {
        self.tokens
            .replace(response.tokens)
            .await
            .context("Failed to save tokens")?;
        self.tokens
            .set_user_id(&response.user.id)
            .await
            .context("Failed to save user id")?;
        info!(user_id = %response.user.id, "Session stored");
        Ok(response.user)
    }
}
