//! Client for the habitflow `/auth` endpoints.
//!
//! `AuthApi` speaks to the server only; it never touches stored
//! credentials itself. Persisting what it returns is up to the caller
//! (see `AuthManager`), except for refresh, where the coordinator does it.

use async_trait::async_trait;
use reqwest::{multipart::Form, Method, StatusCode};
use tracing::{debug, warn};

use super::models::{AuthResponse, ResetPasswordRequest, ResetPasswordResponse, SignInRequest};
use super::transport::{parse_json, AuthenticatingTransport, REFRESH_PATH};
use super::ApiError;
use crate::auth::{RefreshError, TokenPair, TokenRefresher};

// ============================================================================
// Constants
// ============================================================================

const SIGN_IN_PATH: &str = "/auth/local/signin";
const SIGN_UP_PATH: &str = "/auth/local/signup";
const LOGOUT_PATH: &str = "/auth/local/logout";
const RESET_PASSWORD_PATH: &str = "/auth/reset-password-via-email";

#[derive(Clone)]
pub struct AuthApi {
    transport: AuthenticatingTransport,
}

impl AuthApi {
    /// The transport should not retry on 401: these endpoints are the ones
    /// a retry would call into.
    pub fn new(transport: AuthenticatingTransport) -> Self {
        Self { transport }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        debug!(email, "Signing in");
        self.transport
            .post_json(SIGN_IN_PATH, &SignInRequest { email, password })
            .await
    }

    /// Register a new account. The server takes multipart text fields.
    pub async fn sign_up(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ApiError> {
        debug!(username, email, "Signing up");
        let response = self
            .transport
            .send(Method::POST, SIGN_UP_PATH, |b| {
                b.multipart(
                    Form::new()
                        .text("username", username.to_string())
                        .text("email", email.to_string())
                        .text("password", password.to_string()),
                )
            })
            .await?;
        parse_json(AuthenticatingTransport::check_response(response).await?).await
    }

    /// Ask the server to invalidate the current session
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.transport.post_empty(LOGOUT_PATH).await
    }

    /// Request a password-reset email; returns the server's message
    pub async fn reset_password(&self, email: &str) -> Result<String, ApiError> {
        let response: ResetPasswordResponse = self
            .transport
            .post_json(RESET_PASSWORD_PATH, &ResetPasswordRequest { email })
            .await?;
        Ok(response.message)
    }
}

#[async_trait]
impl TokenRefresher for AuthApi {
    async fn refresh(&self) -> Result<TokenPair, RefreshError> {
        let response = self
            .transport
            .send(Method::POST, REFRESH_PATH, |b| b)
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return match response.json::<Option<TokenPair>>().await {
                Ok(Some(pair)) => Ok(pair),
                Ok(None) => Err(RefreshError::Transport(
                    "refresh response had no tokens".to_string(),
                )),
                Err(e) => Err(RefreshError::Transport(format!(
                    "malformed refresh response: {}",
                    e
                ))),
            };
        }

        if is_token_verdict(status) {
            warn!(status = status.as_u16(), "Refresh endpoint rejected token");
            Err(RefreshError::Rejected(status.as_u16()))
        } else {
            Err(RefreshError::Transport(format!(
                "refresh endpoint returned {}",
                status
            )))
        }
    }
}

/// Statuses where the server has judged the refresh token itself. Anything
/// else (408, 404 from a wrong base URL, 429, 5xx) says nothing about it.
fn is_token_verdict(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_token_statuses_reject() {
        for code in [400, 401, 403] {
            assert!(is_token_verdict(StatusCode::from_u16(code).unwrap()), "{}", code);
        }
        for code in [404, 405, 408, 409, 429, 500, 502, 503] {
            assert!(!is_token_verdict(StatusCode::from_u16(code).unwrap()), "{}", code);
        }
    }
}
