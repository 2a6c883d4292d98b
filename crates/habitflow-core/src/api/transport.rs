//! Bearer-token attachment for every outgoing call.
//!
//! `authorize` is the single hook: it picks the refresh token for the
//! token-renewal endpoint and the access token for everything else. The
//! transport optionally replays a request once after a coordinated refresh
//! when the server answers 401.

use std::sync::Arc;

use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::ApiError;
use crate::auth::{RefreshCoordinator, RefreshOutcome, TokenState};

/// Token-renewal endpoint; the only one authenticated with the refresh token
pub const REFRESH_PATH: &str = "/auth/local/refresh";

/// Which stored token an endpoint expects as its bearer credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialClass {
    Access,
    Refresh,
}

impl CredentialClass {
    pub fn for_url(url: &Url) -> Self {
        if url.path().trim_end_matches('/').ends_with(REFRESH_PATH) {
            CredentialClass::Refresh
        } else {
            CredentialClass::Access
        }
    }
}

/// HTTP transport that authenticates requests from the shared [`TokenState`].
/// Clone is cheap - the client, token state and coordinator are shared.
#[derive(Clone)]
pub struct AuthenticatingTransport {
    client: Client,
    base_url: String,
    tokens: Arc<TokenState>,
    refresh: Option<RefreshCoordinator>,
}

impl AuthenticatingTransport {
    pub fn new(client: Client, base_url: &str, tokens: Arc<TokenState>) -> Result<Self, ApiError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        Ok(Self {
            client,
            base_url,
            tokens,
            refresh: None,
        })
    }

    /// Same transport, but a 401 on an ordinary endpoint triggers one
    /// coordinated refresh and a single replay of the request.
    pub fn with_refresh_retry(&self, coordinator: RefreshCoordinator) -> Self {
        Self {
            refresh: Some(coordinator),
            ..self.clone()
        }
    }

    pub fn retries_on_unauthorized(&self) -> bool {
        self.refresh.is_some()
    }

    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        let joined = if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };
        Url::parse(&joined).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", joined, e)))
    }

    /// Attach the bearer token `url` requires, if we have one. Returns the
    /// token used so callers can tell whether it changed since.
    pub async fn authorize(&self, builder: RequestBuilder, url: &Url) -> (RequestBuilder, Option<String>) {
        let class = CredentialClass::for_url(url);
        let token = match class {
            CredentialClass::Refresh => self.tokens.current_refresh_token().await,
            CredentialClass::Access => self.tokens.current_access_token().await,
        };
        match token {
            Some(token) => (builder.bearer_auth(&token), Some(token)),
            None => {
                debug!(path = url.path(), ?class, "No token available, sending unauthenticated");
                (builder, None)
            }
        }
    }

    /// Send a request and return the response whatever its status. Only
    /// transport failures are errors. `build` may run twice if the request
    /// is replayed after a refresh.
    pub async fn send<F>(&self, method: Method, path: &str, build: F) -> Result<Response, ApiError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync,
    {
        let url = self.url(path)?;
        let (response, used_token) = self.dispatch(&method, &url, &build).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(coordinator) = &self.refresh else {
            return Ok(response);
        };
        if CredentialClass::for_url(&url) == CredentialClass::Refresh {
            return Ok(response);
        }

        // Another request may already have renewed the pair
        let current = self.tokens.current_access_token().await;
        if current.is_some() && current != used_token {
            debug!(path = url.path(), "Access token changed since send, replaying");
            return Ok(self.dispatch(&method, &url, &build).await?.0);
        }

        match coordinator.request_refresh().await {
            RefreshOutcome::Success(_) => {
                debug!(path = url.path(), "Replaying request after token refresh");
                Ok(self.dispatch(&method, &url, &build).await?.0)
            }
            outcome => {
                debug!(path = url.path(), ?outcome, "Refresh did not help, returning 401");
                Ok(response)
            }
        }
    }

    async fn dispatch<F>(
        &self,
        method: &Method,
        url: &Url,
        build: &F,
    ) -> Result<(Response, Option<String>), ApiError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync,
    {
        let builder = self
            .client
            .request(method.clone(), url.clone())
            .header(header::ACCEPT, "application/json");
        let (builder, used_token) = self.authorize(build(builder), url).await;

        debug!(%method, path = url.path(), "Sending request");
        let response = builder.send().await?;
        debug!(%method, path = url.path(), status = response.status().as_u16(), "Response received");
        Ok((response, used_token))
    }

    /// Check if response is successful, returning an error with body if not.
    pub async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(Method::GET, path, |b| b).await?;
        parse_json(Self::check_response(response).await?).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self.send(Method::POST, path, |b| b.json(body)).await?;
        parse_json(Self::check_response(response).await?).await
    }

    /// POST without a body, discarding the response body
    pub async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        let response = self.send(Method::POST, path, |b| b).await?;
        Self::check_response(response).await?;
        Ok(())
    }
}

pub(crate) async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    response
        .json()
        .await
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))
}
