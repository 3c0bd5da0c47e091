//! Bearer-token-attaching HTTP client for the chat service.
//!
//! Every outgoing call asks the identity provider for a force-refreshed ID
//! token; a cached token would get authenticated calls rejected downstream
//! the moment it goes stale. Calls without a signed-in user dispatch
//! unauthenticated. This layer never retries; retry policy belongs to the
//! caller.

use std::fmt;
use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::{IdentityError, IdentityProvider};
use crate::utils::url::construct_api_url;

/// Uniform failure surface for chat service calls.
#[derive(Debug)]
pub enum ClientError {
    /// No response at all: DNS, connect, or mid-body transport failure, or a
    /// body that could not be decoded as the expected payload.
    Network(String),

    /// The service answered with a non-success status and (usually) a
    /// message of its own.
    Rejected { status: u16, message: String },

    /// The identity provider refused to mint a token, e.g. the session just
    /// expired.
    TokenFetch(IdentityError),
}

impl ClientError {
    /// True for statuses that mean the bearer credential was missing,
    /// invalid, or expired.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, ClientError::Rejected { status, .. } if *status == 401 || *status == 403)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ClientError::Rejected { status, .. } if *status == 429)
    }

    /// The text shown inline in a transcript when a send fails.
    pub fn chat_display(&self) -> String {
        match self {
            ClientError::Rejected { message, .. } if !message.is_empty() => message.clone(),
            _ => "Could not get response".to_string(),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Network(msg) => write!(f, "network error: {msg}"),
            ClientError::Rejected { status, message } => {
                if message.is_empty() {
                    write!(f, "request rejected (HTTP {status})")
                } else {
                    write!(f, "request rejected (HTTP {status}): {message}")
                }
            }
            ClientError::TokenFetch(err) => write!(f, "could not obtain an access token: {err}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::TokenFetch(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(serde::Deserialize)]
struct ServerErrorBody {
    error: String,
}

/// Extracts the server-supplied message from a rejection body. The service
/// reports errors as `{"error": "..."}`; anything else is passed through
/// trimmed.
fn rejection_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ServerErrorBody>(body) {
        return parsed.error;
    }
    body.trim().to_string()
}

/// HTTP client wrapper that authenticates every call with a fresh bearer
/// token from the current session.
#[derive(Clone)]
pub struct TokenedClient {
    http: reqwest::Client,
    base_url: String,
    identity: Arc<dyn IdentityProvider>,
}

impl TokenedClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
            identity,
        }
    }

    /// Resolves the bearer credential for the current session: a forced
    /// token refresh when a user is present, nothing when signed out.
    async fn bearer_token(&self) -> Result<Option<String>, ClientError> {
        if self.identity.current_user().await.is_none() {
            return Ok(None);
        }
        self.identity
            .fresh_id_token(true)
            .await
            .map(Some)
            .map_err(ClientError::TokenFetch)
    }

    /// Dispatches one call. Non-success statuses are consumed into
    /// [`ClientError::Rejected`] with the server's own message.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ClientError> {
        let url = construct_api_url(&self.base_url, path);
        let mut request = self.http.request(method, url);
        if let Some(token) = self.bearer_token().await? {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ClientError::Network(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Rejected {
            status: status.as_u16(),
            message: rejection_message(&body),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.call(Method::GET, path, None).await?;
        response
            .json()
            .await
            .map_err(|err| ClientError::Network(format!("malformed response body: {err}")))
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let body = serde_json::to_value(body)
            .map_err(|err| ClientError::Network(format!("unserializable request body: {err}")))?;
        let response = self.call(Method::POST, path, Some(&body)).await?;
        response
            .json()
            .await
            .map_err(|err| ClientError::Network(format!("malformed response body: {err}")))
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.call(Method::DELETE, path, None).await?;
        Ok(())
    }
}
