//! Identity Toolkit REST implementation of the identity boundary.
//!
//! Covers password sign-in/sign-up, account lookup, verification email
//! dispatch, federated handoff, and refresh-token exchange against the
//! `securetoken` endpoint. A stored refresh token doubles as the pending
//! sign-in state: completing a redirect-based sign-in in a terminal process
//! means exchanging whatever token the out-of-process flow left behind.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex};

use crate::auth::store::CredentialStore;
use crate::auth::{
    AuthEvent, AuthUser, FederatedRedirect, IdentityError, IdentityProvider, ProviderKind,
};
use async_trait::async_trait;

const IDENTITY_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN_BASE_URL: &str = "https://securetoken.googleapis.com/v1";

/// Tokens within this window of expiry are treated as already stale.
const TOKEN_REFRESH_SAFETY_WINDOW_S: i64 = 60;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Refresh-exchange error codes after which the stored token is useless.
const FATAL_REFRESH_CODES: [&str; 4] = [
    "TOKEN_EXPIRED",
    "USER_DISABLED",
    "USER_NOT_FOUND",
    "INVALID_REFRESH_TOKEN",
];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

// The securetoken endpoint answers in snake_case, unlike the accounts API.
#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    provider_user_info: Vec<ProviderUserInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderUserInfo {
    provider_id: String,
}

#[derive(Deserialize)]
struct IdentityErrorBody {
    error: IdentityErrorDetail,
}

#[derive(Deserialize)]
struct IdentityErrorDetail {
    #[serde(default)]
    message: String,
}

struct TokenState {
    user: AuthUser,
    id_token: String,
    refresh_token: String,
    expires_at_epoch_s: Option<i64>,
}

fn current_unix_epoch_s() -> Option<i64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|duration| duration.as_secs() as i64)
}

fn expiry_from(expires_in: Option<&str>) -> Option<i64> {
    let seconds: i64 = expires_in?.parse().ok()?;
    current_unix_epoch_s()?.checked_add(seconds)
}

fn token_needs_refresh(expires_at_epoch_s: Option<i64>, now_epoch_s: i64) -> bool {
    match expires_at_epoch_s {
        Some(expires_at) => {
            expires_at <= now_epoch_s.saturating_add(TOKEN_REFRESH_SAFETY_WINDOW_S)
        }
        None => false,
    }
}

/// Maps a non-2xx identity response onto an [`IdentityError`]. The service
/// reports machine-readable codes in `error.message`, sometimes suffixed
/// with a human-readable reason after a colon.
fn identity_error_from_body(status: u16, body: &str) -> IdentityError {
    if let Ok(parsed) = serde_json::from_str::<IdentityErrorBody>(body) {
        let message = parsed.error.message.trim().to_string();
        if !message.is_empty() {
            let code = message
                .split(':')
                .next()
                .unwrap_or(message.as_str())
                .trim()
                .to_string();
            return IdentityError::Provider { code, message };
        }
    }
    IdentityError::Provider {
        code: format!("HTTP_{status}"),
        message: body.trim().to_string(),
    }
}

fn auth_user_from_account(account: AccountInfo) -> AuthUser {
    let mut providers: Vec<ProviderKind> = account
        .provider_user_info
        .iter()
        .map(|info| ProviderKind::from_provider_id(&info.provider_id))
        .collect();
    providers.dedup();
    AuthUser {
        uid: account.local_id,
        email: account.email,
        email_verified: account.email_verified,
        providers,
    }
}

/// Identity provider backed by the Identity Toolkit REST surface.
pub struct FirebaseAuth {
    http: reqwest::Client,
    identity_base_url: String,
    token_base_url: String,
    api_key: String,
    federated_url: Option<String>,
    credentials: CredentialStore,
    state: Mutex<Option<TokenState>>,
    events: broadcast::Sender<AuthEvent>,
}

impl FirebaseAuth {
    pub fn new(
        http: reqwest::Client,
        api_key: impl Into<String>,
        federated_url: Option<String>,
        credentials: CredentialStore,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            http,
            identity_base_url: IDENTITY_BASE_URL.to_string(),
            token_base_url: SECURE_TOKEN_BASE_URL.to_string(),
            api_key: api_key.into(),
            federated_url,
            credentials,
            state: Mutex::new(None),
            events,
        }
    }

    fn account_url(&self, operation: &str) -> String {
        format!(
            "{}/accounts:{}?key={}",
            self.identity_base_url, operation, self.api_key
        )
    }

    fn emit(&self, event: AuthEvent) {
        // Nobody listening is fine; the session store subscribes lazily.
        let _ = self.events.send(event);
    }

    async fn post_account<T: DeserializeOwned>(
        &self,
        operation: &str,
        body: &serde_json::Value,
    ) -> Result<T, IdentityError> {
        let response = self
            .http
            .post(self.account_url(operation))
            .json(body)
            .send()
            .await
            .map_err(|err| IdentityError::Network(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| IdentityError::Network(err.to_string()))?;
        if !status.is_success() {
            return Err(identity_error_from_body(status.as_u16(), &body));
        }
        serde_json::from_str(&body)
            .map_err(|err| IdentityError::Network(format!("malformed identity response: {err}")))
    }

    async fn lookup(&self, id_token: &str) -> Result<AuthUser, IdentityError> {
        let response: LookupResponse = self
            .post_account("lookup", &json!({ "idToken": id_token }))
            .await?;
        response
            .users
            .into_iter()
            .next()
            .map(auth_user_from_account)
            .ok_or(IdentityError::NoUser)
    }

    /// Exchanges a refresh token for a fresh ID token. On codes that mean
    /// the token can never work again, the persisted copy is dropped so the
    /// next startup does not retry a dead credential.
    async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshResponse, IdentityError> {
        let url = format!("{}/token?key={}", self.token_base_url, self.api_key);
        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|err| IdentityError::Network(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| IdentityError::Network(err.to_string()))?;
        if !status.is_success() {
            let err = identity_error_from_body(status.as_u16(), &body);
            if let IdentityError::Provider { code, .. } = &err {
                if FATAL_REFRESH_CODES.contains(&code.as_str()) {
                    if let Err(store_err) = self.credentials.clear() {
                        tracing::warn!("failed to clear stale refresh token: {store_err}");
                    }
                }
            }
            return Err(err);
        }
        serde_json::from_str(&body)
            .map_err(|err| IdentityError::Network(format!("malformed token response: {err}")))
    }

    async fn adopt_session(
        &self,
        id_token: String,
        refresh_token: String,
        expires_in: Option<String>,
    ) -> Result<AuthUser, IdentityError> {
        let user = self.lookup(&id_token).await?;
        if let Err(err) = self.credentials.store(&refresh_token) {
            tracing::warn!("failed to persist refresh token: {err}");
        }
        let expires_at_epoch_s = expiry_from(expires_in.as_deref());
        *self.state.lock().await = Some(TokenState {
            user: user.clone(),
            id_token,
            refresh_token,
            expires_at_epoch_s,
        });
        self.emit(AuthEvent::SignedIn(user.clone()));
        Ok(user)
    }

    /// Completes a federated sign-in whose browser leg ran out of process,
    /// by exchanging the provider-issued OAuth ID token through
    /// `accounts:signInWithIdp`.
    pub async fn sign_in_with_idp_credential(
        &self,
        provider_id: &str,
        oauth_id_token: &str,
    ) -> Result<AuthUser, IdentityError> {
        let request_uri = self
            .federated_url
            .clone()
            .unwrap_or_else(|| "http://localhost".to_string());
        let body = json!({
            "postBody": format!("id_token={oauth_id_token}&providerId={provider_id}"),
            "requestUri": request_uri,
            "returnSecureToken": true,
            "returnIdpCredential": true,
        });
        let response: SignInResponse = self.post_account("signInWithIdp", &body).await?;
        self.adopt_session(
            response.id_token,
            response.refresh_token,
            response.expires_in,
        )
        .await
    }

    async fn refresh_current_token(&self) -> Result<String, IdentityError> {
        let refresh_token = {
            let state = self.state.lock().await;
            state
                .as_ref()
                .map(|s| s.refresh_token.clone())
                .ok_or(IdentityError::NoUser)?
        };
        match self.exchange_refresh_token(&refresh_token).await {
            Ok(refreshed) => {
                if let Err(err) = self.credentials.store(&refreshed.refresh_token) {
                    tracing::warn!("failed to persist rotated refresh token: {err}");
                }
                let expires_at_epoch_s = expiry_from(refreshed.expires_in.as_deref());
                let mut state = self.state.lock().await;
                if let Some(state) = state.as_mut() {
                    state.id_token = refreshed.id_token.clone();
                    state.refresh_token = refreshed.refresh_token;
                    state.expires_at_epoch_s = expires_at_epoch_s;
                }
                Ok(refreshed.id_token)
            }
            Err(err) => {
                if let IdentityError::Provider { code, .. } = &err {
                    if FATAL_REFRESH_CODES.contains(&code.as_str()) {
                        // The session is gone; tell subscribers.
                        *self.state.lock().await = None;
                        self.emit(AuthEvent::SignedOut);
                    }
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl IdentityProvider for FirebaseAuth {
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn current_user(&self) -> Option<AuthUser> {
        self.state.lock().await.as_ref().map(|s| s.user.clone())
    }

    async fn fresh_id_token(&self, force_refresh: bool) -> Result<String, IdentityError> {
        if !force_refresh {
            let state = self.state.lock().await;
            let current = state.as_ref().ok_or(IdentityError::NoUser)?;
            let now = current_unix_epoch_s();
            if !now.is_some_and(|now| token_needs_refresh(current.expires_at_epoch_s, now)) {
                return Ok(current.id_token.clone());
            }
        } else if self.state.lock().await.is_none() {
            return Err(IdentityError::NoUser);
        }
        self.refresh_current_token().await
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthUser, IdentityError> {
        let response: SignInResponse = self
            .post_account(
                "signInWithPassword",
                &json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true,
                }),
            )
            .await?;
        self.adopt_session(
            response.id_token,
            response.refresh_token,
            response.expires_in,
        )
        .await
    }

    async fn sign_up_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthUser, IdentityError> {
        let response: SignInResponse = self
            .post_account(
                "signUp",
                &json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true,
                }),
            )
            .await?;
        self.adopt_session(
            response.id_token,
            response.refresh_token,
            response.expires_in,
        )
        .await
    }

    async fn sign_in_with_federated_redirect(&self) -> Result<FederatedRedirect, IdentityError> {
        let auth_url = self.federated_url.clone().ok_or_else(|| {
            IdentityError::Unavailable(
                "no federated sign-in page configured; set federated_sign_in_url in the config file"
                    .to_string(),
            )
        })?;
        Ok(FederatedRedirect { auth_url })
    }

    async fn complete_redirect_sign_in(&self) -> Result<Option<AuthUser>, IdentityError> {
        if self.state.lock().await.is_some() {
            return Ok(None);
        }
        let stored = self.credentials.load().map_err(|err| {
            IdentityError::Unavailable(format!("credential store unavailable: {err}"))
        })?;
        let Some(refresh_token) = stored else {
            return Ok(None);
        };
        let refreshed = self.exchange_refresh_token(&refresh_token).await?;
        self.adopt_session(
            refreshed.id_token,
            refreshed.refresh_token,
            refreshed.expires_in,
        )
        .await
        .map(Some)
    }

    async fn send_verification_email(&self) -> Result<(), IdentityError> {
        let id_token = self.fresh_id_token(false).await?;
        let _: serde_json::Value = self
            .post_account(
                "sendOobCode",
                &json!({
                    "requestType": "VERIFY_EMAIL",
                    "idToken": id_token,
                }),
            )
            .await?;
        Ok(())
    }

    async fn reload_user(&self) -> Result<AuthUser, IdentityError> {
        let id_token = self.fresh_id_token(false).await?;
        let user = self.lookup(&id_token).await?;
        {
            let mut state = self.state.lock().await;
            match state.as_mut() {
                Some(state) => state.user = user.clone(),
                None => return Err(IdentityError::NoUser),
            }
        }
        self.emit(AuthEvent::SignedIn(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        *self.state.lock().await = None;
        if let Err(err) = self.credentials.clear() {
            tracing::warn!("failed to clear stored refresh token: {err}");
        }
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_bodies_expose_the_service_code() {
        let body = r#"{"error":{"code":400,"message":"EMAIL_NOT_FOUND"}}"#;
        match identity_error_from_body(400, body) {
            IdentityError::Provider { code, message } => {
                assert_eq!(code, "EMAIL_NOT_FOUND");
                assert_eq!(message, "EMAIL_NOT_FOUND");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[test]
    fn error_codes_are_split_off_reason_suffixes() {
        let body = r#"{"error":{"message":"TOO_MANY_ATTEMPTS_TRY_LATER : rate limited"}}"#;
        match identity_error_from_body(400, body) {
            IdentityError::Provider { code, message } => {
                assert_eq!(code, "TOO_MANY_ATTEMPTS_TRY_LATER");
                assert!(message.contains("rate limited"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_error_bodies_keep_the_status() {
        match identity_error_from_body(502, "<html>bad gateway</html>") {
            IdentityError::Provider { code, .. } => assert_eq!(code, "HTTP_502"),
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[test]
    fn account_records_map_onto_auth_users() {
        let account: AccountInfo = serde_json::from_str(
            r#"{
                "localId": "uid-1",
                "email": "a@b.c",
                "emailVerified": false,
                "providerUserInfo": [
                    {"providerId": "password"},
                    {"providerId": "google.com"}
                ]
            }"#,
        )
        .unwrap();
        let user = auth_user_from_account(account);
        assert_eq!(user.uid, "uid-1");
        assert_eq!(user.email.as_deref(), Some("a@b.c"));
        assert!(!user.email_verified);
        assert_eq!(
            user.providers,
            vec![ProviderKind::Password, ProviderKind::Federated]
        );
    }

    #[test]
    fn tokens_near_expiry_need_a_refresh() {
        assert!(token_needs_refresh(Some(1_000), 990));
        assert!(token_needs_refresh(Some(1_000), 1_000));
        assert!(!token_needs_refresh(Some(10_000), 1_000));
        assert!(!token_needs_refresh(None, 1_000));
    }

    #[test]
    fn securetoken_responses_decode_from_snake_case() {
        let refreshed: RefreshResponse = serde_json::from_str(
            r#"{"id_token":"id","refresh_token":"rt","expires_in":"3600","user_id":"u"}"#,
        )
        .unwrap();
        assert_eq!(refreshed.id_token, "id");
        assert_eq!(refreshed.refresh_token, "rt");
        assert_eq!(refreshed.expires_in.as_deref(), Some("3600"));
    }
}
