//! Identity-provider boundary.
//!
//! Everything the rest of the crate knows about authentication goes through
//! [`IdentityProvider`]. The production implementation in [`firebase`] talks
//! to the Identity Toolkit REST surface; tests substitute a scripted
//! provider. Failures cross this boundary as [`IdentityError`] values, never
//! as panics.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub mod firebase;
pub mod store;

pub use firebase::FirebaseAuth;
pub use store::CredentialStore;

/// How a user originally authenticated. Email verification is enforced only
/// for password credentials; federated users are vouched for by their
/// provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Password,
    Federated,
}

impl ProviderKind {
    /// Maps a provider id from the identity service ("password",
    /// "google.com", ...) onto the two kinds the client distinguishes.
    pub fn from_provider_id(id: &str) -> Self {
        if id.eq_ignore_ascii_case("password") {
            ProviderKind::Password
        } else {
            ProviderKind::Federated
        }
    }
}

/// Authenticated-user snapshot as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub providers: Vec<ProviderKind>,
}

impl AuthUser {
    pub fn has_password_provider(&self) -> bool {
        self.providers.contains(&ProviderKind::Password)
    }
}

/// Change notification delivered to subscribers. Each event carries the full
/// replacement state; nothing is patched in place.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(AuthUser),
    SignedOut,
}

/// Handoff for a federated sign-in that must complete in a browser. The
/// session is picked up afterwards by [`IdentityProvider::complete_redirect_sign_in`].
#[derive(Debug, Clone)]
pub struct FederatedRedirect {
    pub auth_url: String,
}

/// Errors surfaced by identity operations.
#[derive(Debug)]
pub enum IdentityError {
    /// The provider could not be reached at all.
    Network(String),

    /// The provider answered with an error code ("EMAIL_NOT_FOUND",
    /// "INVALID_PASSWORD", "TOO_MANY_ATTEMPTS_TRY_LATER", ...).
    Provider { code: String, message: String },

    /// The operation requires a signed-in user and there is none.
    NoUser,

    /// The operation is not available in this configuration, e.g. federated
    /// sign-in without a configured handoff URL.
    Unavailable(String),
}

impl IdentityError {
    pub fn provider(code: impl Into<String>) -> Self {
        let code = code.into();
        let message = code.clone();
        IdentityError::Provider { code, message }
    }
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::Network(msg) => write!(f, "identity provider unreachable: {msg}"),
            IdentityError::Provider { code, message } => {
                if code == message {
                    write!(f, "identity provider rejected the request: {code}")
                } else {
                    write!(f, "identity provider rejected the request: {code} ({message})")
                }
            }
            IdentityError::NoUser => write!(f, "no signed-in user"),
            IdentityError::Unavailable(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for IdentityError {}

/// Contract between the client and its identity provider.
///
/// All methods are asynchronous and fallible. Implementations own the
/// current-user state and broadcast an [`AuthEvent`] whenever it is replaced:
/// sign-in, sign-out, and any change to token eligibility (including a
/// reloaded verification flag).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Subscribes to change notifications. The receiver only sees events
    /// sent after this call; callers seed themselves from
    /// [`IdentityProvider::current_user`].
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    /// Snapshot of the currently signed-in user, if any.
    async fn current_user(&self) -> Option<AuthUser>;

    /// Mints a bearer token for the current user. With `force_refresh` the
    /// provider must not serve a cached token; stale tokens get
    /// authenticated calls rejected downstream.
    async fn fresh_id_token(&self, force_refresh: bool) -> Result<String, IdentityError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthUser, IdentityError>;

    async fn sign_up_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthUser, IdentityError>;

    /// Begins a federated sign-in. The returned handoff URL is opened out of
    /// process; the resulting session is adopted later through
    /// [`IdentityProvider::complete_redirect_sign_in`].
    async fn sign_in_with_federated_redirect(&self) -> Result<FederatedRedirect, IdentityError>;

    /// Resolves a sign-in that was started out of process, if one is
    /// pending. Returns `Ok(None)` when there is nothing to complete.
    async fn complete_redirect_sign_in(&self) -> Result<Option<AuthUser>, IdentityError>;

    /// Sends a verification email to the current user.
    async fn send_verification_email(&self) -> Result<(), IdentityError>;

    /// Re-fetches the current user's account record (notably the
    /// verification flag) and broadcasts the refreshed snapshot.
    async fn reload_user(&self) -> Result<AuthUser, IdentityError>;

    async fn sign_out(&self) -> Result<(), IdentityError>;
}
