//! Authoritative session state.
//!
//! [`SessionStore`] folds the identity provider's change notifications into a
//! single [`Session`] value published over a watch channel. Each notification
//! replaces the snapshot wholesale; nothing mutates a session in place.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthEvent, AuthUser, IdentityProvider};

/// The authenticated-identity snapshot held by the client.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: Option<AuthUser>,
    pub loading: bool,
}

impl Session {
    /// State before the identity provider has reported anything.
    pub fn loading() -> Self {
        Self {
            user: None,
            loading: true,
        }
    }

    /// State after the provider has settled, signed in or not.
    pub fn settled(user: Option<AuthUser>) -> Self {
        Self {
            user,
            loading: false,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|user| user.uid.as_str())
    }

    pub fn email(&self) -> Option<&str> {
        self.user.as_ref().and_then(|user| user.email.as_deref())
    }

    pub fn has_password_provider(&self) -> bool {
        self.user
            .as_ref()
            .is_some_and(AuthUser::has_password_provider)
    }

    pub fn is_email_verified(&self) -> bool {
        self.user.as_ref().is_some_and(|user| user.email_verified)
    }
}

/// Owns the session snapshot and the listener task that keeps it current.
///
/// The listener first resolves any sign-in that was started out of process,
/// then mirrors provider notifications into the watch channel. The first
/// publication always clears `loading`, even when redirect resolution fails;
/// that failure is logged and the provider's own notification stream stays
/// authoritative. Dropping the store cancels the listener.
pub struct SessionStore {
    rx: watch::Receiver<Session>,
    cancel: CancellationToken,
}

impl SessionStore {
    pub fn start(provider: Arc<dyn IdentityProvider>) -> Self {
        let (tx, rx) = watch::channel(Session::loading());
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            // Subscribe before the initial snapshot so no notification can
            // slip between the two.
            let mut events = provider.subscribe();

            match provider.complete_redirect_sign_in().await {
                Ok(Some(user)) => {
                    let _ = tx.send(Session::settled(Some(user)));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!("redirect sign-in completion failed: {err}");
                }
            }
            let _ = tx.send(Session::settled(provider.current_user().await));

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(AuthEvent::SignedIn(user)) => {
                            let _ = tx.send(Session::settled(Some(user)));
                        }
                        Ok(AuthEvent::SignedOut) => {
                            let _ = tx.send(Session::settled(None));
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!("session listener lagged {skipped} events; resyncing");
                            let _ = tx.send(Session::settled(provider.current_user().await));
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Self { rx, cancel }
    }

    /// Current snapshot. Cheap; clones out of the watch slot.
    pub fn snapshot(&self) -> Session {
        self.rx.borrow().clone()
    }

    /// A receiver for consumers that want to react to session changes.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.rx.clone()
    }

    /// Waits until the initial loading state has cleared and returns the
    /// settled snapshot.
    pub async fn settled(&mut self) -> Session {
        loop {
            let session = self.rx.borrow().clone();
            if !session.loading {
                return session;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
