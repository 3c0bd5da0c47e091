//! Shared fixtures for unit tests: a scriptable identity provider and a
//! scriptable chat backend.

#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(test)]
use std::sync::Mutex;

#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use tokio::sync::broadcast;

#[cfg(test)]
use crate::api::{ChatBackend, ChatReply, ConversationDetail, ConversationSummary};
#[cfg(test)]
use crate::auth::{
    AuthEvent, AuthUser, FederatedRedirect, IdentityError, IdentityProvider, ProviderKind,
};
#[cfg(test)]
use crate::core::client::ClientError;

#[cfg(test)]
pub fn test_user(uid: &str, email_verified: bool, providers: &[ProviderKind]) -> AuthUser {
    AuthUser {
        uid: uid.to_string(),
        email: Some(format!("{uid}@example.com")),
        email_verified,
        providers: providers.to_vec(),
    }
}

/// Identity provider whose answers are set by the test.
#[cfg(test)]
pub struct MockIdentityProvider {
    user: Mutex<Option<AuthUser>>,
    redirect: Mutex<Option<Result<Option<AuthUser>, IdentityError>>>,
    reload: Mutex<Option<Result<AuthUser, IdentityError>>>,
    fail_tokens: AtomicBool,
    last_fetch_forced: AtomicBool,
    events: broadcast::Sender<AuthEvent>,
}

#[cfg(test)]
impl MockIdentityProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            user: Mutex::new(None),
            redirect: Mutex::new(None),
            reload: Mutex::new(None),
            fail_tokens: AtomicBool::new(false),
            last_fetch_forced: AtomicBool::new(false),
            events,
        }
    }

    pub async fn set_user(&self, user: Option<AuthUser>) {
        *self.user.lock().unwrap() = user;
    }

    pub async fn set_redirect_result(&self, result: Result<Option<AuthUser>, IdentityError>) {
        *self.redirect.lock().unwrap() = Some(result);
    }

    pub async fn set_reload_result(&self, result: Result<AuthUser, IdentityError>) {
        *self.reload.lock().unwrap() = Some(result);
    }

    pub fn fail_token_fetches(&self) {
        self.fail_tokens.store(true, Ordering::Relaxed);
    }

    pub fn last_token_fetch_was_forced(&self) -> bool {
        self.last_fetch_forced.load(Ordering::Relaxed)
    }

    pub async fn emit_signed_in(&self, user: AuthUser) {
        *self.user.lock().unwrap() = Some(user.clone());
        let _ = self.events.send(AuthEvent::SignedIn(user));
    }

    pub fn emit_signed_out(&self) {
        *self.user.lock().unwrap() = None;
        let _ = self.events.send(AuthEvent::SignedOut);
    }
}

#[cfg(test)]
#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn current_user(&self) -> Option<AuthUser> {
        self.user.lock().unwrap().clone()
    }

    async fn fresh_id_token(&self, force_refresh: bool) -> Result<String, IdentityError> {
        self.last_fetch_forced.store(force_refresh, Ordering::Relaxed);
        if self.fail_tokens.load(Ordering::Relaxed) {
            return Err(IdentityError::provider("TOKEN_EXPIRED"));
        }
        if self.user.lock().unwrap().is_none() {
            return Err(IdentityError::NoUser);
        }
        Ok("fresh-token".to_string())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        _password: &str,
    ) -> Result<AuthUser, IdentityError> {
        let user = AuthUser {
            uid: "mock-uid".to_string(),
            email: Some(email.to_string()),
            email_verified: true,
            providers: vec![ProviderKind::Password],
        };
        self.emit_signed_in(user.clone()).await;
        Ok(user)
    }

    async fn sign_up_with_password(
        &self,
        email: &str,
        _password: &str,
    ) -> Result<AuthUser, IdentityError> {
        let user = AuthUser {
            uid: "mock-uid".to_string(),
            email: Some(email.to_string()),
            email_verified: false,
            providers: vec![ProviderKind::Password],
        };
        self.emit_signed_in(user.clone()).await;
        Ok(user)
    }

    async fn sign_in_with_federated_redirect(&self) -> Result<FederatedRedirect, IdentityError> {
        Ok(FederatedRedirect {
            auth_url: "https://auth.invalid/handoff".to_string(),
        })
    }

    async fn complete_redirect_sign_in(&self) -> Result<Option<AuthUser>, IdentityError> {
        let scripted = self.redirect.lock().unwrap().take();
        match scripted {
            Some(Ok(Some(user))) => {
                *self.user.lock().unwrap() = Some(user.clone());
                Ok(Some(user))
            }
            Some(other) => other,
            None => Ok(None),
        }
    }

    async fn send_verification_email(&self) -> Result<(), IdentityError> {
        if self.user.lock().unwrap().is_none() {
            return Err(IdentityError::NoUser);
        }
        Ok(())
    }

    async fn reload_user(&self) -> Result<AuthUser, IdentityError> {
        match self.reload.lock().unwrap().take() {
            Some(result) => result,
            None => self
                .user
                .lock()
                .unwrap()
                .clone()
                .ok_or(IdentityError::NoUser),
        }
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.emit_signed_out();
        Ok(())
    }
}

/// Chat backend that answers from per-route queues. Unscripted calls fail
/// with a transport error so a test cannot silently depend on a route it
/// never arranged.
#[cfg(test)]
pub struct ScriptedBackend {
    list: Mutex<VecDeque<Result<Vec<ConversationSummary>, ClientError>>>,
    fetch: Mutex<VecDeque<Result<ConversationDetail, ClientError>>>,
    delete: Mutex<VecDeque<Result<(), ClientError>>>,
    chat: Mutex<VecDeque<Result<ChatReply, ClientError>>>,
    resend: Mutex<VecDeque<Result<(), ClientError>>>,
    calls: Mutex<Vec<String>>,
}

#[cfg(test)]
impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            list: Mutex::new(VecDeque::new()),
            fetch: Mutex::new(VecDeque::new()),
            delete: Mutex::new(VecDeque::new()),
            chat: Mutex::new(VecDeque::new()),
            resend: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_list(&self, result: Result<Vec<ConversationSummary>, ClientError>) {
        self.list.lock().unwrap().push_back(result);
    }

    pub fn push_fetch(&self, result: Result<ConversationDetail, ClientError>) {
        self.fetch.lock().unwrap().push_back(result);
    }

    pub fn push_delete(&self, result: Result<(), ClientError>) {
        self.delete.lock().unwrap().push_back(result);
    }

    pub fn push_chat(&self, result: Result<ChatReply, ClientError>) {
        self.chat.lock().unwrap().push_back(result);
    }

    pub fn push_resend(&self, result: Result<(), ClientError>) {
        self.resend.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn unscripted<T>() -> Result<T, ClientError> {
        Err(ClientError::Network("unscripted call".to_string()))
    }
}

#[cfg(test)]
#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        self.record("list".to_string());
        self.list
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Self::unscripted)
    }

    async fn fetch_conversation(&self, id: &str) -> Result<ConversationDetail, ClientError> {
        self.record(format!("fetch:{id}"));
        self.fetch
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Self::unscripted)
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ClientError> {
        self.record(format!("delete:{id}"));
        self.delete
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Self::unscripted)
    }

    async fn send_chat(
        &self,
        prompt: &str,
        _conversation_id: Option<&str>,
    ) -> Result<ChatReply, ClientError> {
        self.record(format!("chat:{prompt}"));
        self.chat
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Self::unscripted)
    }

    async fn resend_verification(&self) -> Result<(), ClientError> {
        self.record("resend".to_string());
        self.resend
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Self::unscripted)
    }
}
