//! Email verification flow.
//!
//! Gates resend-verification-email actions behind a cooldown and polls the
//! identity provider for the verification flag. The cooldown ticker is a
//! background task cancelled when the flow is dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::ChatBackend;
use crate::auth::{IdentityError, IdentityProvider};
use crate::core::client::ClientError;

/// Window imposed after a resend before another one is allowed.
pub const RESEND_COOLDOWN_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationState {
    Unverified,
    Checking,
    Verified,
}

#[derive(Debug)]
pub enum VerificationError {
    /// A resend was attempted while the cooldown is still running.
    CooldownActive(u64),

    /// The service rate-limited the resend; a cooldown has been imposed
    /// anyway so the provider is not hammered.
    RateLimited,

    /// The resend failed for another reason; no cooldown, retry freely.
    Resend(ClientError),

    /// The verification status could not be refreshed.
    Check(IdentityError),
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationError::CooldownActive(remaining) => {
                write!(f, "wait {remaining}s before requesting another email")
            }
            VerificationError::RateLimited => {
                write!(f, "too many requests; try again once the cooldown ends")
            }
            VerificationError::Resend(err) => {
                write!(f, "failed to send verification email: {err}")
            }
            VerificationError::Check(err) => write!(f, "failed to refresh status: {err}"),
        }
    }
}

impl std::error::Error for VerificationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VerificationError::Resend(err) => Some(err),
            VerificationError::Check(err) => Some(err),
            _ => None,
        }
    }
}

pub struct VerificationFlow {
    identity: Arc<dyn IdentityProvider>,
    backend: Arc<dyn ChatBackend>,
    state: VerificationState,
    cooldown: Arc<AtomicU64>,
    ticker: Option<CancellationToken>,
}

impl VerificationFlow {
    pub fn new(identity: Arc<dyn IdentityProvider>, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            identity,
            backend,
            state: VerificationState::Unverified,
            cooldown: Arc::new(AtomicU64::new(0)),
            ticker: None,
        }
    }

    pub fn state(&self) -> VerificationState {
        self.state
    }

    /// Seconds until the next resend is allowed.
    pub fn cooldown(&self) -> u64 {
        self.cooldown.load(Ordering::Relaxed)
    }

    /// Requests another verification email. Rejected while the cooldown is
    /// running; a rate-limited response imposes the cooldown as well.
    pub async fn resend(&mut self) -> Result<(), VerificationError> {
        let remaining = self.cooldown();
        if remaining > 0 {
            return Err(VerificationError::CooldownActive(remaining));
        }
        match self.backend.resend_verification().await {
            Ok(()) => {
                self.begin_cooldown();
                Ok(())
            }
            Err(err) if err.is_rate_limited() => {
                self.begin_cooldown();
                Err(VerificationError::RateLimited)
            }
            Err(err) => Err(VerificationError::Resend(err)),
        }
    }

    /// Reloads the verification flag from the identity provider. Returns
    /// whether the email is now verified; the caller navigates away on
    /// `true` (the access policy stops redirecting here once the session
    /// reflects the reload).
    pub async fn check_now(&mut self) -> Result<bool, VerificationError> {
        self.state = VerificationState::Checking;
        match self.identity.reload_user().await {
            Ok(user) if user.email_verified => {
                self.state = VerificationState::Verified;
                Ok(true)
            }
            Ok(_) => {
                self.state = VerificationState::Unverified;
                Ok(false)
            }
            Err(err) => {
                self.state = VerificationState::Unverified;
                Err(VerificationError::Check(err))
            }
        }
    }

    fn begin_cooldown(&mut self) {
        if let Some(old) = self.ticker.take() {
            old.cancel();
        }
        self.cooldown
            .store(RESEND_COOLDOWN_SECS, Ordering::Relaxed);

        let cancel = CancellationToken::new();
        self.ticker = Some(cancel.clone());
        let cooldown = Arc::clone(&self.cooldown);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            // The first tick completes immediately; skip it so the counter
            // holds its starting value for a full second.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let remaining = cooldown.load(Ordering::Relaxed);
                        if remaining == 0 {
                            break;
                        }
                        cooldown.store(remaining - 1, Ordering::Relaxed);
                        if remaining == 1 {
                            break;
                        }
                    }
                }
            }
        });
    }
}

impl Drop for VerificationFlow {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ProviderKind;
    use crate::utils::test_utils::{test_user, MockIdentityProvider, ScriptedBackend};

    fn flow(
        identity: Arc<MockIdentityProvider>,
        backend: Arc<ScriptedBackend>,
    ) -> VerificationFlow {
        VerificationFlow::new(identity, backend)
    }

    #[tokio::test]
    async fn successful_resend_starts_the_cooldown() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_resend(Ok(()));
        let mut flow = flow(Arc::new(MockIdentityProvider::new()), backend);

        flow.resend().await.unwrap();
        assert_eq!(flow.cooldown(), RESEND_COOLDOWN_SECS);
    }

    #[tokio::test]
    async fn resend_is_rejected_while_the_cooldown_runs() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_resend(Ok(()));
        let mut flow = flow(Arc::new(MockIdentityProvider::new()), backend.clone());

        flow.resend().await.unwrap();
        match flow.resend().await {
            Err(VerificationError::CooldownActive(remaining)) => {
                assert!(remaining > 0);
            }
            other => panic!("expected cooldown rejection, got {other:?}"),
        }
        // Only the first attempt reached the service.
        assert_eq!(backend.calls(), vec!["resend"]);
    }

    #[tokio::test]
    async fn rate_limited_resend_still_imposes_the_cooldown() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_resend(Err(ClientError::Rejected {
            status: 429,
            message: "slow down".to_string(),
        }));
        let mut flow = flow(Arc::new(MockIdentityProvider::new()), backend);

        match flow.resend().await {
            Err(VerificationError::RateLimited) => {}
            other => panic!("expected rate-limit error, got {other:?}"),
        }
        assert_eq!(flow.cooldown(), RESEND_COOLDOWN_SECS);
    }

    #[tokio::test]
    async fn other_resend_failures_do_not_impose_a_cooldown() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_resend(Err(ClientError::Network("offline".to_string())));
        backend.push_resend(Ok(()));
        let mut flow = flow(Arc::new(MockIdentityProvider::new()), backend);

        assert!(matches!(
            flow.resend().await,
            Err(VerificationError::Resend(_))
        ));
        assert_eq!(flow.cooldown(), 0);
        // Retryable immediately.
        flow.resend().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn the_cooldown_ticks_down_to_zero_and_stops() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_resend(Ok(()));
        let mut flow = flow(Arc::new(MockIdentityProvider::new()), backend);

        flow.resend().await.unwrap();
        assert_eq!(flow.cooldown(), RESEND_COOLDOWN_SECS);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let halfway = flow.cooldown();
        assert!(halfway > 0 && halfway < RESEND_COOLDOWN_SECS);

        tokio::time::sleep(Duration::from_secs(RESEND_COOLDOWN_SECS)).await;
        assert_eq!(flow.cooldown(), 0);
    }

    #[tokio::test]
    async fn check_now_reports_a_verified_email() {
        let identity = Arc::new(MockIdentityProvider::new());
        identity
            .set_reload_result(Ok(test_user("uid", true, &[ProviderKind::Password])))
            .await;
        let mut flow = flow(identity, Arc::new(ScriptedBackend::new()));

        assert!(flow.check_now().await.unwrap());
        assert_eq!(flow.state(), VerificationState::Verified);
    }

    #[tokio::test]
    async fn check_now_returns_to_unverified_when_the_flag_is_still_off() {
        let identity = Arc::new(MockIdentityProvider::new());
        identity
            .set_reload_result(Ok(test_user("uid", false, &[ProviderKind::Password])))
            .await;
        let mut flow = flow(identity, Arc::new(ScriptedBackend::new()));

        assert!(!flow.check_now().await.unwrap());
        assert_eq!(flow.state(), VerificationState::Unverified);
    }

    #[tokio::test]
    async fn check_failures_leave_the_flow_unverified() {
        let identity = Arc::new(MockIdentityProvider::new());
        identity
            .set_reload_result(Err(IdentityError::Network("offline".to_string())))
            .await;
        let mut flow = flow(identity, Arc::new(ScriptedBackend::new()));

        assert!(matches!(
            flow.check_now().await,
            Err(VerificationError::Check(_))
        ));
        assert_eq!(flow.state(), VerificationState::Unverified);
    }
}
