//! Route gating.
//!
//! Every provider-kind check the surfaces used to scatter across their route
//! guards lives in [`decide`]. The function is pure and total and is
//! re-evaluated on every navigation and on every session change; caching its
//! result would leak access through a stale session.

use crate::core::session::Session;

/// The navigation targets the client distinguishes for gating purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// The chat surface; requires a signed-in (and, for password users,
    /// verified) account.
    Chat,
    /// The sign-in/sign-up surface; only for signed-out visitors.
    Login,
    /// The email-verification surface.
    Verify,
}

impl RouteKind {
    fn requires_auth(self) -> bool {
        matches!(self, RouteKind::Chat)
    }

    fn public_only(self) -> bool {
        matches!(self, RouteKind::Login)
    }
}

/// The navigation-gating outcome computed from session + requested route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    ShowLoading,
    RedirectToLogin,
    RedirectToVerify,
    RedirectToHome,
    Allow,
}

/// Decides whether `route` may be entered under `session`.
///
/// `carried_verification_hint` reports whether the caller arrived at the
/// verification route with state handed over from a prior navigation (the
/// address being verified); without either a user or that hint the
/// verification surface has nothing to show.
///
/// Verification is only ever enforced for password-credential users; a
/// federated user is never redirected to verification regardless of the
/// provider's own flag.
pub fn decide(
    session: &Session,
    route: RouteKind,
    carried_verification_hint: bool,
) -> AccessDecision {
    if session.loading {
        return AccessDecision::ShowLoading;
    }

    let signed_in = session.user.is_some();
    let unverified_password_user =
        signed_in && session.has_password_provider() && !session.is_email_verified();

    if route.requires_auth() {
        if !signed_in {
            return AccessDecision::RedirectToLogin;
        }
        if unverified_password_user {
            return AccessDecision::RedirectToVerify;
        }
    }

    if route.public_only() && signed_in {
        if unverified_password_user {
            return AccessDecision::RedirectToVerify;
        }
        return AccessDecision::RedirectToHome;
    }

    if route == RouteKind::Verify {
        if !signed_in && !carried_verification_hint {
            return AccessDecision::RedirectToLogin;
        }
        if signed_in && session.has_password_provider() && session.is_email_verified() {
            return AccessDecision::RedirectToHome;
        }
    }

    AccessDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ProviderKind;
    use crate::utils::test_utils::test_user;

    fn session(user: Option<crate::auth::AuthUser>) -> Session {
        Session::settled(user)
    }

    fn password_user(verified: bool) -> crate::auth::AuthUser {
        test_user("uid-pw", verified, &[ProviderKind::Password])
    }

    fn federated_user(verified: bool) -> crate::auth::AuthUser {
        test_user("uid-fed", verified, &[ProviderKind::Federated])
    }

    #[test]
    fn loading_wins_over_everything() {
        let loading = Session::loading();
        for route in [RouteKind::Chat, RouteKind::Login, RouteKind::Verify] {
            assert_eq!(decide(&loading, route, false), AccessDecision::ShowLoading);
            assert_eq!(decide(&loading, route, true), AccessDecision::ShowLoading);
        }
    }

    #[test]
    fn chat_requires_a_signed_in_user() {
        assert_eq!(
            decide(&session(None), RouteKind::Chat, false),
            AccessDecision::RedirectToLogin
        );
    }

    #[test]
    fn unverified_password_users_are_sent_to_verification() {
        assert_eq!(
            decide(&session(Some(password_user(false))), RouteKind::Chat, false),
            AccessDecision::RedirectToVerify
        );
    }

    #[test]
    fn verified_password_users_reach_chat() {
        assert_eq!(
            decide(&session(Some(password_user(true))), RouteKind::Chat, false),
            AccessDecision::Allow
        );
    }

    #[test]
    fn federated_users_are_never_sent_to_verification() {
        for verified in [true, false] {
            for route in [RouteKind::Chat, RouteKind::Login, RouteKind::Verify] {
                for hint in [true, false] {
                    let decision =
                        decide(&session(Some(federated_user(verified))), route, hint);
                    assert_ne!(decision, AccessDecision::RedirectToVerify);
                }
            }
        }
    }

    #[test]
    fn signed_in_users_skip_the_login_surface() {
        assert_eq!(
            decide(&session(Some(federated_user(false))), RouteKind::Login, false),
            AccessDecision::RedirectToHome
        );
        assert_eq!(
            decide(&session(Some(password_user(false))), RouteKind::Login, false),
            AccessDecision::RedirectToVerify
        );
    }

    #[test]
    fn verification_route_needs_a_user_or_a_hint() {
        assert_eq!(
            decide(&session(None), RouteKind::Verify, false),
            AccessDecision::RedirectToLogin
        );
        assert_eq!(
            decide(&session(None), RouteKind::Verify, true),
            AccessDecision::Allow
        );
    }

    #[test]
    fn already_verified_password_users_leave_the_verification_route() {
        assert_eq!(
            decide(&session(Some(password_user(true))), RouteKind::Verify, false),
            AccessDecision::RedirectToHome
        );
        assert_eq!(
            decide(&session(Some(password_user(false))), RouteKind::Verify, false),
            AccessDecision::Allow
        );
    }

    #[test]
    fn decisions_are_deterministic() {
        let cases = [
            (session(None), RouteKind::Chat),
            (session(Some(password_user(false))), RouteKind::Chat),
            (session(Some(federated_user(true))), RouteKind::Login),
            (Session::loading(), RouteKind::Verify),
        ];
        for (session, route) in &cases {
            assert_eq!(
                decide(session, *route, false),
                decide(session, *route, false)
            );
        }
    }
}
