//! Route guard: decides whether a protected view may render.

use crate::principal::PrincipalKind;
use crate::session::SessionState;

/// Anonymous entry point.
pub const LOGIN_PATH: &str = "/login";
/// Neutral landing page for principals of the wrong kind.
pub const LANDING_PATH: &str = "/";
/// Where administrators land after signing in.
pub const ADMIN_HOME_PATH: &str = "/admin/dashboard";

/// Principal kind a route demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredKind {
    /// Any authenticated principal.
    Any,
    Donor,
    Admin,
}

impl RequiredKind {
    fn admits(self, kind: PrincipalKind) -> bool {
        match self {
            Self::Any => true,
            Self::Donor => kind == PrincipalKind::Donor,
            Self::Admin => kind == PrincipalKind::Admin,
        }
    }
}

impl From<PrincipalKind> for RequiredKind {
    fn from(kind: PrincipalKind) -> Self {
        match kind {
            PrincipalKind::Donor => Self::Donor,
            PrincipalKind::Admin => Self::Admin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session still booting: show a blocking placeholder, decide later.
    Pending,
    Render,
    /// Send the visitor to [`LOGIN_PATH`], remembering where they were going.
    RedirectToLogin { return_to: String },
    /// Authenticated, but as the wrong kind of principal.
    RedirectToLanding,
}

impl GuardDecision {
    /// Path to navigate to, for the two redirect outcomes.
    pub fn redirect_path(&self) -> Option<&'static str> {
        match self {
            Self::RedirectToLogin { .. } => Some(LOGIN_PATH),
            Self::RedirectToLanding => Some(LANDING_PATH),
            Self::Pending | Self::Render => None,
        }
    }
}

/// Gate `location` on the current session.
pub fn decide(state: &SessionState, required: RequiredKind, location: &str) -> GuardDecision {
    let kind = match state {
        SessionState::Booting => return GuardDecision::Pending,
        SessionState::Anonymous => {
            return GuardDecision::RedirectToLogin {
                return_to: location.to_string(),
            }
        }
        SessionState::AuthenticatedDonor(_) => PrincipalKind::Donor,
        SessionState::AuthenticatedAdmin(_) => PrincipalKind::Admin,
    };

    if required.admits(kind) {
        GuardDecision::Render
    } else {
        GuardDecision::RedirectToLanding
    }
}

/// Where to go once a login succeeds. Donors resume the location they were
/// bounced from; administrators always land on their dashboard.
pub fn post_login_target(kind: PrincipalKind, return_to: Option<&str>) -> String {
    match kind {
        PrincipalKind::Admin => ADMIN_HOME_PATH.to_string(),
        PrincipalKind::Donor => match return_to {
            Some(path) if is_local_path(path) && path != LOGIN_PATH => path.to_string(),
            _ => LANDING_PATH.to_string(),
        },
    }
}

/// Same-origin absolute path (rejects `//host` and full URLs).
fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::{Administrator, Donor};
    use chrono::Utc;

    const ALL: [RequiredKind; 3] = [RequiredKind::Any, RequiredKind::Donor, RequiredKind::Admin];

    fn donor_state() -> SessionState {
        SessionState::AuthenticatedDonor(Donor {
            id: 2,
            username: "bo".into(),
            age: 50,
            created_at: Utc::now(),
            updated_at: None,
        })
    }

    fn admin_state() -> SessionState {
        SessionState::AuthenticatedAdmin(Administrator {
            id: 1,
            username: "admin".into(),
            created_at: Utc::now(),
            updated_at: None,
        })
    }

    #[test]
    fn booting_never_redirects() {
        for required in ALL {
            let decision = decide(&SessionState::Booting, required, "/admin/users");
            assert_eq!(decision, GuardDecision::Pending);
            assert_eq!(decision.redirect_path(), None);
        }
    }

    #[test]
    fn anonymous_goes_to_login_remembering_origin() {
        for required in ALL {
            assert_eq!(
                decide(&SessionState::Anonymous, required, "/donate"),
                GuardDecision::RedirectToLogin {
                    return_to: "/donate".into()
                }
            );
        }
    }

    #[test]
    fn donor_on_admin_route_goes_to_landing() {
        let decision = decide(&donor_state(), RequiredKind::Admin, "/admin/dashboard");
        assert_eq!(decision, GuardDecision::RedirectToLanding);
        assert_eq!(decision.redirect_path(), Some(LANDING_PATH));
    }

    #[test]
    fn admin_on_donor_route_goes_to_landing() {
        assert_eq!(
            decide(&admin_state(), RequiredKind::Donor, "/profile"),
            GuardDecision::RedirectToLanding
        );
    }

    #[test]
    fn matching_kind_renders() {
        assert_eq!(decide(&donor_state(), RequiredKind::Donor, "/profile"), GuardDecision::Render);
        assert_eq!(decide(&admin_state(), RequiredKind::Admin, "/admin"), GuardDecision::Render);
        assert_eq!(decide(&donor_state(), RequiredKind::Any, "/x"), GuardDecision::Render);
        assert_eq!(decide(&admin_state(), RequiredKind::Any, "/x"), GuardDecision::Render);
    }

    #[test]
    fn post_login_targets() {
        assert_eq!(post_login_target(PrincipalKind::Donor, Some("/donate")), "/donate");
        assert_eq!(post_login_target(PrincipalKind::Donor, None), "/");
        assert_eq!(post_login_target(PrincipalKind::Donor, Some("/login")), "/");
        assert_eq!(
            post_login_target(PrincipalKind::Donor, Some("https://evil.example")),
            "/"
        );
        assert_eq!(post_login_target(PrincipalKind::Donor, Some("//evil.example")), "/");
        assert_eq!(
            post_login_target(PrincipalKind::Admin, Some("/donate")),
            ADMIN_HOME_PATH
        );
    }
}
