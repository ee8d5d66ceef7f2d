//! Role gate for protected surfaces.
//!
//! A [`Gate`] walks `Unknown -> Checking -> Authorized | Denied` each time a
//! protected surface mounts. Nothing is cached between mounts, and every
//! resolution error settles as `Denied`.

use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;

use crate::auth::{AuthGateway, Session};
use crate::error::AuthError;
use crate::http;
use crate::types::{Collection, Role};

/// Protected areas of the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    PastorDashboard,
    FinanceDashboard,
    MediaDashboard,
    AdminDashboard,
    /// Announcements and events management.
    Content,
    UserManagement,
}

impl Surface {
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "pastor" => Some(Surface::PastorDashboard),
            "finance" => Some(Surface::FinanceDashboard),
            "media" => Some(Surface::MediaDashboard),
            "admin" => Some(Surface::AdminDashboard),
            "content" => Some(Surface::Content),
            "users" => Some(Surface::UserManagement),
            _ => None,
        }
    }

    /// Roles admitted besides superadmin.
    fn roles(&self) -> &'static [Role] {
        match self {
            Surface::PastorDashboard => &[Role::Pastor],
            Surface::FinanceDashboard => &[Role::Finance],
            Surface::MediaDashboard => &[Role::Media],
            Surface::AdminDashboard => &[Role::Admin],
            Surface::Content => &[Role::Pastor, Role::Media, Role::Admin],
            Surface::UserManagement => &[],
        }
    }

    pub fn permits(&self, role: Role) -> bool {
        role == Role::Superadmin || self.roles().contains(&role)
    }
}

/// Surface a reader must pass to see `collection` at all. `None` for public
/// collections.
pub fn read_surface(collection: Collection) -> Option<Surface> {
    match collection {
        Collection::Announcements | Collection::Events => None,
        Collection::Finances => Some(Surface::FinanceDashboard),
        Collection::Users => Some(Surface::UserManagement),
    }
}

/// Surface that manages `collection`, archived records included.
pub fn manage_surface(collection: Collection) -> Surface {
    match collection {
        Collection::Announcements | Collection::Events => Surface::Content,
        Collection::Finances => Surface::FinanceDashboard,
        Collection::Users => Surface::UserManagement,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    NoSession,
    Forbidden,
    Unresolved,
}

impl Denial {
    pub fn redirect(&self) -> &'static str {
        match self {
            Denial::Forbidden => "/unauthorized",
            Denial::NoSession | Denial::Unresolved => "/login",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Denial::Forbidden => StatusCode::FORBIDDEN,
            Denial::NoSession | Denial::Unresolved => StatusCode::UNAUTHORIZED,
        }
    }
}

#[derive(Debug, Clone)]
pub enum GuardState {
    Unknown,
    Checking,
    Authorized(Session),
    Denied(Denial),
}

impl GuardState {
    pub fn is_authorized(&self) -> bool {
        matches!(self, GuardState::Authorized(_))
    }
}

pub struct Gate {
    surface: Surface,
    state: GuardState,
}

impl Gate {
    pub fn new(surface: Surface) -> Self {
        Self {
            surface,
            state: GuardState::Unknown,
        }
    }

    pub fn state(&self) -> &GuardState {
        &self.state
    }

    /// Starts a fresh check, discarding any earlier outcome.
    pub fn mount(&mut self) {
        self.state = GuardState::Checking;
    }

    /// Applies the session lookup. Ignored unless a check is in progress.
    pub fn settle(&mut self, resolved: Result<Option<Session>, AuthError>) -> &GuardState {
        if !matches!(self.state, GuardState::Checking) {
            return &self.state;
        }

        self.state = match resolved {
            Ok(Some(session)) if self.surface.permits(session.role) => GuardState::Authorized(session),
            Ok(Some(session)) => {
                tracing::info!(
                    uid = %session.identity.user_id,
                    role = %session.role,
                    surface = ?self.surface,
                    "access denied"
                );
                GuardState::Denied(Denial::Forbidden)
            }
            Ok(None) => GuardState::Denied(Denial::NoSession),
            Err(e) => {
                tracing::warn!(surface = ?self.surface, error = %e, "session resolution failed; denying");
                GuardState::Denied(Denial::Unresolved)
            }
        };
        &self.state
    }
}

/// Runs a full check for one request.
pub async fn check(auth: &AuthGateway, surface: Surface, access_token: Option<&str>) -> GuardState {
    let mut gate = Gate::new(surface);
    gate.mount();
    let resolved = match access_token {
        Some(token) => auth.resolve(token).await,
        None => Ok(None),
    };
    gate.settle(resolved).clone()
}

pub fn denial_response(denial: Denial) -> Response<Body> {
    let message = match denial {
        Denial::NoSession => "Sign in required",
        Denial::Forbidden => "You do not have access to this page",
        Denial::Unresolved => "Could not verify your session",
    };
    http::respond(
        denial.status(),
        serde_json::json!({ "error": message, "redirect": denial.redirect() })
            .to_string()
            .into(),
    )
}

/// Resolves the session for a protected endpoint, or the response to send.
pub async fn authorize(
    auth: &AuthGateway,
    surface: Surface,
    access_token: Option<&str>,
) -> Result<Session, Response<Body>> {
    match check(auth, surface, access_token).await {
        GuardState::Authorized(session) => Ok(session),
        GuardState::Denied(denial) => Err(denial_response(denial)),
        // `check` always settles.
        GuardState::Unknown | GuardState::Checking => Err(denial_response(Denial::Unresolved)),
    }
}

/// GET /guard/{surface}
pub async fn guard_status(
    auth: &AuthGateway,
    slug: &str,
    access_token: Option<&str>,
) -> Result<Response<Body>, Error> {
    let Some(surface) = Surface::from_slug(slug) else {
        return Ok(http::not_found());
    };
    match authorize(auth, surface, access_token).await {
        Ok(session) => http::json(
            StatusCode::OK,
            &serde_json::json!({ "state": "authorized", "surface": surface, "user": session }),
        ),
        Err(resp) => Ok(resp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::error::StoreError;
    use crate::testing::Harness;

    fn session(role: Role) -> Session {
        Session {
            identity: Identity {
                user_id: "u".into(),
                email: "u@gimong.test".into(),
            },
            role,
        }
    }

    const SURFACES: [Surface; 6] = [
        Surface::PastorDashboard,
        Surface::FinanceDashboard,
        Surface::MediaDashboard,
        Surface::AdminDashboard,
        Surface::Content,
        Surface::UserManagement,
    ];

    #[test]
    fn test_roles_outside_allowed_set_are_denied() {
        for surface in SURFACES {
            for role in Role::ALL {
                let mut gate = Gate::new(surface);
                gate.mount();
                let state = gate.settle(Ok(Some(session(role))));
                if surface.permits(role) {
                    assert!(state.is_authorized(), "{:?} should admit {:?}", surface, role);
                } else {
                    assert!(
                        matches!(state, GuardState::Denied(Denial::Forbidden)),
                        "{:?} should reject {:?}",
                        surface,
                        role
                    );
                }
            }
        }
    }

    #[test]
    fn test_superadmin_everywhere_finance_only_on_finance() {
        for surface in SURFACES {
            assert!(surface.permits(Role::Superadmin));
        }
        assert!(Surface::FinanceDashboard.permits(Role::Finance));
        assert!(!Surface::PastorDashboard.permits(Role::Finance));
        assert!(!Surface::UserManagement.permits(Role::Admin));
    }

    #[test]
    fn test_collection_policy() {
        assert_eq!(read_surface(Collection::Events), None);
        assert_eq!(read_surface(Collection::Finances), Some(Surface::FinanceDashboard));
        assert!(manage_surface(Collection::Announcements).permits(Role::Media));
        assert!(!manage_surface(Collection::Users).permits(Role::Pastor));
    }

    #[test]
    fn test_resolution_errors_fail_closed() {
        for err in [
            AuthError::Provider("timeout".into()),
            AuthError::RoleNotFound("u".into()),
            AuthError::Store(StoreError::read("users", "unreachable")),
        ] {
            let mut gate = Gate::new(Surface::Content);
            gate.mount();
            assert!(matches!(gate.settle(Err(err)), GuardState::Denied(Denial::Unresolved)));
        }
    }

    #[test]
    fn test_no_session_redirects_to_login() {
        let mut gate = Gate::new(Surface::PastorDashboard);
        assert!(matches!(gate.state(), GuardState::Unknown));
        gate.mount();
        assert!(matches!(gate.state(), GuardState::Checking));

        let state = gate.settle(Ok(None)).clone();
        let GuardState::Denied(denial) = state else {
            panic!("expected denial");
        };
        assert_eq!(denial.redirect(), "/login");
        assert_eq!(denial.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Denial::Forbidden.redirect(), "/unauthorized");
    }

    #[test]
    fn test_settle_requires_mount_and_remount_rechecks() {
        let mut gate = Gate::new(Surface::PastorDashboard);
        assert!(matches!(gate.settle(Ok(Some(session(Role::Pastor)))), GuardState::Unknown));

        gate.mount();
        assert!(gate.settle(Ok(Some(session(Role::Pastor)))).is_authorized());

        // The role changed between navigations.
        gate.mount();
        assert!(matches!(
            gate.settle(Ok(Some(session(Role::Media)))),
            GuardState::Denied(Denial::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_check_against_registry() {
        let harness = Harness::new();
        let pastor = harness.user("p1", Role::Pastor).await;

        let state = check(&harness.auth, Surface::PastorDashboard, Some(&pastor)).await;
        assert!(state.is_authorized());

        let state = check(&harness.auth, Surface::FinanceDashboard, Some(&pastor)).await;
        assert!(matches!(state, GuardState::Denied(Denial::Forbidden)));

        let state = check(&harness.auth, Surface::PastorDashboard, None).await;
        assert!(matches!(state, GuardState::Denied(Denial::NoSession)));

        // Token valid with the provider but the registry entry is gone.
        harness.auth.registry().remove("p1").await.unwrap();
        let state = check(&harness.auth, Surface::PastorDashboard, Some(&pastor)).await;
        assert!(matches!(state, GuardState::Denied(Denial::Unresolved)));
    }
}
