//! Session context, the client's authorization state machine.
//!
//! ```text
//!   Booting ──boot()──► AuthenticatedDonor | AuthenticatedAdmin | Anonymous
//!   Anonymous ◄──logout()── Authenticated*  ──login()──► Authenticated*
//! ```
//!
//! `Booting` is left exactly once and never re-entered. The context is the
//! sole owner of the [`CredentialStore`]; every store write happens together
//! with the state transition it implies, under one lock, so `login`/`logout`
//! always win over a boot verification that was still in flight.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;
use crate::errors::{PortalError, Result};
use crate::principal::{Administrator, Donor, Principal, PrincipalKind, UserType};
use crate::verifier::SessionVerifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Booting,
    Anonymous,
    AuthenticatedDonor(Donor),
    AuthenticatedAdmin(Administrator),
}

impl SessionState {
    pub fn loading(&self) -> bool {
        matches!(self, Self::Booting)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::AuthenticatedDonor(_) | Self::AuthenticatedAdmin(_))
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::AuthenticatedAdmin(_))
    }

    pub fn user_type(&self) -> UserType {
        match self {
            Self::AuthenticatedDonor(_) => UserType::Donor,
            Self::AuthenticatedAdmin(_) => UserType::Admin,
            Self::Booting | Self::Anonymous => UserType::None,
        }
    }

    pub fn principal(&self) -> Option<Principal> {
        match self {
            Self::AuthenticatedDonor(d) => Some(Principal::Donor(d.clone())),
            Self::AuthenticatedAdmin(a) => Some(Principal::Admin(a.clone())),
            Self::Booting | Self::Anonymous => None,
        }
    }
}

impl From<Principal> for SessionState {
    fn from(principal: Principal) -> Self {
        match principal {
            Principal::Donor(d) => Self::AuthenticatedDonor(d),
            Principal::Admin(a) => Self::AuthenticatedAdmin(a),
        }
    }
}

pub struct SessionContext {
    store: CredentialStore,
    verifier: SessionVerifier,
    state: watch::Sender<SessionState>,
    /// Bumped by every `login`/`logout`; a boot outcome computed under an
    /// older generation is stale.
    generation: Mutex<u64>,
    boot_started: AtomicBool,
}

impl SessionContext {
    pub fn new(store: CredentialStore, verifier: SessionVerifier) -> Self {
        let (state, _) = watch::channel(SessionState::Booting);
        Self {
            store,
            verifier,
            state,
            generation: Mutex::new(0),
            boot_started: AtomicBool::new(false),
        }
    }

    /// Restore the session from the credential store. Runs once; later calls
    /// return immediately.
    pub async fn boot(&self) {
        if self.boot_started.swap(true, Ordering::SeqCst) {
            debug!("Session boot already started");
            return;
        }

        let (generation, credentials) = {
            let generation = self.generation.lock();
            (*generation, self.store.load())
        };

        let Some(credentials) = credentials else {
            info!("No stored credentials, starting anonymous");
            self.settle(generation, |_| SessionState::Anonymous);
            return;
        };

        info!("Verifying stored {} session", credentials.kind);
        let outcome = self.verifier.verify(&credentials).await;

        self.settle(generation, |store| match outcome {
            Ok(principal) => {
                info!("Restored {} session for {}", principal.kind(), principal.username());
                SessionState::from(principal)
            }
            Err(e) => {
                warn!("Stored credentials rejected, clearing: {e}");
                if let Err(e) = store.clear() {
                    warn!("Failed to clear rejected credentials: {e}");
                }
                SessionState::Anonymous
            }
        });
    }

    /// Leave `Booting`. When a `login`/`logout` superseded the boot read,
    /// `resolve` is skipped: a login already published its state, a queued
    /// logout lands here as `Anonymous`.
    fn settle(&self, generation: u64, resolve: impl FnOnce(&CredentialStore) -> SessionState) {
        let current = self.generation.lock();
        if *current != generation {
            debug!("Boot outcome superseded by an explicit login/logout");
            self.state.send_if_modified(|state| {
                if state.loading() {
                    *state = SessionState::Anonymous;
                    true
                } else {
                    false
                }
            });
            return;
        }
        let next = resolve(&self.store);
        self.state.send_replace(next);
    }

    /// Establish a session from a token/principal pair obtained from one of
    /// the authentication endpoints. Replaces any existing principal.
    ///
    /// The credential write is synchronous and happens under the generation
    /// lock, so a [`FileStorage`](crate::credentials::FileStorage) backend does
    /// blocking file I/O on the calling task before this returns.
    pub fn login(&self, token: &str, principal: Principal, kind: PrincipalKind) -> Result<()> {
        if principal.kind() != kind {
            return Err(PortalError::KindMismatch {
                expected: kind,
                found: principal.kind(),
            });
        }

        let mut generation = self.generation.lock();
        self.store.save(token, kind)?;
        *generation += 1;
        info!("Logged in as {kind} {}", principal.username());
        self.state.send_replace(SessionState::from(principal));
        Ok(())
    }

    /// Re-assert the donor principal after a profile update, keeping the
    /// stored token.
    pub fn refresh_donor(&self, donor: Donor) -> Result<()> {
        match self.state() {
            SessionState::AuthenticatedDonor(_) => {}
            SessionState::AuthenticatedAdmin(_) => {
                return Err(PortalError::KindMismatch {
                    expected: PrincipalKind::Donor,
                    found: PrincipalKind::Admin,
                })
            }
            SessionState::Booting | SessionState::Anonymous => {
                return Err(PortalError::NotAuthenticated)
            }
        }
        let token = self
            .store
            .token()
            .ok_or_else(|| PortalError::Storage("no stored token to refresh".into()))?;
        self.login(&token, Principal::Donor(donor), PrincipalKind::Donor)
    }

    /// Drop the session. While booting the logout is queued and applied when
    /// verification completes.
    pub fn logout(&self) {
        let mut generation = self.generation.lock();
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear stored credentials: {e}");
        }
        *generation += 1;
        self.state.send_if_modified(|state| match state {
            SessionState::Booting | SessionState::Anonymous => false,
            SessionState::AuthenticatedDonor(_) | SessionState::AuthenticatedAdmin(_) => {
                *state = SessionState::Anonymous;
                true
            }
        });
        info!("Logged out");
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Watch session transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn user_type(&self) -> UserType {
        self.state.borrow().user_type()
    }

    pub fn loading(&self) -> bool {
        self.state.borrow().loading()
    }

    /// Bearer token of the current session, if any.
    pub fn token(&self) -> Option<String> {
        if self.is_authenticated() {
            self.store.token()
        } else {
            None
        }
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::UnavailableStorage;
    use crate::verifier::tests::{sample_donor, StubProfiles};
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn admin() -> Administrator {
        Administrator {
            id: 1,
            username: "root".into(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn context(store: &CredentialStore, profiles: &Arc<StubProfiles>) -> SessionContext {
        SessionContext::new(store.clone(), SessionVerifier::new(profiles.clone()))
    }

    fn booted_anonymous() -> (SessionContext, CredentialStore) {
        let store = CredentialStore::in_memory();
        let profiles = Arc::new(StubProfiles::accepting("good"));
        (context(&store, &profiles), store)
    }

    #[tokio::test]
    async fn starts_booting_and_loading() {
        let (session, _) = booted_anonymous();
        assert_eq!(session.state(), SessionState::Booting);
        assert!(session.loading());
        assert!(!session.is_authenticated());
        assert_eq!(session.user_type(), UserType::None);
    }

    #[tokio::test]
    async fn boot_without_credentials_skips_verifier() {
        let store = CredentialStore::in_memory();
        let profiles = Arc::new(StubProfiles::accepting("good"));
        let session = context(&store, &profiles);

        session.boot().await;

        assert_eq!(session.state(), SessionState::Anonymous);
        assert!(!session.loading());
        assert_eq!(profiles.calls(), 0);
    }

    #[tokio::test]
    async fn boot_with_valid_donor_token_restores_donor() {
        let store = CredentialStore::in_memory();
        store.save("good", PrincipalKind::Donor).unwrap();
        let profiles = Arc::new(StubProfiles::accepting("good"));
        let session = context(&store, &profiles);

        session.boot().await;

        assert_eq!(session.state(), SessionState::AuthenticatedDonor(sample_donor()));
        assert_eq!(session.user_type(), UserType::Donor);
        assert_eq!(session.token().as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn boot_with_admin_token_trusts_it() {
        let store = CredentialStore::in_memory();
        store.save("whatever", PrincipalKind::Admin).unwrap();
        let profiles = Arc::new(StubProfiles::accepting("good"));
        let session = context(&store, &profiles);

        session.boot().await;

        assert!(session.state().is_admin());
        assert_eq!(profiles.calls(), 0);
    }

    #[tokio::test]
    async fn failed_verification_clears_store_and_reboots_like_fresh() {
        let store = CredentialStore::in_memory();
        store.save("expired", PrincipalKind::Donor).unwrap();
        let profiles = Arc::new(StubProfiles::accepting("good"));

        let session = context(&store, &profiles);
        session.boot().await;
        assert_eq!(session.state(), SessionState::Anonymous);
        assert_eq!(store.load(), None);
        assert_eq!(profiles.calls(), 1);

        let again = context(&store, &profiles);
        again.boot().await;
        assert_eq!(again.state(), SessionState::Anonymous);
        assert_eq!(profiles.calls(), 1);
    }

    #[tokio::test]
    async fn boot_runs_once() {
        let store = CredentialStore::in_memory();
        store.save("good", PrincipalKind::Donor).unwrap();
        let profiles = Arc::new(StubProfiles::accepting("good"));
        let session = context(&store, &profiles);

        session.boot().await;
        session.boot().await;
        assert_eq!(profiles.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn verification_timeout_forces_anonymous() {
        let store = CredentialStore::in_memory();
        store.save("good", PrincipalKind::Donor).unwrap();
        let profiles = Arc::new(StubProfiles {
            delay: Some(Duration::from_secs(3600)),
            ..StubProfiles::accepting("good")
        });
        let session = SessionContext::new(
            store.clone(),
            SessionVerifier::new(profiles).with_timeout(Duration::from_secs(5)),
        );

        session.boot().await;
        assert_eq!(session.state(), SessionState::Anonymous);
        assert_eq!(store.load(), None);
    }

    #[tokio::test]
    async fn unavailable_storage_boots_anonymous() {
        let store = CredentialStore::new(Arc::new(UnavailableStorage));
        let profiles = Arc::new(StubProfiles::accepting("good"));
        let session = context(&store, &profiles);

        session.boot().await;
        assert_eq!(session.state(), SessionState::Anonymous);
        assert!(session
            .login("t", Principal::Admin(admin()), PrincipalKind::Admin)
            .is_err());
        assert_eq!(session.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn login_authenticates_with_matching_user_type() {
        let (session, store) = booted_anonymous();
        session.boot().await;

        session
            .login("d-token", Principal::Donor(sample_donor()), PrincipalKind::Donor)
            .unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.user_type(), UserType::Donor);
        assert_eq!(store.load().unwrap().kind, PrincipalKind::Donor);

        session
            .login("a-token", Principal::Admin(admin()), PrincipalKind::Admin)
            .unwrap();
        assert_eq!(session.user_type(), UserType::Admin);
        match session.state() {
            SessionState::AuthenticatedAdmin(a) => assert_eq!(a.username, "root"),
            other => panic!("expected admin, got {other:?}"),
        }
        assert_eq!(store.token().as_deref(), Some("a-token"));
    }

    #[tokio::test]
    async fn login_with_mismatched_kind_is_rejected() {
        let (session, store) = booted_anonymous();
        session.boot().await;

        let err = session
            .login("t", Principal::Donor(sample_donor()), PrincipalKind::Admin)
            .unwrap_err();
        assert!(matches!(err, PortalError::KindMismatch { .. }));
        assert!(!session.is_authenticated());
        assert_eq!(store.load(), None);
    }

    #[tokio::test]
    async fn logout_from_every_state_clears_store() {
        let (session, store) = booted_anonymous();

        // Booting
        store.save("x", PrincipalKind::Donor).unwrap();
        session.logout();
        assert_eq!(store.load(), None);
        assert!(!session.is_authenticated());

        session.boot().await;
        // Anonymous
        session.logout();
        assert_eq!(store.load(), None);
        assert_eq!(session.state(), SessionState::Anonymous);

        // Donor
        session
            .login("d", Principal::Donor(sample_donor()), PrincipalKind::Donor)
            .unwrap();
        session.logout();
        assert_eq!(store.load(), None);
        assert!(!session.is_authenticated());

        // Admin
        session
            .login("a", Principal::Admin(admin()), PrincipalKind::Admin)
            .unwrap();
        session.logout();
        assert_eq!(store.load(), None);
        assert_eq!(session.user_type(), UserType::None);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_during_boot_is_applied_when_boot_settles() {
        let store = CredentialStore::in_memory();
        store.save("good", PrincipalKind::Donor).unwrap();
        let profiles = Arc::new(StubProfiles {
            delay: Some(Duration::from_millis(500)),
            ..StubProfiles::accepting("good")
        });
        let session = Arc::new(context(&store, &profiles));

        let booting = tokio::spawn({
            let session = session.clone();
            async move { session.boot().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(session.loading());

        session.logout();
        assert!(session.loading());

        booting.await.unwrap();
        assert_eq!(session.state(), SessionState::Anonymous);
        assert_eq!(store.load(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn login_during_boot_wins_over_failed_verification() {
        let store = CredentialStore::in_memory();
        store.save("expired", PrincipalKind::Donor).unwrap();
        let profiles = Arc::new(StubProfiles {
            delay: Some(Duration::from_millis(500)),
            ..StubProfiles::accepting("good")
        });
        let session = Arc::new(context(&store, &profiles));

        let booting = tokio::spawn({
            let session = session.clone();
            async move { session.boot().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        session
            .login("fresh", Principal::Admin(admin()), PrincipalKind::Admin)
            .unwrap();
        booting.await.unwrap();

        assert!(session.state().is_admin());
        assert_eq!(store.token().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn refresh_donor_keeps_token() {
        let (session, store) = booted_anonymous();
        session.boot().await;
        session
            .login("d", Principal::Donor(sample_donor()), PrincipalKind::Donor)
            .unwrap();

        let mut renamed = sample_donor();
        renamed.username = "ana-maria".into();
        session.refresh_donor(renamed.clone()).unwrap();

        assert_eq!(session.state(), SessionState::AuthenticatedDonor(renamed));
        assert_eq!(store.token().as_deref(), Some("d"));
    }

    #[tokio::test]
    async fn refresh_donor_requires_donor_session() {
        let (session, _) = booted_anonymous();
        session.boot().await;
        assert!(matches!(
            session.refresh_donor(sample_donor()),
            Err(PortalError::NotAuthenticated)
        ));

        session
            .login("a", Principal::Admin(admin()), PrincipalKind::Admin)
            .unwrap();
        assert!(matches!(
            session.refresh_donor(sample_donor()),
            Err(PortalError::KindMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let (session, _) = booted_anonymous();
        let mut rx = session.subscribe();
        session.boot().await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState::Anonymous);

        session
            .login("a", Principal::Admin(admin()), PrincipalKind::Admin)
            .unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_admin());
    }
}
