//! Process-wide session state
//!
//! [`SessionManager`] owns the token store, the refresh coordinator and the
//! shared polling scheduler. Components read the session through it and
//! observe changes with [`SessionManager::subscribe`]; nothing else touches
//! the persisted slots.

use crate::client::{ApiClient, AuthenticatedClient};
use crate::config::SessionConfig;
use crate::error::{ClientError, SessionError, StorageError};
use crate::refresh::RefreshCoordinator;
use crate::scheduler::PollingScheduler;
use crate::store::TokenStore;
use crate::token::{Clock, SystemClock, TokenValidator};
use crate::types::{Credential, UserProfile};
use futures::FutureExt;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Exactly one of these holds at any instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Valid(Credential),
    /// The held credential is being replaced
    Refreshing(Credential),
    Expired,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Valid(_) | Self::Refreshing(_))
    }

    pub fn credential(&self) -> Option<&Credential> {
        match self {
            Self::Valid(credential) | Self::Refreshing(credential) => Some(credential),
            Self::Unauthenticated | Self::Expired => None,
        }
    }

    /// Pure transition function
    pub fn reduce(&self, action: SessionAction) -> Self {
        match action {
            SessionAction::Restored(credential) | SessionAction::SignedIn(credential) => {
                Self::Valid(credential)
            }
            SessionAction::RefreshStarted => match self {
                Self::Valid(credential) => Self::Refreshing(credential.clone()),
                other => other.clone(),
            },
            SessionAction::Refreshed(credential) => Self::Valid(credential),
            SessionAction::RefreshFailed(err) if err.is_fatal() => Self::Expired,
            SessionAction::RefreshFailed(_) => match self {
                Self::Refreshing(credential) => Self::Valid(credential.clone()),
                other => other.clone(),
            },
            SessionAction::ProfileUpdated(user) => match self {
                Self::Valid(credential) => Self::Valid(Credential {
                    user,
                    ..credential.clone()
                }),
                Self::Refreshing(credential) => Self::Refreshing(Credential {
                    user,
                    ..credential.clone()
                }),
                other => other.clone(),
            },
            SessionAction::Invalidated(_) => Self::Expired,
            SessionAction::SignedOut => Self::Unauthenticated,
        }
    }
}

/// Inputs to [`SessionState::reduce`]
#[derive(Debug, Clone)]
pub enum SessionAction {
    Restored(Credential),
    SignedIn(Credential),
    RefreshStarted,
    Refreshed(Credential),
    RefreshFailed(SessionError),
    ProfileUpdated(UserProfile),
    /// The stored credential turned out to be unusable
    Invalidated(SessionError),
    SignedOut,
}

/// What subscribers observe: the state plus the last non-fatal error, which
/// the next successful transition clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub error: Option<SessionError>,
}

struct Inner {
    api: ApiClient,
    store: Rc<dyn TokenStore>,
    clock: Rc<dyn Clock>,
    refresher: RefreshCoordinator,
    scheduler: PollingScheduler,
    login_route: String,
    snapshot: watch::Sender<SessionSnapshot>,
}

/// Shared handle to the session. Clones refer to the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Rc<Inner>,
}

impl SessionManager {
    /// Build a manager from configuration using the wall clock.
    pub fn from_config(
        config: &SessionConfig,
        store: Rc<dyn TokenStore>,
    ) -> Result<Self, ClientError> {
        let api = ApiClient::from_config(config)?;
        Ok(Self::new(
            api,
            store,
            Rc::new(SystemClock),
            config.poll_interval(),
            &config.login_route,
        ))
    }

    pub fn new(
        api: ApiClient,
        store: Rc<dyn TokenStore>,
        clock: Rc<dyn Clock>,
        poll_interval: Duration,
        login_route: &str,
    ) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let scheduler = PollingScheduler::new(poll_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        if let Err(e) = (SessionManager { inner }).ensure_fresh().await {
                            debug!(error = %e, "Scheduled session check failed");
                        }
                    }
                }
                .boxed_local()
            });

            let initial = SessionSnapshot {
                state: SessionState::Unauthenticated,
                error: None,
            };

            Inner {
                refresher: RefreshCoordinator::new(api.clone(), Rc::clone(&store)),
                api,
                store,
                clock,
                scheduler,
                login_route: login_route.to_string(),
                snapshot: watch::channel(initial).0,
            }
        });

        let manager = Self { inner };
        manager.restore();
        manager
    }

    /// Current snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.inner.snapshot.borrow().state.clone()
    }

    /// Receive every state change from now on
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// The stored credential, read fresh from the store
    pub fn credential(&self) -> Option<Credential> {
        self.inner.store.get()
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.inner.refresher
    }

    pub fn scheduler(&self) -> &PollingScheduler {
        &self.inner.scheduler
    }

    pub fn login_route(&self) -> &str {
        &self.inner.login_route
    }

    /// Current time according to the session clock
    pub fn now(&self) -> i64 {
        self.inner.clock.now()
    }

    /// Client for protected endpoints bound to this session
    pub fn authenticated_client(&self) -> AuthenticatedClient {
        AuthenticatedClient::new(self.clone())
    }

    /// Recompute the state from the store without touching the network.
    ///
    /// A credential whose access token cannot be decoded is cleared here.
    /// An expired one stays `Valid` until the next check refreshes it.
    pub fn restore(&self) -> SessionState {
        match self.inner.store.get() {
            None => {
                self.dispatch(SessionAction::SignedOut, None);
            }
            Some(credential) => match TokenValidator::decode(&credential.access_token) {
                Ok(_) => self.dispatch(SessionAction::Restored(credential), None),
                Err(e) => self.invalidate(e),
            },
        }
        self.state()
    }

    /// Sign in with email and password.
    pub async fn login(&self, email: &str, password: &str) -> Result<Credential, ClientError> {
        let response = self.inner.api.login(email, password).await?;
        let credential = Credential::from(response);

        self.inner.store.set(&credential)?;
        info!(user = %credential.user.display_name(), "Signed in");
        self.dispatch(SessionAction::SignedIn(credential.clone()), None);

        Ok(credential)
    }

    /// Sign out and forget the credential.
    pub fn logout(&self) {
        self.inner.store.clear();
        info!("Signed out");
        self.dispatch(SessionAction::SignedOut, None);
    }

    /// Replace the cached profile, keeping both tokens. No-op when signed out.
    pub fn update_profile(&self, user: UserProfile) -> Result<(), StorageError> {
        let Some(credential) = self.inner.store.get() else {
            warn!("Ignoring profile update without a session");
            return Ok(());
        };

        self.inner.store.set(&Credential {
            user: user.clone(),
            ..credential
        })?;
        self.dispatch(SessionAction::ProfileUpdated(user), None);
        Ok(())
    }

    /// Return a credential whose access token may be sent right now.
    ///
    /// Joins a refresh already in flight, refreshes an expired token, and
    /// tears the session down when the token is unusable.
    pub async fn ensure_fresh(&self) -> Result<Credential, SessionError> {
        if self.inner.refresher.is_in_flight() {
            return self.refresh().await;
        }

        let Some(credential) = self.inner.store.get() else {
            self.dispatch(SessionAction::SignedOut, None);
            return Err(SessionError::Unauthenticated);
        };

        let claims = match TokenValidator::decode(&credential.access_token) {
            Ok(claims) => claims,
            Err(e) => {
                self.invalidate(e.clone());
                return Err(e);
            }
        };

        if TokenValidator::is_expired(&claims, self.now()) {
            debug!(expires_at = claims.expires_at, "Access token expired");
            return self.refresh().await;
        }

        self.dispatch(SessionAction::Restored(credential.clone()), None);
        Ok(credential)
    }

    /// Refresh unconditionally, e.g. after the server refused the token.
    pub async fn refresh(&self) -> Result<Credential, SessionError> {
        self.dispatch(SessionAction::RefreshStarted, None);

        let result = self.inner.refresher.refresh().await;
        match &result {
            Ok(credential) => {
                self.dispatch(SessionAction::Refreshed(credential.clone()), None);
            }
            Err(SessionError::Unauthenticated) => {
                self.dispatch(SessionAction::SignedOut, None);
            }
            // The coordinator has already cleared the store unless a newer
            // sign-in replaced it meanwhile.
            Err(e) if e.is_fatal() => match self.inner.store.get() {
                Some(current) => self.dispatch(SessionAction::Restored(current), None),
                None => self.dispatch(SessionAction::RefreshFailed(e.clone()), None),
            },
            Err(e) => {
                self.dispatch(SessionAction::RefreshFailed(e.clone()), Some(e.clone()));
            }
        }
        result
    }

    fn invalidate(&self, error: SessionError) {
        warn!(error = %error, "Stored credential is unusable; clearing session");
        self.inner.store.clear();
        self.dispatch(SessionAction::Invalidated(error), None);
    }

    fn dispatch(&self, action: SessionAction, error: Option<SessionError>) {
        self.inner.snapshot.send_if_modified(|snapshot| {
            let next = SessionSnapshot {
                state: snapshot.state.reduce(action),
                error,
            };
            if *snapshot == next {
                false
            } else {
                debug!(from = state_name(&snapshot.state), to = state_name(&next.state), "Session transition");
                *snapshot = next;
                true
            }
        });
    }
}

fn state_name(state: &SessionState) -> &'static str {
    match state {
        SessionState::Unauthenticated => "unauthenticated",
        SessionState::Valid(_) => "valid",
        SessionState::Refreshing(_) => "refreshing",
        SessionState::Expired => "expired",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(access: &str) -> Credential {
        Credential::new(access, "refresh", UserProfile::default())
    }

    #[test]
    fn test_refresh_cycle() {
        let state = SessionState::Valid(credential("a1"));

        let refreshing = state.reduce(SessionAction::RefreshStarted);
        assert_eq!(refreshing, SessionState::Refreshing(credential("a1")));
        assert!(refreshing.is_authenticated());

        let refreshed = refreshing.reduce(SessionAction::Refreshed(credential("a2")));
        assert_eq!(refreshed, SessionState::Valid(credential("a2")));
    }

    #[test]
    fn test_network_failure_returns_to_valid() {
        let state = SessionState::Refreshing(credential("a1"))
            .reduce(SessionAction::RefreshFailed(SessionError::Network("down".into())));
        assert_eq!(state, SessionState::Valid(credential("a1")));
    }

    #[test]
    fn test_fatal_failures_expire() {
        for err in [
            SessionError::AuthRejected("no".into()),
            SessionError::Decode("bad".into()),
        ] {
            let state = SessionState::Refreshing(credential("a1"))
                .reduce(SessionAction::RefreshFailed(err));
            assert_eq!(state, SessionState::Expired);
            assert!(state.credential().is_none());
        }
    }

    #[test]
    fn test_refresh_start_requires_session() {
        assert_eq!(
            SessionState::Unauthenticated.reduce(SessionAction::RefreshStarted),
            SessionState::Unauthenticated
        );
        assert_eq!(
            SessionState::Expired.reduce(SessionAction::RefreshStarted),
            SessionState::Expired
        );
    }

    #[test]
    fn test_profile_update_keeps_tokens() {
        let user = UserProfile {
            contact: Some("555-0100".into()),
            ..Default::default()
        };
        let state =
            SessionState::Valid(credential("a1")).reduce(SessionAction::ProfileUpdated(user.clone()));
        let updated = state.credential().unwrap();
        assert_eq!(updated.access_token, "a1");
        assert_eq!(updated.user, user);

        assert_eq!(
            SessionState::Unauthenticated.reduce(SessionAction::ProfileUpdated(user)),
            SessionState::Unauthenticated
        );
    }

    #[test]
    fn test_sign_out_and_invalidate() {
        let valid = SessionState::Valid(credential("a1"));
        assert_eq!(valid.reduce(SessionAction::SignedOut), SessionState::Unauthenticated);
        assert_eq!(
            valid.reduce(SessionAction::Invalidated(SessionError::Decode("x".into()))),
            SessionState::Expired
        );
    }
}
