//! Access gate for protected views
//!
//! A view calls [`SessionGuard::mount`] before rendering anything protected.
//! Without a usable session the answer is a [`LoginRedirect`] carrying the
//! requested path; otherwise the view receives a [`ProtectedView`] that keeps
//! the shared polling timer alive until it is dropped.

use crate::client::AuthenticatedClient;
use crate::error::SessionError;
use crate::scheduler::PollingHandle;
use crate::session::{SessionManager, SessionSnapshot, SessionState};
use crate::types::Credential;
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Query parameter carrying the return path
pub const REDIRECT_PARAM: &str = "redirect";

/// Where to send an unauthenticated visitor, and where to bring them back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    login_route: String,
    return_to: String,
}

impl LoginRedirect {
    pub fn new(login_route: impl Into<String>, return_to: impl Into<String>) -> Self {
        Self {
            login_route: login_route.into(),
            return_to: return_to.into(),
        }
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    pub fn return_to(&self) -> &str {
        &self.return_to
    }

    /// Render the login URL, e.g. `/login?redirect=/applications`.
    pub fn to_url(&self) -> String {
        format!(
            "{}?{}={}",
            self.login_route,
            REDIRECT_PARAM,
            escape(&self.return_to)
        )
    }

    /// The path the login flow should return to, read from its query string.
    ///
    /// Only same-site absolute paths are honoured; anything else yields `/`.
    pub fn return_path(query: &str) -> String {
        let query = query.strip_prefix('?').unwrap_or(query);
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == REDIRECT_PARAM)
            .map(|(_, value)| value.into_owned())
            .filter(|path| is_local_path(path))
            .unwrap_or_else(|| "/".to_string())
    }
}

impl fmt::Display for LoginRedirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}

// Paths stay readable: only characters that would change how the query
// string parses are escaped.
fn escape(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(c, '%' | '&' | '#' | '+') || c.is_whitespace() || c.is_control() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Per-view access gate
#[derive(Clone)]
pub struct SessionGuard {
    session: SessionManager,
    path: String,
}

/// Outcome of mounting a protected view
pub enum Mount {
    Redirect(LoginRedirect),
    Granted(ProtectedView),
}

/// What a mounted view should do after a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Keep rendering with this credential
    Continue(Credential),
    /// Keep rendering and show the error inline
    Degraded(SessionError),
    /// The session is gone
    Redirect(LoginRedirect),
}

impl SessionGuard {
    pub fn new(session: SessionManager, path: impl Into<String>) -> Self {
        Self {
            session,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Login redirect for this view
    pub fn redirect(&self) -> LoginRedirect {
        LoginRedirect::new(self.session.login_route(), self.path.clone())
    }

    /// Decide whether the view may render.
    ///
    /// An expired token is refreshed first. A refresh that fails on the
    /// network still grants access, with the error left on the snapshot.
    pub async fn mount(&self) -> Mount {
        match self.session.ensure_fresh().await {
            Ok(_) => {}
            Err(e) if e.is_fatal() => {
                info!(path = %self.path, error = %e, "Redirecting to login");
                return Mount::Redirect(self.redirect());
            }
            Err(e) => {
                debug!(path = %self.path, error = %e, "Mounting with a degraded session");
            }
        }

        let mounted = Rc::new(Cell::new(true));
        Mount::Granted(ProtectedView {
            session: self.session.clone(),
            redirect: self.redirect(),
            updates: self.session.subscribe(),
            mounted,
            _polling: self.session.scheduler().attach(),
        })
    }
}

/// A mounted protected view. Dropping it unmounts the view.
pub struct ProtectedView {
    session: SessionManager,
    redirect: LoginRedirect,
    updates: watch::Receiver<SessionSnapshot>,
    mounted: Rc<Cell<bool>>,
    _polling: PollingHandle,
}

impl ProtectedView {
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn redirect(&self) -> &LoginRedirect {
        &self.redirect
    }

    /// Credential the view renders with, if the session is still usable
    pub fn credential(&self) -> Option<Credential> {
        self.session.state().credential().cloned()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Client for the view's data fetches
    pub fn client(&self) -> AuthenticatedClient {
        self.session.authenticated_client()
    }

    /// Decision for the current snapshot, without any I/O
    pub fn decision(&self) -> GuardDecision {
        decide(&self.session.snapshot(), &self.redirect)
    }

    /// Run one check now, as a polling tick would.
    pub async fn check(&self) -> GuardDecision {
        if let Err(e) = self.session.ensure_fresh().await {
            debug!(error = %e, "Session check failed");
        }
        self.decision()
    }

    /// Wait for the next session change and decide on it.
    pub async fn next_decision(&mut self) -> GuardDecision {
        if self.updates.changed().await.is_err() {
            debug!("Session channel closed");
        }
        let snapshot = self.updates.borrow_and_update().clone();
        decide(&snapshot, &self.redirect)
    }

    /// Token for discarding responses that arrive after unmount
    pub fn mount_token(&self) -> MountToken {
        MountToken {
            mounted: Rc::clone(&self.mounted),
        }
    }

    /// Unmount the view, stopping its share of the polling timer
    pub fn unmount(self) {}
}

impl Drop for ProtectedView {
    fn drop(&mut self) {
        self.mounted.set(false);
    }
}

fn decide(snapshot: &SessionSnapshot, redirect: &LoginRedirect) -> GuardDecision {
    match (&snapshot.state, &snapshot.error) {
        (SessionState::Valid(_) | SessionState::Refreshing(_), Some(error)) => {
            GuardDecision::Degraded(error.clone())
        }
        (SessionState::Valid(credential) | SessionState::Refreshing(credential), None) => {
            GuardDecision::Continue(credential.clone())
        }
        (SessionState::Unauthenticated | SessionState::Expired, _) => {
            GuardDecision::Redirect(redirect.clone())
        }
    }
}

/// Tracks whether the view that issued a request is still mounted.
#[derive(Debug, Clone)]
pub struct MountToken {
    mounted: Rc<Cell<bool>>,
}

impl MountToken {
    pub fn is_mounted(&self) -> bool {
        self.mounted.get()
    }

    /// Await `fut`, dropping its output if the view unmounted meanwhile.
    /// The request itself is never aborted.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        let output = fut.await;
        if self.is_mounted() {
            Some(output)
        } else {
            debug!("View unmounted; discarding response");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_url() {
        let redirect = LoginRedirect::new("/login", "/applications");
        assert_eq!(redirect.to_url(), "/login?redirect=/applications");
        assert_eq!(redirect.to_string(), "/login?redirect=/applications");
    }

    #[test]
    fn test_redirect_escapes_query_characters() {
        let redirect = LoginRedirect::new("/login", "/apply?company=3&level=senior#top");
        assert_eq!(
            redirect.to_url(),
            "/login?redirect=/apply?company=3%26level=senior%23top"
        );

        let redirect = LoginRedirect::new("/login", "/search/c++ jobs 100%");
        assert_eq!(
            redirect.to_url(),
            "/login?redirect=/search/c%2B%2B%20jobs%20100%25"
        );
    }

    #[test]
    fn test_return_path_round_trip() {
        for path in ["/applications", "/apply?company=3&level=senior", "/search/c++ jobs"] {
            let url = LoginRedirect::new("/login", path).to_url();
            let query = url.split_once('?').map(|(_, q)| q).unwrap();
            assert_eq!(LoginRedirect::return_path(query), path);
        }
    }

    #[test]
    fn test_return_path_defaults_to_root() {
        assert_eq!(LoginRedirect::return_path(""), "/");
        assert_eq!(LoginRedirect::return_path("?next=/profile"), "/");
        assert_eq!(LoginRedirect::return_path("redirect="), "/");
        assert_eq!(LoginRedirect::return_path("redirect=https://evil.example"), "/");
        assert_eq!(LoginRedirect::return_path("redirect=//evil.example"), "/");
        assert_eq!(LoginRedirect::return_path("redirect=/%5Cevil.example"), "/");
        assert_eq!(LoginRedirect::return_path("?redirect=/profile"), "/profile");
    }

    #[test]
    fn test_decision_from_snapshot() {
        let redirect = LoginRedirect::new("/login", "/applications");
        let credential = Credential::new("a", "r", Default::default());

        let valid = SessionSnapshot {
            state: SessionState::Valid(credential.clone()),
            error: None,
        };
        assert_eq!(
            decide(&valid, &redirect),
            GuardDecision::Continue(credential.clone())
        );

        let degraded = SessionSnapshot {
            state: SessionState::Valid(credential),
            error: Some(SessionError::Network("timeout".into())),
        };
        assert!(matches!(
            decide(&degraded, &redirect),
            GuardDecision::Degraded(SessionError::Network(_))
        ));

        let expired = SessionSnapshot {
            state: SessionState::Expired,
            error: None,
        };
        assert_eq!(
            decide(&expired, &redirect),
            GuardDecision::Redirect(redirect.clone())
        );
    }

    #[tokio::test]
    async fn test_mount_token_discards_after_unmount() {
        let mounted = Rc::new(Cell::new(true));
        let token = MountToken {
            mounted: Rc::clone(&mounted),
        };

        assert_eq!(token.guard(async { 1 }).await, Some(1));

        let late = token.clone();
        let pending = late.guard(async {
            mounted.set(false);
            2
        });
        assert_eq!(pending.await, None);
        assert!(!token.is_mounted());
    }
}
