//! Single-flight token refresh
//!
//! Every caller that asks for a refresh while one is already running is
//! attached to the running exchange and receives its outcome, so several
//! views discovering expiry on the same tick cause exactly one network call.
//!
//! Outcome policy:
//! - success: the rotated credential replaces the stored one in a single
//!   `set`, unless the session was signed out or replaced meanwhile; a `set`
//!   that fails is reported as [`SessionError::Network`]
//! - transport failure: reported as [`SessionError::Network`], store untouched
//! - any server verdict: [`SessionError::AuthRejected`], store cleared, and the
//!   rejected refresh token is remembered so it is never sent twice

use crate::client::ApiClient;
use crate::error::SessionError;
use crate::store::TokenStore;
use crate::types::Credential;
use futures::FutureExt;
use futures::future::{LocalBoxFuture, Shared};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info, warn};

type RefreshResult = Result<Credential, SessionError>;
type PendingRefresh = Shared<LocalBoxFuture<'static, RefreshResult>>;

/// Coordinator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    InFlight,
    /// Passed through on rejection before settling back to `Idle`.
    Cooldown,
}

struct Inner {
    phase: RefreshPhase,
    pending: Option<PendingRefresh>,
    rejected: Option<String>,
    exchanges: u64,
}

/// Orchestrates refresh-token exchanges for one session.
#[derive(Clone)]
pub struct RefreshCoordinator {
    api: ApiClient,
    store: Rc<dyn TokenStore>,
    inner: Rc<RefCell<Inner>>,
}

impl RefreshCoordinator {
    pub fn new(api: ApiClient, store: Rc<dyn TokenStore>) -> Self {
        Self {
            api,
            store,
            inner: Rc::new(RefCell::new(Inner {
                phase: RefreshPhase::Idle,
                pending: None,
                rejected: None,
                exchanges: 0,
            })),
        }
    }

    /// Current phase
    pub fn phase(&self) -> RefreshPhase {
        self.inner.borrow().phase
    }

    /// True while an exchange is running
    pub fn is_in_flight(&self) -> bool {
        self.inner.borrow().pending.is_some()
    }

    /// Number of refresh exchanges actually sent to the server
    pub fn exchanges(&self) -> u64 {
        self.inner.borrow().exchanges
    }

    /// Refresh the stored credential, joining an exchange already in flight.
    pub async fn refresh(&self) -> RefreshResult {
        let pending = self.join_or_start()?;
        pending.await
    }

    fn join_or_start(&self) -> Result<PendingRefresh, SessionError> {
        let mut inner = self.inner.borrow_mut();

        if let Some(pending) = &inner.pending {
            debug!("Joining in-flight token refresh");
            return Ok(pending.clone());
        }

        let credential = self.store.get().ok_or(SessionError::Unauthenticated)?;
        if inner.rejected.as_deref() == Some(credential.refresh_token.as_str()) {
            warn!("Refusing to resend a refresh token the server already rejected");
            self.store.clear();
            return Err(SessionError::AuthRejected(
                "refresh token was already rejected".into(),
            ));
        }

        inner.phase = RefreshPhase::InFlight;
        inner.exchanges += 1;
        let pending = exchange(
            self.api.clone(),
            Rc::clone(&self.store),
            Rc::clone(&self.inner),
            credential,
        )
        .boxed_local()
        .shared();
        inner.pending = Some(pending.clone());

        Ok(pending)
    }
}

async fn exchange(
    api: ApiClient,
    store: Rc<dyn TokenStore>,
    inner: Rc<RefCell<Inner>>,
    credential: Credential,
) -> RefreshResult {
    debug!("Exchanging refresh token");
    let result = match api.refresh_access_token(&credential.refresh_token).await {
        Ok(response) => commit(store.as_ref(), &credential, response.access, response.refresh),
        Err(err) => {
            let err = err.into_refresh_error();
            if err.is_fatal() {
                warn!(error = %err, "Refresh token rejected; clearing session");
                discard(store.as_ref(), &credential);
            } else {
                warn!(error = %err, "Token refresh failed; keeping session");
            }
            Err(err)
        }
    };

    let mut inner = inner.borrow_mut();
    inner.pending = None;
    if matches!(result, Err(SessionError::AuthRejected(_))) {
        inner.rejected = Some(credential.refresh_token.clone());
        debug!(phase = ?RefreshPhase::Cooldown, "Remembering rejected refresh token");
    }
    inner.phase = RefreshPhase::Idle;

    result
}

/// Applies a successful exchange against whatever the store holds now.
fn commit(
    store: &dyn TokenStore,
    sent: &Credential,
    access_token: String,
    refresh_token: Option<String>,
) -> RefreshResult {
    match store.get() {
        Some(current) if current.refresh_token == sent.refresh_token => {
            // Rotate the current entry so a profile edit made mid-flight survives.
            let updated = current.rotated(access_token, refresh_token);
            store.set(&updated).map_err(|e| {
                warn!(error = %e, "Failed to persist refreshed credential");
                SessionError::Network(format!("refreshed credential was not saved: {e}"))
            })?;
            info!(
                rotated_refresh = updated.refresh_token != sent.refresh_token,
                "Access token refreshed"
            );
            Ok(updated)
        }
        Some(current) => {
            debug!("Session replaced during refresh; discarding response");
            Ok(current)
        }
        None => {
            debug!("Session ended during refresh; discarding response");
            Err(SessionError::Unauthenticated)
        }
    }
}

/// Clears the store unless it already belongs to a different session.
fn discard(store: &dyn TokenStore, sent: &Credential) {
    match store.get() {
        Some(current) if current.refresh_token != sent.refresh_token => {
            debug!("Session replaced during refresh; leaving it in place");
        }
        _ => store.clear(),
    }
}
