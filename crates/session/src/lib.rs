//! Jobtrack session and token lifecycle
//!
//! Decides whether the user is signed in, renews an expiring access token
//! without interrupting them, serializes concurrent renewals into a single
//! exchange, and gates protected views behind a login redirect.
//!
//! Everything runs on one cooperative event loop: the types here are `!Send`
//! and timers are spawned with `spawn_local`. Native callers must drive the
//! session inside a `tokio::task::LocalSet`.

pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod refresh;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod token;
pub mod types;

mod runtime;

pub use client::{ApiClient, ApiRequest, ApiResponse, AuthenticatedClient};
pub use config::{ApiPaths, SessionConfig};
pub use error::{ClientError, SessionError, StorageError, ValidationError};
pub use guard::{GuardDecision, LoginRedirect, Mount, MountToken, ProtectedView, SessionGuard};
pub use refresh::{RefreshCoordinator, RefreshPhase};
pub use scheduler::{PollingHandle, PollingScheduler, PollingStats};
pub use session::{SessionAction, SessionManager, SessionSnapshot, SessionState};
pub use store::{KeyValueStorage, MemoryStorage, SlotTokenStore, TokenStore};
pub use token::{AccessTokenClaims, Clock, SystemClock, TokenValidator};
pub use types::{
    Application, ApplicationSubmission, Company, Credential, PasswordChange, UserProfile,
};

#[cfg(not(target_arch = "wasm32"))]
pub use store::FileStorage;

#[cfg(target_arch = "wasm32")]
pub use store::BrowserStorage;
