//! Shared fixtures for the session integration tests

#![allow(dead_code)]

use jobtrack_session::store::SlotTokenStore;
use jobtrack_session::{
    ApiClient, Clock, Credential, MemoryStorage, SessionManager, TokenStore, UserProfile,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use wiremock::MockServer;

/// Wall-clock time the fixtures start at
pub const NOW: i64 = 2_000;

/// Nothing listens here, so every request fails at the transport level.
pub const UNREACHABLE: &str = "http://127.0.0.1:1";

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    exp: i64,
}

/// Mint an HS256 access token expiring at `exp`
pub fn mint(subject: &str, exp: i64) -> String {
    encode(
        &Header::default(),
        &Claims { sub: subject, exp },
        &EncodingKey::from_secret(b"server-side-secret"),
    )
    .unwrap()
}

pub fn fresh_token() -> String {
    mint("42", NOW + 3_600)
}

pub fn expired_token() -> String {
    mint("42", 1_000)
}

pub fn profile() -> UserProfile {
    UserProfile {
        first_name: Some("Ada".into()),
        last_name: Some("Lovelace".into()),
        email: Some("ada@example.com".into()),
        ..Default::default()
    }
}

pub fn credential(access_token: &str, refresh_token: &str) -> Credential {
    Credential::new(access_token, refresh_token, profile())
}

/// Clock the tests move by hand
pub struct ManualClock(Cell<i64>);

impl ManualClock {
    pub fn set(&self, now: i64) {
        self.0.set(now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.get()
    }
}

pub struct Harness {
    pub store: Rc<SlotTokenStore<MemoryStorage>>,
    pub clock: Rc<ManualClock>,
    pub session: SessionManager,
}

impl Harness {
    /// Session against `base_url`, with `initial` already persisted.
    pub fn new(base_url: &str, initial: Option<Credential>) -> Self {
        let store = Rc::new(SlotTokenStore::new(MemoryStorage::default()));
        if let Some(credential) = &initial {
            store.set(credential).unwrap();
        }
        let clock = Rc::new(ManualClock(Cell::new(NOW)));

        let session = SessionManager::new(
            ApiClient::new(base_url).unwrap(),
            store.clone(),
            clock.clone(),
            Duration::from_secs(30),
            "/login",
        );

        Self {
            store,
            clock,
            session,
        }
    }

    pub fn with_server(server: &MockServer, initial: Option<Credential>) -> Self {
        Self::new(&server.uri(), initial)
    }

    pub fn stored(&self) -> Option<Credential> {
        self.store.get()
    }
}
