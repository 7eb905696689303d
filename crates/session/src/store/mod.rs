//! Credential persistence
//!
//! The [`TokenStore`] is a dumb, durable slot: no validation happens here.
//! The credential is persisted as three named slots so the layout matches
//! what the browser client keeps in `localStorage`.

mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod file;

#[cfg(target_arch = "wasm32")]
mod browser;

pub use memory::MemoryStorage;

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileStorage;

#[cfg(target_arch = "wasm32")]
pub use browser::BrowserStorage;

use crate::error::StorageError;
use crate::types::{Credential, UserProfile};
use tracing::warn;

/// Slot holding the access token
pub const ACCESS_TOKEN_KEY: &str = "authToken";
/// Slot holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Slot holding the cached user profile as JSON
pub const USER_KEY: &str = "user";

/// Holder of the current credential, local to one browsing context.
pub trait TokenStore {
    fn get(&self) -> Option<Credential>;
    /// Replaces all three slots, or none of them.
    fn set(&self, credential: &Credential) -> Result<(), StorageError>;
    fn clear(&self);
}

/// String key/value persistence medium.
pub trait KeyValueStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Applies every entry in one step. `None` removes the key.
    fn update(&self, entries: &[(&str, Option<&str>)]) -> Result<(), StorageError>;
}

/// Applies `entries` one key at a time for media without batch writes.
///
/// When a write fails, the keys touched so far get their previous values
/// back before the error is returned.
pub fn apply_entries<E: std::fmt::Display>(
    entries: &[(&str, Option<&str>)],
    read: impl Fn(&str) -> Result<Option<String>, E>,
    mut write: impl FnMut(&str, Option<&str>) -> Result<(), E>,
) -> Result<(), E> {
    let previous = entries
        .iter()
        .map(|(key, _)| read(key).map(|value| (*key, value)))
        .collect::<Result<Vec<_>, E>>()?;

    for (done, (key, value)) in entries.iter().enumerate() {
        if let Err(e) = write(key, *value) {
            for (key, value) in &previous[..done] {
                if let Err(restore) = write(key, value.as_deref()) {
                    warn!(slot = *key, error = %restore, "Failed to restore session slot");
                }
            }
            return Err(e);
        }
    }
    Ok(())
}

/// [`TokenStore`] over any [`KeyValueStorage`] using the three named slots.
#[derive(Debug, Clone, Default)]
pub struct SlotTokenStore<S> {
    storage: S,
}

impl<S: KeyValueStorage> SlotTokenStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Get a reference to the underlying storage
    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get_item(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(slot = key, error = %e, "Failed to read session slot");
                None
            }
        }
    }
}

impl<S: KeyValueStorage> TokenStore for SlotTokenStore<S> {
    fn get(&self) -> Option<Credential> {
        let access_token = self.read(ACCESS_TOKEN_KEY)?;
        let refresh_token = self.read(REFRESH_TOKEN_KEY)?;

        // A damaged profile cache is cosmetic; the tokens decide the session.
        let user = self
            .read(USER_KEY)
            .and_then(|raw| match serde_json::from_str::<UserProfile>(&raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(error = %e, "Ignoring unreadable cached user profile");
                    None
                }
            })
            .unwrap_or_default();

        Some(Credential {
            access_token,
            refresh_token,
            user,
        })
    }

    fn set(&self, credential: &Credential) -> Result<(), StorageError> {
        let user = serde_json::to_string(&credential.user)?;

        let entries = [
            (ACCESS_TOKEN_KEY, Some(credential.access_token.as_str())),
            (REFRESH_TOKEN_KEY, Some(credential.refresh_token.as_str())),
            (USER_KEY, Some(user.as_str())),
        ];
        self.storage.update(&entries).inspect_err(|e| {
            warn!(error = %e, "Failed to persist credential");
        })
    }

    fn clear(&self) {
        let entries = [
            (ACCESS_TOKEN_KEY, None),
            (REFRESH_TOKEN_KEY, None),
            (USER_KEY, None),
        ];
        if let Err(e) = self.storage.update(&entries) {
            warn!(error = %e, "Failed to clear stored credential");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> Credential {
        Credential::new(
            "access",
            "refresh",
            UserProfile {
                first_name: Some("Grace".into()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_set_get_clear() {
        let store = SlotTokenStore::new(MemoryStorage::new());
        assert!(store.get().is_none());

        store.set(&credential()).unwrap();
        assert_eq!(store.get(), Some(credential()));
        assert_eq!(
            store.storage().get_item(ACCESS_TOKEN_KEY).unwrap().as_deref(),
            Some("access")
        );

        store.clear();
        assert!(store.get().is_none());
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
            assert!(store.storage().get_item(key).unwrap().is_none());
        }
    }

    #[test]
    fn test_missing_refresh_token_means_no_credential() {
        let storage = MemoryStorage::new();
        storage
            .update(&[(ACCESS_TOKEN_KEY, Some("access"))])
            .unwrap();
        assert!(SlotTokenStore::new(storage).get().is_none());
    }

    #[test]
    fn test_corrupt_profile_keeps_session() {
        let storage = MemoryStorage::new();
        storage
            .update(&[
                (ACCESS_TOKEN_KEY, Some("access")),
                (REFRESH_TOKEN_KEY, Some("refresh")),
                (USER_KEY, Some("{not json")),
            ])
            .unwrap();

        let credential = SlotTokenStore::new(storage).get().unwrap();
        assert_eq!(credential.access_token, "access");
        assert_eq!(credential.user, UserProfile::default());
    }

    #[test]
    fn test_clones_share_the_slot() {
        let store = SlotTokenStore::new(MemoryStorage::new());
        let other = store.clone();

        store.set(&credential()).unwrap();
        assert_eq!(other.get(), Some(credential()));

        other.clear();
        assert!(store.get().is_none());
    }

    /// Medium that refuses to write one key, like a full `localStorage`.
    struct RefusingStorage {
        inner: MemoryStorage,
        refused: &'static str,
    }

    impl KeyValueStorage for RefusingStorage {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get_item(key)
        }

        fn update(&self, entries: &[(&str, Option<&str>)]) -> Result<(), StorageError> {
            apply_entries(
                entries,
                |key| self.inner.get_item(key),
                |key, value| {
                    if key == self.refused && value.is_some() {
                        return Err(StorageError::Unavailable("QuotaExceededError".into()));
                    }
                    self.inner.update(&[(key, value)])
                },
            )
        }
    }

    #[test]
    fn test_failed_write_restores_earlier_slots() {
        let inner = MemoryStorage::new();
        let store = SlotTokenStore::new(inner.clone());
        store.set(&credential()).unwrap();

        let refusing = SlotTokenStore::new(RefusingStorage {
            inner,
            refused: USER_KEY,
        });
        let rotated = Credential::new("access-2", "refresh-2", UserProfile::default());

        assert!(refusing.set(&rotated).is_err());
        assert_eq!(store.get(), Some(credential()));
    }

    #[test]
    fn test_failed_first_write_leaves_empty_store_empty() {
        let refusing = SlotTokenStore::new(RefusingStorage {
            inner: MemoryStorage::new(),
            refused: REFRESH_TOKEN_KEY,
        });

        assert!(refusing.set(&credential()).is_err());
        assert!(refusing.get().is_none());
        assert!(refusing.storage().get_item(ACCESS_TOKEN_KEY).unwrap().is_none());
    }
}
