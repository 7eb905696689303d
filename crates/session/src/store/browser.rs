//! `localStorage` backend for the browser build

use super::{KeyValueStorage, apply_entries};
use crate::error::StorageError;
use gloo::storage::{LocalStorage, Storage};

/// Slots live in the origin's `localStorage`, shared by every view of the
/// same browsing context.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserStorage;

impl BrowserStorage {
    pub fn new() -> Self {
        Self
    }
}

impl KeyValueStorage for BrowserStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        LocalStorage::raw().get_item(key).map_err(unavailable)
    }

    fn update(&self, entries: &[(&str, Option<&str>)]) -> Result<(), StorageError> {
        let storage = LocalStorage::raw();
        apply_entries(
            entries,
            |key| storage.get_item(key).map_err(unavailable),
            |key, value| {
                match value {
                    Some(value) => storage.set_item(key, value),
                    None => storage.remove_item(key),
                }
                .map_err(unavailable)
            },
        )
    }
}

fn unavailable(err: impl std::fmt::Debug) -> StorageError {
    StorageError::Unavailable(format!("{err:?}"))
}
