//! File-backed storage for native front ends

use super::KeyValueStorage;
use crate::error::StorageError;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Persists all slots in one JSON document.
///
/// Updates are written to a sibling temp file and renamed over the
/// document, so readers see either the old or the new set of slots.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the document path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(items)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load()?.remove(key))
    }

    fn update(&self, entries: &[(&str, Option<&str>)]) -> Result<(), StorageError> {
        // An unreadable document is replaced rather than blocking logout.
        let mut items = self.load().unwrap_or_default();
        for (key, value) in entries {
            match value {
                Some(value) => {
                    items.insert((*key).to_string(), (*value).to_string());
                }
                None => {
                    items.remove(*key);
                }
            }
        }
        self.save(&items)
    }
}
