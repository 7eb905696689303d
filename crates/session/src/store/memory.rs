//! In-memory storage backend

use super::KeyValueStorage;
use crate::error::StorageError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Ephemeral storage; clones share the same slots.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    items: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.borrow().get(key).cloned())
    }

    fn update(&self, entries: &[(&str, Option<&str>)]) -> Result<(), StorageError> {
        let mut items = self.items.borrow_mut();
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
        Ok(())
    }
}
