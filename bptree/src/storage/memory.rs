//! In-memory content-addressed store.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::storage::{Database, DatabaseError};

/// A [`Database`] held entirely in memory.
///
/// Thread-safe: uses `RwLock` so concurrent readers do not block each other.
#[derive(Debug, Default)]
pub struct MemDatabase {
    objects: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemDatabase {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    #[must_use]
    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Whether the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an object is stored under `key`.
    #[must_use]
    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    pub fn contains(&self, key: &[u8]) -> bool {
        self.objects.read().expect("lock poisoned").contains_key(key)
    }
}

impl Database for MemDatabase {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| DatabaseError::LockPoisoned)?;
        objects
            .entry(key.to_vec())
            .or_insert_with(|| value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| DatabaseError::LockPoisoned)?;
        Ok(objects.get(key).map(|value| value.to_vec()))
    }
}
