//! Content-addressed object storage and the tree built on top of it.
//!
//! Tree nodes are persisted as immutable objects keyed by the SHA-256 hash of
//! their encoded bytes. The store itself is an external collaborator behind the
//! [`Database`] trait, so the tree can run against memory, a directory of
//! object files, or a fault-injecting wrapper in tests.
//!
//! # Usage
//!
//! ```
//! use bptree::storage::{Database, MemDatabase};
//!
//! let db = MemDatabase::new();
//! db.put(b"hash", b"bytes").expect("put");
//! assert_eq!(db.get(b"hash").expect("get"), Some(b"bytes".to_vec()));
//! ```

pub mod btree;
mod file;
mod memory;

use std::sync::Arc;

pub use file::DirDatabase;
pub use memory::MemDatabase;

/// Errors that can occur in a [`Database`] implementation.
#[derive(Debug)]
pub enum DatabaseError {
    /// I/O error.
    Io(std::io::Error),
    /// Stored bytes failed an integrity check.
    Corruption(String),
    /// Injected fault for simulation.
    InjectedFault(String),
    /// A lock guarding the store was poisoned by a panicking writer.
    LockPoisoned,
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
            Self::LockPoisoned => write!(f, "database lock poisoned"),
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DatabaseError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// A content-addressed key-value store.
///
/// Keys are content hashes and values are the bytes that hash to them, so a
/// value is never overwritten with different content under the same key.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `get` returns the bytes of the last successful `put` for that key
/// - `put` of identical bytes under an existing key is a no-op in effect
/// - a failed `put` leaves no partially visible value behind
pub trait Database {
    /// Store `value` under `key`.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError>;

    /// Fetch the value stored under `key`, or `None` if there is none.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError>;
}

impl<D: Database + ?Sized> Database for &D {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        (**self).put(key, value)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        (**self).get(key)
    }
}

impl<D: Database + ?Sized> Database for Arc<D> {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        (**self).put(key, value)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        (**self).get(key)
    }
}

/// Lowercase hex rendering of a hash, for logs and file names.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_display() {
        let e = DatabaseError::InjectedFault("test fault".to_string());
        assert!(e.to_string().contains("test fault"));

        let e = DatabaseError::Corruption("checksum mismatch".to_string());
        assert_eq!(e.to_string(), "corruption: checksum mismatch");
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0xAB, 0x0F]), "00ab0f");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_shared_database_through_arc() {
        let db = Arc::new(MemDatabase::new());
        #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
        let shared = Arc::clone(&db);

        shared.put(b"k", b"v").expect("put through arc");
        assert_eq!(db.get(b"k").expect("get"), Some(b"v".to_vec()));
        assert_eq!((&*db).get(b"missing").expect("get by ref"), None);
    }
}
