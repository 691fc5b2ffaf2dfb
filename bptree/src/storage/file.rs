//! Directory-backed content-addressed store.
//!
//! Each object lives in its own file:
//!
//! ```text
//! <root>/<hex[0..2]>/<hex>
//! ```
//!
//! # File Format
//!
//! - `checksum`: 4 bytes (CRC32 of the payload, little-endian)
//! - `payload`: remaining bytes
//!
//! Objects are written to a temporary file in the same directory and renamed
//! into place, so a reader never observes a half-written object.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::storage::{Database, DatabaseError, to_hex};

/// Size of the checksum prefix on every object file.
const CHECKSUM_SIZE: usize = 4;

/// A [`Database`] that stores one file per object under a root directory.
#[derive(Debug)]
pub struct DirDatabase {
    root: PathBuf,
    /// Disambiguates temporary file names between concurrent writers.
    temp_counter: AtomicU64,
}

impl DirDatabase {
    /// Open (creating if necessary) a store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, DatabaseError> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            temp_counter: AtomicU64::new(0),
        })
    }

    /// The root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding the object stored under `key`.
    fn object_path(&self, key: &[u8]) -> Result<PathBuf, DatabaseError> {
        if key.is_empty() {
            return Err(DatabaseError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty object key",
            )));
        }
        let name = to_hex(key);
        Ok(self.root.join(&name[..2]).join(name))
    }
}

impl Database for DirDatabase {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        let path = self.object_path(key)?;
        if path.exists() {
            // Content-addressed: the existing file already holds these bytes.
            return Ok(());
        }

        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        let counter = self.temp_counter.fetch_add(1, Ordering::SeqCst);
        let temp_path = dir.join(format!(".tmp-{}-{counter}", std::process::id()));

        let checksum = crc32fast::hash(value);
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&checksum.to_le_bytes())?;
        file.write_all(value)?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(DatabaseError::Io(e));
        }

        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        let path = self.object_path(key)?;
        let mut bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DatabaseError::Io(e)),
        };

        if bytes.len() < CHECKSUM_SIZE {
            return Err(DatabaseError::Corruption(format!(
                "object {} is {} bytes, shorter than its checksum",
                to_hex(key),
                bytes.len()
            )));
        }

        let expected = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let payload = bytes.split_off(CHECKSUM_SIZE);
        let actual = crc32fast::hash(&payload);
        if expected != actual {
            return Err(DatabaseError::Corruption(format!(
                "object {}: checksum mismatch: expected {expected}, got {actual}",
                to_hex(key)
            )));
        }

        Ok(Some(payload))
    }
}
