//! Tree configuration.
//!
//! Fan-out and key length can be tuned per tree. Defaults match the layout the
//! on-disk objects were designed around: 8-byte keys, 255 records per leaf and
//! 511 entries per interior node.
//!
//! # Environment Variables
//!
//! - `BPTREE_KEY_LENGTH`: declared key length in bytes (default: `8`)
//! - `BPTREE_MAX_LEAF_RECORDS`: leaf fan-out (default: `255`)
//! - `BPTREE_MAX_INTERIOR_ENTRIES`: interior fan-out (default: `511`)
//!
//! # Invariants
//!
//! - `1 <= key_length <= MAX_LENGTH`
//! - `max_leaf_records` is odd and `>= 3`, so both halves of a leaf split stay
//!   at or above `max_leaf_records / 2`
//! - `max_interior_entries >= 3`
//! - both fan-outs fit the encoded count field (`MAX_ENTRY_COUNT`)

use crate::storage::btree::{MAX_ENTRY_COUNT, MAX_LENGTH};

/// Default declared key length (big-endian `i64`).
pub const DEFAULT_KEY_LENGTH: usize = 8;

/// Default leaf fan-out (`MaxKV`).
pub const DEFAULT_MAX_LEAF_RECORDS: usize = 255;

/// Default interior fan-out (`MaxKC`).
pub const DEFAULT_MAX_INTERIOR_ENTRIES: usize = 511;

/// Shape parameters for a [`BTree`](crate::storage::btree::BTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// Every key in the tree has exactly this many bytes.
    pub key_length: usize,
    /// Maximum number of records in a leaf.
    pub max_leaf_records: usize,
    /// Maximum number of (boundary key, child) entries in an interior node.
    pub max_interior_entries: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            key_length: DEFAULT_KEY_LENGTH,
            max_leaf_records: DEFAULT_MAX_LEAF_RECORDS,
            max_interior_entries: DEFAULT_MAX_INTERIOR_ENTRIES,
        }
    }
}

/// Error returned when loading or validating configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl TreeConfig {
    /// Environment variable for the key length.
    pub const KEY_LENGTH_VAR: &'static str = "BPTREE_KEY_LENGTH";
    /// Environment variable for the leaf fan-out.
    pub const MAX_LEAF_RECORDS_VAR: &'static str = "BPTREE_MAX_LEAF_RECORDS";
    /// Environment variable for the interior fan-out.
    pub const MAX_INTERIOR_ENTRIES_VAR: &'static str = "BPTREE_MAX_INTERIOR_ENTRIES";

    /// Create a config with the given key length and default fan-outs.
    #[must_use]
    pub fn new(key_length: usize) -> Self {
        Self {
            key_length,
            ..Self::default()
        }
    }

    /// Replace the leaf fan-out.
    #[must_use]
    pub const fn with_max_leaf_records(mut self, max_leaf_records: usize) -> Self {
        self.max_leaf_records = max_leaf_records;
        self
    }

    /// Replace the interior fan-out.
    #[must_use]
    pub const fn with_max_interior_entries(mut self, max_interior_entries: usize) -> Self {
        self.max_interior_entries = max_interior_entries;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to the defaults. The result is validated.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but does not parse as an unsigned
    /// integer, or if the resulting config fails [`TreeConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            key_length: Self::load_usize(Self::KEY_LENGTH_VAR, DEFAULT_KEY_LENGTH)?,
            max_leaf_records: Self::load_usize(
                Self::MAX_LEAF_RECORDS_VAR,
                DEFAULT_MAX_LEAF_RECORDS,
            )?,
            max_interior_entries: Self::load_usize(
                Self::MAX_INTERIOR_ENTRIES_VAR,
                DEFAULT_MAX_INTERIOR_ENTRIES,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the config invariants listed in the module docs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_length == 0 || self.key_length > MAX_LENGTH {
            return Err(ConfigError::InvalidValue {
                name: Self::KEY_LENGTH_VAR.to_string(),
                message: format!("'{}' must be between 1 and {MAX_LENGTH}", self.key_length),
            });
        }

        if self.max_leaf_records < 3
            || self.max_leaf_records % 2 == 0
            || self.max_leaf_records > MAX_ENTRY_COUNT
        {
            return Err(ConfigError::InvalidValue {
                name: Self::MAX_LEAF_RECORDS_VAR.to_string(),
                message: format!(
                    "'{}' must be odd and between 3 and {MAX_ENTRY_COUNT}",
                    self.max_leaf_records
                ),
            });
        }

        if self.max_interior_entries < 3 || self.max_interior_entries > MAX_ENTRY_COUNT {
            return Err(ConfigError::InvalidValue {
                name: Self::MAX_INTERIOR_ENTRIES_VAR.to_string(),
                message: format!(
                    "'{}' must be between 3 and {MAX_ENTRY_COUNT}",
                    self.max_interior_entries
                ),
            });
        }

        Ok(())
    }

    /// The "unbounded above" boundary key: `key_length` bytes of `0xFF`.
    #[must_use]
    pub fn high_key(&self) -> Vec<u8> {
        vec![0xFF; self.key_length]
    }

    fn load_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
        match std::env::var(name) {
            Ok(value) => value
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: format!("'{value}' is not an unsigned integer"),
                }),
            Err(_) => Ok(default),
        }
    }
}
