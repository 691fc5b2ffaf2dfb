//! Deterministic fault injection for storage tests.
//!
//! Every fault is drawn from a seeded RNG, so a failing run can be replayed
//! by reusing its seed.
//!
//! # Usage
//!
//! ```
//! use bptree::simulation::{FaultConfig, FaultyDatabase};
//! use bptree::storage::{Database, MemDatabase};
//!
//! let config = FaultConfig {
//!     fail_puts_after: Some(1),
//!     ..FaultConfig::none()
//! };
//! let db = FaultyDatabase::new(MemDatabase::new(), config, 12345);
//!
//! assert!(db.put(b"a", b"alpha").is_ok());
//! assert!(db.put(b"b", b"beta").is_err());
//! assert_eq!(db.put_count(), 2);
//! ```

mod storage;

pub use storage::{FaultConfig, FaultyDatabase};
