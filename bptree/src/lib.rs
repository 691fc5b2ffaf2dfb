//! An embedded, content-addressed B+ tree.
//!
//! Records live in memory until [`BTree::commit`](storage::btree::BTree::commit)
//! writes every changed node to a [`Database`](storage::Database) under the
//! SHA-256 hash of its encoding. A committed tree is identified by its root
//! hash alone and can be reopened from it, loading nodes as they are needed.
//!
//! Modules:
//! - [`config`]: fan-outs and key length
//! - [`bytes`]: fixed-width big-endian integer keys
//! - [`storage`]: the object store trait, its implementations and the tree
//! - [`simulation`]: a fault-injecting store for deterministic tests

pub mod bytes;
pub mod config;
pub mod simulation;
pub mod storage;

#[cfg(test)]
mod testing;
