//! Content-addressed B+ tree.
//!
//! # Structure
//!
//! - Interior nodes: sorted (boundary key, child) entries; a child is either
//!   resident or only known by its content hash
//! - Leaf nodes: sorted key/value records, chained in key order for range scans
//!
//! The root is always an interior node. Its last boundary key is the high key
//! (all `0xFF` bytes of the declared key length), so every key has a route.
//!
//! # Persistence
//!
//! Mutations only touch memory and mark the changed root-to-leaf path dirty.
//! [`BTree::commit`] encodes and hashes the dirty nodes in post-order and
//! writes each one to the [`Database`](crate::storage::Database) under its
//! SHA-256 hash. [`BTree::open`] goes the other way, loading nodes on demand.
//!
//! # Usage
//!
//! ```
//! use bptree::bytes::int64_to_bytes;
//! use bptree::config::TreeConfig;
//! use bptree::storage::MemDatabase;
//! use bptree::storage::btree::BTree;
//!
//! let db = MemDatabase::new();
//! let mut tree = BTree::new(&db, TreeConfig::default()).expect("create tree");
//! tree.insert(&int64_to_bytes(7), b"seven".to_vec()).expect("insert");
//! let root = tree.commit().expect("commit").root_hash;
//!
//! let mut reopened = BTree::open(&db, TreeConfig::default(), root).expect("open");
//! assert_eq!(
//!     reopened.get(&int64_to_bytes(7)).expect("get"),
//!     Some(b"seven".to_vec())
//! );
//! ```

mod codec;
mod commit;
mod interior;
mod leaf;
mod node;
mod range;
mod tree;
mod verify;

pub use codec::{
    CodecError, MAX_ENTRY_COUNT, MAX_LENGTH, decode, encode_interior, encode_leaf,
};
pub use commit::CommitSummary;
pub use interior::{Child, InteriorEntry, InteriorInsert, InteriorNode};
pub use leaf::{LeafInsert, LeafNode, NextLeaf};
pub use node::{
    Comparator, HASH_SIZE, Hash, Node, NodeArena, NodeId, NodeState, NodeType, Record, TreeNode,
    compare_keys, content_hash,
};
pub use range::RangeIter;
pub use tree::{BTree, BTreeError, TreeStats};
pub use verify::InvariantViolation;
