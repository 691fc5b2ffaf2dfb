//! Commit: hash dirty nodes bottom-up and write them to the store.
//!
//! A clean node keeps the hash it was last committed (or loaded) under, so an
//! untouched subtree is never re-encoded, re-hashed or re-written. Every
//! mutation dirties the whole path from the changed leaf to the root, which
//! makes "root is clean" mean "nothing to commit".
//!
//! Writes happen after the whole dirty set is hashed, children before parents.
//! A node is marked clean only once its own write succeeded, so after a
//! failed commit every ancestor of an unwritten node is still dirty and a
//! retry re-walks exactly what is missing.

use std::sync::Arc;

use crate::storage::btree::codec;
use crate::storage::btree::interior::Child;
use crate::storage::btree::node::{Hash, Node, NodeId, TreeNode, content_hash};
use crate::storage::btree::tree::{BTree, BTreeError};
use crate::storage::{Database, to_hex};

/// Result of a successful [`BTree::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    /// Hash of the committed root node.
    pub root_hash: Hash,
    /// Number of nodes written to the store by this commit.
    pub nodes_written: usize,
}

/// A freshly hashed node waiting to be written.
struct DirtyNode {
    hash: Hash,
    data: Arc<[u8]>,
    origin: NodeId,
}

impl<D: Database> BTree<D> {
    /// Persist every node changed since the last commit.
    ///
    /// On a storage failure the error is returned and the tree stays fully
    /// usable; nodes written before the failure are clean, the rest stay dirty
    /// and are written by the next call.
    pub fn commit(&mut self) -> Result<CommitSummary, BTreeError> {
        if let Some(root_hash) = self.clean_hash(self.root) {
            return Ok(CommitSummary {
                root_hash,
                nodes_written: 0,
            });
        }

        let dirty = self.hash_dirty_nodes();
        let root_hash = self.child_hash(Child::Loaded(self.root));
        let total = dirty.len();

        for (written, node) in dirty.iter().enumerate() {
            if let Err(e) = self.db.put(&node.hash, &node.data) {
                tracing::warn!("commit failed after writing {written} of {total} nodes: {e}");
                return Err(e.into());
            }
            self.nodes.get_mut(node.origin).state_mut().mark_clean();
        }

        self.committed = Some(root_hash);
        tracing::info!("committed {total} nodes, root {}", to_hex(&root_hash));
        Ok(CommitSummary {
            root_hash,
            nodes_written: total,
        })
    }

    /// Root hash of the last successful commit, or of the stored tree this
    /// tree was opened from.
    #[must_use]
    pub const fn root_hash(&self) -> Option<Hash> {
        self.committed
    }

    /// Whether any node changed since the last commit.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.nodes.get(self.root).state().is_dirty()
    }

    /// Encode and hash every dirty node in post-order, caching each result on
    /// its node.
    fn hash_dirty_nodes(&mut self) -> Vec<DirtyNode> {
        let mut dirty = Vec::new();
        // (node, children already hashed)
        let mut stack = vec![(self.root, false)];

        while let Some((id, children_done)) = stack.pop() {
            if !self.nodes.get(id).state().is_dirty() {
                continue;
            }

            let data = match self.nodes.get(id) {
                Node::Leaf(leaf) => codec::encode_leaf(leaf),
                Node::Interior(node) if !children_done => {
                    stack.push((id, true));
                    stack.extend(node.loaded_children().rev().map(|child| (child, false)));
                    continue;
                }
                Node::Interior(node) => {
                    let hashes: Vec<Hash> = node
                        .entries()
                        .iter()
                        .map(|entry| self.child_hash(entry.child))
                        .collect();
                    codec::encode_interior(node, &hashes)
                }
            };

            let hash = content_hash(&data);
            let data: Arc<[u8]> = Arc::from(data);
            #[allow(clippy::disallowed_methods)] // The node and the write set share the encoding
            let cached = Arc::clone(&data);
            self.nodes.get_mut(id).state_mut().set_cache(hash, cached);
            dirty.push(DirtyNode {
                hash,
                data,
                origin: id,
            });
        }

        dirty
    }

    /// Content hash of a child that has already been hashed.
    fn child_hash(&self, child: Child) -> Hash {
        match child {
            Child::Stored(hash) => hash,
            Child::Loaded(id) => match self.nodes.get(id).state().cached_hash() {
                Some(hash) => hash,
                None => panic!("node {id} is referenced before it was hashed"),
            },
        }
    }

    fn clean_hash(&self, id: NodeId) -> Option<Hash> {
        let state = self.nodes.get(id).state();
        if state.is_dirty() {
            None
        } else {
            state.cached_hash()
        }
    }
}
