//! The tree: descent, insert with split propagation, search and lazy loading.
//!
//! The root is always an interior node, so a fresh tree has height 2: one
//! interior root whose single entry routes every key to one empty leaf.
//! Height only grows, by one, when the root itself splits.

use std::sync::Arc;

use crate::config::{ConfigError, TreeConfig};
use crate::storage::btree::codec::{self, CodecError, MAX_LENGTH};
use crate::storage::btree::interior::{Child, InteriorInsert, InteriorNode};
use crate::storage::btree::leaf::{LeafInsert, LeafNode, NextLeaf};
use crate::storage::btree::node::{
    Comparator, Hash, Node, NodeArena, NodeId, NodeState, NodeType, TreeNode, compare_keys,
    content_hash,
};
use crate::storage::{Database, DatabaseError, to_hex};

/// A content-addressed B+ tree.
///
/// Nodes live in memory until [`commit`](Self::commit) writes the changed
/// ones to the backing [`Database`], keyed by the hash of their encoding. A
/// tree opened from a root hash loads nodes lazily as descents reach them,
/// which is why reads take `&mut self`.
pub struct BTree<D> {
    pub(super) db: D,
    pub(super) nodes: NodeArena,
    pub(super) root: NodeId,
    /// Leftmost leaf, the start of a full scan.
    pub(super) first: NodeId,
    pub(super) leaf_count: usize,
    pub(super) interior_count: usize,
    pub(super) height: usize,
    pub(super) config: TreeConfig,
    pub(super) cmp: Comparator,
    /// Root hash of the last successful commit, or the hash the tree was
    /// opened from.
    pub(super) committed: Option<Hash>,
}

/// Node counters of a tree.
///
/// For a tree opened from storage the counts cover the nodes loaded so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub leaf_count: usize,
    pub interior_count: usize,
    pub height: usize,
}

impl<D: Database> BTree<D> {
    /// Create an empty tree ordered by [`compare_keys`].
    pub fn new(db: D, config: TreeConfig) -> Result<Self, BTreeError> {
        Self::with_comparator(db, config, compare_keys)
    }

    /// Create an empty tree with a custom key order.
    pub fn with_comparator(
        db: D,
        config: TreeConfig,
        cmp: Comparator,
    ) -> Result<Self, BTreeError> {
        config.validate()?;

        let mut nodes = NodeArena::new();
        let leaf = nodes.alloc(Node::Leaf(LeafNode::new(None, config.max_leaf_records)));
        let root = nodes.alloc(Node::Interior(InteriorNode::with_largest_child(
            None,
            config.high_key(),
            Child::Loaded(leaf),
            config.max_interior_entries,
        )));
        nodes.get_mut(leaf).set_parent(Some(root));

        Ok(Self {
            db,
            nodes,
            root,
            first: leaf,
            leaf_count: 1,
            interior_count: 1,
            height: 2,
            config,
            cmp,
            committed: None,
        })
    }

    /// Open a committed tree by its root hash.
    ///
    /// Only the root and the leftmost path are loaded; every other node is
    /// fetched the first time a descent reaches it.
    pub fn open(db: D, config: TreeConfig, root_hash: Hash) -> Result<Self, BTreeError> {
        Self::open_with_comparator(db, config, root_hash, compare_keys)
    }

    /// Open a committed tree that was built with a custom key order.
    pub fn open_with_comparator(
        db: D,
        config: TreeConfig,
        root_hash: Hash,
        cmp: Comparator,
    ) -> Result<Self, BTreeError> {
        config.validate()?;

        let root = load_node(&db, &config, cmp, &root_hash)?;
        if let Node::Leaf(_) = root {
            return Err(BTreeError::Corrupt {
                hash: root_hash,
                source: CodecError::UnexpectedNodeType {
                    expected: NodeType::Interior,
                    actual: NodeType::Leaf,
                },
            });
        }

        let mut nodes = NodeArena::new();
        let root = nodes.alloc(root);
        let mut tree = Self {
            db,
            nodes,
            root,
            first: root,
            leaf_count: 0,
            interior_count: 1,
            height: 1,
            config,
            cmp,
            committed: Some(root_hash),
        };

        let mut current = root;
        while let Node::Interior(_) = tree.nodes.get(current) {
            current = tree.resolve_child(current, 0)?;
            tree.height += 1;
        }
        tree.first = current;

        tracing::debug!(
            "opened tree {} with height {}",
            to_hex(&root_hash),
            tree.height
        );
        Ok(tree)
    }

    /// Look up the value stored under `key`.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BTreeError> {
        self.check_key(key)?;
        let (leaf, _, _) = self.descend(key)?;
        Ok(self.nodes.leaf(leaf).get(key, self.cmp).map(<[u8]>::to_vec))
    }

    /// Insert or update a record.
    ///
    /// Returns the previous value if `key` was already present.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<Option<Vec<u8>>, BTreeError> {
        self.check_key(key)?;
        check_value_length(value.len())?;
        let (leaf, parent, index) = self.descend(key)?;

        let old = match self.nodes.leaf_mut(leaf).insert(key, value, self.cmp) {
            LeafInsert::Updated(old) => Some(old),
            LeafInsert::Inserted => None,
            LeafInsert::Split { split_key, right } => {
                self.link_leaf_split(leaf, parent, index, key, split_key, right);
                None
            }
        };

        self.mark_path_dirty(leaf);
        Ok(old)
    }

    /// Node counters.
    #[must_use]
    pub const fn stats(&self) -> TreeStats {
        TreeStats {
            leaf_count: self.leaf_count,
            interior_count: self.interior_count,
            height: self.height,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        &self.config
    }

    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// The leftmost leaf.
    #[must_use]
    pub const fn first_leaf(&self) -> NodeId {
        self.first
    }

    /// A resident node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(id)
    }

    /// The backing store.
    #[must_use]
    pub const fn database(&self) -> &D {
        &self.db
    }

    pub(super) fn check_key(&self, key: &[u8]) -> Result<(), BTreeError> {
        if key.len() == self.config.key_length {
            Ok(())
        } else {
            Err(BTreeError::KeyLength {
                expected: self.config.key_length,
                actual: key.len(),
            })
        }
    }

    /// Walk from the root to the leaf responsible for `key`.
    ///
    /// Returns the leaf, its parent and the index of the parent entry that
    /// routed to it.
    pub(super) fn descend(&mut self, key: &[u8]) -> Result<(NodeId, NodeId, usize), BTreeError> {
        let mut parent = self.root;
        loop {
            let index = self.nodes.interior(parent).find(key, self.cmp);
            let child = self.resolve_child(parent, index)?;
            match self.nodes.get(child) {
                Node::Leaf(_) => return Ok((child, parent, index)),
                Node::Interior(_) => parent = child,
            }
        }
    }

    /// Id of the child at `index` of `parent`, loading it from the store if
    /// it is not resident yet.
    pub(super) fn resolve_child(
        &mut self,
        parent: NodeId,
        index: usize,
    ) -> Result<NodeId, BTreeError> {
        let hash = match self.nodes.interior(parent).child(index) {
            Child::Loaded(id) => return Ok(id),
            Child::Stored(hash) => hash,
        };

        let mut node = load_node(&self.db, &self.config, self.cmp, &hash)?;
        node.set_parent(Some(parent));
        match node {
            Node::Leaf(_) => self.leaf_count += 1,
            Node::Interior(_) => self.interior_count += 1,
        }

        let id = self.nodes.alloc(node);
        self.nodes.interior_mut(parent).resolve_child(index, id);
        tracing::debug!("loaded node {} as {id}", to_hex(&hash));
        Ok(id)
    }

    /// The leaf after `leaf` in key order, or `None` for the last leaf.
    pub(super) fn next_leaf(&mut self, leaf: NodeId) -> Result<Option<NodeId>, BTreeError> {
        match self.nodes.leaf(leaf).next() {
            NextLeaf::Leaf(next) => Ok(Some(next)),
            NextLeaf::End => Ok(None),
            NextLeaf::Unlinked => {
                let next = self.successor(leaf)?;
                self.nodes
                    .leaf_mut(leaf)
                    .set_next(next.map_or(NextLeaf::End, NextLeaf::Leaf));
                Ok(next)
            }
        }
    }

    /// Find the next leaf through the tree structure: climb to the first
    /// ancestor with a child to the right, then take that child's leftmost
    /// leaf.
    fn successor(&mut self, leaf: NodeId) -> Result<Option<NodeId>, BTreeError> {
        let mut current = leaf;
        while let Some(parent) = self.nodes.get(current).parent() {
            let node = self.nodes.interior(parent);
            let Some(index) = node.position_of(current) else {
                panic!("node {current} is not a child of its parent {parent}");
            };

            if index + 1 < node.count() {
                let mut next = self.resolve_child(parent, index + 1)?;
                while let Node::Interior(_) = self.nodes.get(next) {
                    next = self.resolve_child(next, 0)?;
                }
                return Ok(Some(next));
            }
            current = parent;
        }
        Ok(None)
    }

    /// Wire a freshly split leaf into the tree.
    ///
    /// The parent entry that routed to `leaf` keeps its upper bound, which now
    /// belongs to the right half, so it is repointed there. The left half is
    /// then inserted into the parent under `split_key`.
    fn link_leaf_split(
        &mut self,
        leaf: NodeId,
        parent: NodeId,
        index: usize,
        key: &[u8],
        split_key: Vec<u8>,
        right: LeafNode,
    ) {
        let right = self.nodes.alloc(Node::Leaf(right));
        self.leaf_count += 1;

        self.nodes.leaf_mut(leaf).set_next(NextLeaf::Leaf(right));
        self.nodes.get_mut(right).set_parent(Some(parent));
        self.nodes
            .interior_mut(parent)
            .set_child(index, Child::Loaded(right));
        tracing::debug!("split leaf {leaf} into {leaf} and {right}");

        self.insert_into_interior(parent, key, split_key, leaf);
    }

    /// Insert `(split_key, child)` into `target`, propagating splits upward.
    ///
    /// `key` is the key whose insert caused the split; it re-finds each
    /// grandparent entry on the way up.
    fn insert_into_interior(
        &mut self,
        mut target: NodeId,
        key: &[u8],
        mut split_key: Vec<u8>,
        mut child: NodeId,
    ) {
        loop {
            let outcome = self
                .nodes
                .interior_mut(target)
                .insert(split_key, Child::Loaded(child), self.cmp);
            self.nodes.get_mut(child).set_parent(Some(target));

            let InteriorInsert::Split {
                split_key: pivot,
                right,
            } = outcome
            else {
                return;
            };

            let right = self.nodes.alloc(Node::Interior(right));
            self.interior_count += 1;
            self.adopt_children(right);
            tracing::debug!("split interior node {target} into {target} and {right}");

            let Some(grandparent) = self.nodes.get(target).parent() else {
                self.grow_root(target, pivot, right);
                return;
            };

            let index = self.nodes.interior(grandparent).find(key, self.cmp);
            self.nodes
                .interior_mut(grandparent)
                .set_child(index, Child::Loaded(right));
            self.nodes.get_mut(right).set_parent(Some(grandparent));

            split_key = pivot;
            child = target;
            target = grandparent;
        }
    }

    /// Point every resident child of `id` back at it.
    fn adopt_children(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.nodes.interior(id).loaded_children().collect();
        for child in children {
            self.nodes.get_mut(child).set_parent(Some(id));
        }
    }

    /// Put a new root above a split root: `right` becomes its largest child
    /// and `old_root` is inserted under `pivot`.
    fn grow_root(&mut self, old_root: NodeId, pivot: Vec<u8>, right: NodeId) {
        let upper = self
            .nodes
            .get(right)
            .largest_key()
            .map_or_else(|| self.config.high_key(), <[u8]>::to_vec);

        let root = self.nodes.alloc(Node::Interior(InteriorNode::with_largest_child(
            None,
            upper,
            Child::Loaded(right),
            self.config.max_interior_entries,
        )));
        self.interior_count += 1;

        let outcome = self
            .nodes
            .interior_mut(root)
            .insert(pivot, Child::Loaded(old_root), self.cmp);
        debug_assert!(matches!(outcome, InteriorInsert::Inserted));

        self.nodes.get_mut(old_root).set_parent(Some(root));
        self.nodes.get_mut(right).set_parent(Some(root));
        self.root = root;
        self.height += 1;
        tracing::debug!("grew root {root}, height is now {}", self.height);
    }

    /// Mark `id` and all of its ancestors dirty.
    pub(super) fn mark_path_dirty(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.nodes.get_mut(id);
            node.state_mut().mark_dirty();
            current = node.parent();
        }
    }
}

impl<D> std::fmt::Debug for BTree<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree")
            .field("root", &self.root)
            .field("first", &self.first)
            .field("stats", &(self.leaf_count, self.interior_count, self.height))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Fetch, verify and decode the node stored under `hash`.
fn load_node<D: Database>(
    db: &D,
    config: &TreeConfig,
    cmp: Comparator,
    hash: &Hash,
) -> Result<Node, BTreeError> {
    let data = db.get(hash)?.ok_or(BTreeError::MissingNode(*hash))?;

    let actual = content_hash(&data);
    if actual != *hash {
        return Err(BTreeError::HashMismatch {
            expected: *hash,
            actual,
        });
    }

    let mut node = codec::decode(&data, config, cmp).map_err(|source| BTreeError::Corrupt {
        hash: *hash,
        source,
    })?;
    *node.state_mut() = NodeState::clean(*hash, Arc::from(data));
    Ok(node)
}

/// Values are written behind a `u32` length prefix.
const fn check_value_length(len: usize) -> Result<(), BTreeError> {
    if len > MAX_LENGTH {
        return Err(BTreeError::ValueTooLarge {
            len,
            max: MAX_LENGTH,
        });
    }
    Ok(())
}

/// Errors that can occur in B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// The tree configuration is invalid.
    Config(ConfigError),
    /// A key does not have the tree's declared length.
    KeyLength { expected: usize, actual: usize },
    /// A value is longer than the node encoding can represent.
    ValueTooLarge { len: usize, max: usize },
    /// The backing store failed.
    Database(DatabaseError),
    /// A stored node does not decode.
    Corrupt { hash: Hash, source: CodecError },
    /// The store has no object for a referenced node.
    MissingNode(Hash),
    /// A stored object does not hash to the address it was fetched from.
    HashMismatch { expected: Hash, actual: Hash },
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config error: {e}"),
            Self::KeyLength { expected, actual } => {
                write!(f, "key is {actual} bytes, expected {expected}")
            }
            Self::ValueTooLarge { len, max } => {
                write!(f, "value is {len} bytes, at most {max} are allowed")
            }
            Self::Database(e) => write!(f, "database error: {e}"),
            Self::Corrupt { hash, source } => {
                write!(f, "corrupt node {}: {source}", to_hex(hash))
            }
            Self::MissingNode(hash) => write!(f, "missing node {}", to_hex(hash)),
            Self::HashMismatch { expected, actual } => write!(
                f,
                "node fetched as {} hashes to {}",
                to_hex(expected),
                to_hex(actual)
            ),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Database(e) => Some(e),
            Self::Corrupt { source, .. } => Some(source),
            Self::KeyLength { .. }
            | Self::ValueTooLarge { .. }
            | Self::MissingNode(_)
            | Self::HashMismatch { .. } => None,
        }
    }
}

impl From<ConfigError> for BTreeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<DatabaseError> for BTreeError {
    fn from(e: DatabaseError) -> Self {
        Self::Database(e)
    }
}
