//! Node types shared by leaves and interior nodes.
//!
//! Nodes live in a [`NodeArena`] and refer to each other by [`NodeId`]. Parent
//! and sibling links are plain ids, so the parent/child/next graph has no
//! ownership cycles. The arena never frees a node: the tree has no delete path.

use std::cmp::Ordering;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::storage::btree::interior::InteriorNode;
use crate::storage::btree::leaf::LeafNode;

/// Size of a node content hash in bytes (SHA-256).
pub const HASH_SIZE: usize = 32;

/// Content hash of an encoded node; also its key in the backing store.
pub type Hash = [u8; HASH_SIZE];

/// Total order over keys.
pub type Comparator = fn(&[u8], &[u8]) -> Ordering;

/// Default comparator: lexicographic byte order.
#[must_use]
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Hash encoded node bytes.
#[must_use]
pub fn content_hash(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// Node kind tag, the first byte of every encoded node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Leaf = 0,
    Interior = 1,
}

impl TryFrom<u8> for NodeType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Leaf),
            1 => Ok(Self::Interior),
            _ => Err(value),
        }
    }
}

/// Stable handle of a node inside its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A key/value record stored in a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Persistence state of a node.
///
/// `Clean -> (mutation) -> Dirty -> (commit persisted) -> Clean`.
/// The cached hash and encoding describe the last committed content; while the
/// node is dirty they are stale.
#[derive(Debug, Clone, Default)]
pub struct NodeState {
    dirty: bool,
    cached_hash: Option<Hash>,
    cached_encoding: Option<Arc<[u8]>>,
}

impl NodeState {
    /// State of a freshly created node: dirty, never hashed.
    #[must_use]
    pub const fn new_dirty() -> Self {
        Self {
            dirty: true,
            cached_hash: None,
            cached_encoding: None,
        }
    }

    /// State of a node just loaded from the store under `hash`.
    #[must_use]
    pub const fn clean(hash: Hash, encoding: Arc<[u8]>) -> Self {
        Self {
            dirty: false,
            cached_hash: Some(hash),
            cached_encoding: Some(encoding),
        }
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Hash of the last encoding computed for this node.
    #[must_use]
    pub const fn cached_hash(&self) -> Option<Hash> {
        self.cached_hash
    }

    /// The last encoding computed for this node.
    #[must_use]
    pub fn cached_encoding(&self) -> Option<&[u8]> {
        self.cached_encoding.as_deref()
    }

    pub(crate) const fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) const fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn set_cache(&mut self, hash: Hash, encoding: Arc<[u8]>) {
        self.cached_hash = Some(hash);
        self.cached_encoding = Some(encoding);
    }
}

/// Capabilities shared by leaf and interior nodes.
pub trait TreeNode {
    /// Which kind of node this is.
    fn node_type(&self) -> NodeType;

    /// Number of records (leaf) or entries (interior).
    fn count(&self) -> usize;

    /// Whether the node is at capacity.
    fn is_full(&self) -> bool;

    /// The interior node that routes to this node; `None` for the root.
    fn parent(&self) -> Option<NodeId>;

    fn set_parent(&mut self, parent: Option<NodeId>);

    fn state(&self) -> &NodeState;

    fn state_mut(&mut self) -> &mut NodeState;

    /// Largest key held (leaf) or last boundary key (interior).
    fn largest_key(&self) -> Option<&[u8]>;
}

/// A tree node: either kind.
#[derive(Debug)]
pub enum Node {
    Leaf(LeafNode),
    Interior(InteriorNode),
}

impl Node {
    #[must_use]
    pub const fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            Self::Interior(_) => None,
        }
    }

    #[must_use]
    pub const fn as_interior(&self) -> Option<&InteriorNode> {
        match self {
            Self::Interior(interior) => Some(interior),
            Self::Leaf(_) => None,
        }
    }

    fn inner(&self) -> &dyn TreeNode {
        match self {
            Self::Leaf(leaf) => leaf,
            Self::Interior(interior) => interior,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn TreeNode {
        match self {
            Self::Leaf(leaf) => leaf,
            Self::Interior(interior) => interior,
        }
    }
}

impl TreeNode for Node {
    fn node_type(&self) -> NodeType {
        self.inner().node_type()
    }

    fn count(&self) -> usize {
        self.inner().count()
    }

    fn is_full(&self) -> bool {
        self.inner().is_full()
    }

    fn parent(&self) -> Option<NodeId> {
        self.inner().parent()
    }

    fn set_parent(&mut self, parent: Option<NodeId>) {
        self.inner_mut().set_parent(parent);
    }

    fn state(&self) -> &NodeState {
        self.inner().state()
    }

    fn state_mut(&mut self) -> &mut NodeState {
        self.inner_mut().state_mut()
    }

    fn largest_key(&self) -> Option<&[u8]> {
        self.inner().largest_key()
    }
}

/// Owner of every in-memory node of one tree.
///
/// Asking for a leaf where an interior node lives (or the reverse) is a broken
/// structural invariant and panics.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    #[must_use]
    pub const fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Take ownership of `node` and return its id.
    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Number of nodes ever allocated.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    #[must_use]
    pub fn leaf(&self, id: NodeId) -> &LeafNode {
        match self.get(id) {
            Node::Leaf(leaf) => leaf,
            Node::Interior(_) => panic!("node {id} is an interior node, expected a leaf"),
        }
    }

    pub fn leaf_mut(&mut self, id: NodeId) -> &mut LeafNode {
        match self.get_mut(id) {
            Node::Leaf(leaf) => leaf,
            Node::Interior(_) => panic!("node {id} is an interior node, expected a leaf"),
        }
    }

    #[must_use]
    pub fn interior(&self, id: NodeId) -> &InteriorNode {
        match self.get(id) {
            Node::Interior(interior) => interior,
            Node::Leaf(_) => panic!("node {id} is a leaf, expected an interior node"),
        }
    }

    pub fn interior_mut(&mut self, id: NodeId) -> &mut InteriorNode {
        match self.get_mut(id) {
            Node::Interior(interior) => interior,
            Node::Leaf(_) => panic!("node {id} is a leaf, expected an interior node"),
        }
    }
}
