//! Interior nodes: sorted runs of (boundary key, child) entries.
//!
//! Entry `i` routes every key `k` with `key[i-1] <= k < key[i]` to its child.
//! The last entry's key is the node's own upper bound (the key its parent
//! stores for it, or the all-`0xFF` high key at the root) and is never
//! consulted while routing, so the last child also receives every key at or
//! above the previous boundary.

use std::cmp::Ordering;

use crate::storage::btree::node::{Comparator, Hash, NodeId, NodeState, NodeType, TreeNode};

/// Reference from an interior entry to its child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Child {
    /// The child is resident in the arena.
    Loaded(NodeId),
    /// The child is only known by the hash it is stored under; it is fetched
    /// on first access.
    Stored(Hash),
}

impl Child {
    /// The arena id if the child is resident.
    #[must_use]
    pub const fn loaded(self) -> Option<NodeId> {
        match self {
            Self::Loaded(id) => Some(id),
            Self::Stored(_) => None,
        }
    }
}

/// One routing entry of an interior node.
#[derive(Debug, Clone)]
pub struct InteriorEntry {
    pub key: Vec<u8>,
    pub child: Child,
}

/// Outcome of [`InteriorNode::insert`].
#[derive(Debug)]
pub enum InteriorInsert {
    Inserted,
    /// The node overflowed and split. `right` holds the upper entries and has
    /// no id or parent yet; `split_key` must be inserted into the parent with
    /// this (left) node as its child.
    Split { split_key: Vec<u8>, right: InteriorNode },
}

/// An interior B+ tree node.
#[derive(Debug)]
pub struct InteriorNode {
    entries: Vec<InteriorEntry>,
    max_entries: usize,
    parent: Option<NodeId>,
    state: NodeState,
}

impl InteriorNode {
    /// Create a new empty, dirty interior node.
    #[must_use]
    pub fn new(parent: Option<NodeId>, max_entries: usize) -> Self {
        Self {
            // One extra slot for the entry that overflows a full node.
            entries: Vec::with_capacity(max_entries + 1),
            max_entries,
            parent,
            state: NodeState::new_dirty(),
        }
    }

    /// Create a node whose single entry is its largest child.
    ///
    /// `key` is the child's upper bound: its own largest key, or the high key
    /// when the child is still empty.
    #[must_use]
    pub fn with_largest_child(
        parent: Option<NodeId>,
        key: Vec<u8>,
        child: Child,
        max_entries: usize,
    ) -> Self {
        let mut node = Self::new(parent, max_entries);
        node.entries.push(InteriorEntry { key, child });
        node
    }

    /// Rebuild an interior node from decoded entries.
    #[must_use]
    pub const fn from_entries(
        entries: Vec<InteriorEntry>,
        max_entries: usize,
        state: NodeState,
    ) -> Self {
        Self {
            entries,
            max_entries,
            parent: None,
            state,
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[InteriorEntry] {
        &self.entries
    }

    #[must_use]
    pub fn child(&self, index: usize) -> Child {
        self.entries[index].child
    }

    /// Point entry `index` at a different child, keeping its boundary key.
    pub fn set_child(&mut self, index: usize, child: Child) {
        self.entries[index].child = child;
        self.state.mark_dirty();
    }

    /// Record that the child at `index` is now resident as `id`.
    ///
    /// Unlike [`set_child`](Self::set_child) this does not change the node's
    /// content, so the node stays clean.
    pub fn resolve_child(&mut self, index: usize, id: NodeId) {
        self.entries[index].child = Child::Loaded(id);
    }

    /// Ids of all resident children, in key order.
    pub fn loaded_children(&self) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        self.entries.iter().filter_map(|entry| entry.child.loaded())
    }

    /// Index of the entry pointing at resident child `id`.
    #[must_use]
    pub fn position_of(&self, id: NodeId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.child == Child::Loaded(id))
    }

    /// Index of the child to descend into for `key`: the first entry whose
    /// boundary key is strictly greater than `key`, or the last entry.
    #[must_use]
    pub fn find(&self, key: &[u8], cmp: Comparator) -> usize {
        let routed = self.entries.len().saturating_sub(1);
        self.entries[..routed].partition_point(|entry| cmp(&entry.key, key) != Ordering::Greater)
    }

    /// Insert `(key, child)` at its routed position, splitting when full.
    ///
    /// Does not touch the child's parent link; the tree owns that bookkeeping.
    pub fn insert(&mut self, key: Vec<u8>, child: Child, cmp: Comparator) -> InteriorInsert {
        let i = self.find(&key, cmp);
        // A full node takes the entry into its overflow slot and splits.
        let overflow = self.is_full();

        self.entries.insert(i, InteriorEntry { key, child });
        self.state.mark_dirty();

        if !overflow {
            return InteriorInsert::Inserted;
        }

        let (split_key, right) = self.split();
        InteriorInsert::Split { split_key, right }
    }

    /// Split an overflowing node around the entry at `max_entries / 2`.
    ///
    /// The pivot entry stays as the left node's last entry: its key becomes
    /// the left node's upper bound and is returned as the key the parent
    /// routes to the left node with. Entries after the pivot move into the
    /// returned right node, which keeps the old upper bound.
    fn split(&mut self) -> (Vec<u8>, Self) {
        let mid = self.max_entries / 2;

        let mut right = Self::new(None, self.max_entries);
        right.entries = self.entries.split_off(mid + 1);
        let split_key = self.entries[mid].key.clone();

        (split_key, right)
    }
}

impl TreeNode for InteriorNode {
    fn node_type(&self) -> NodeType {
        NodeType::Interior
    }

    fn count(&self) -> usize {
        self.entries.len()
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.max_entries
    }

    fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn largest_key(&self) -> Option<&[u8]> {
        self.entries.last().map(|entry| entry.key.as_slice())
    }
}
