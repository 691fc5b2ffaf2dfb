//! Leaf nodes: sorted runs of key/value records chained in key order.

use std::cmp::Ordering;

use crate::storage::btree::node::{
    Comparator, NodeId, NodeState, NodeType, Record, TreeNode,
};

/// Link from a leaf to the next leaf in key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextLeaf {
    /// The next leaf in key order.
    Leaf(NodeId),
    /// This is the last leaf of the tree.
    End,
    /// Not yet known: the leaf was loaded from storage, where sibling links
    /// are not recorded. The tree derives it from the structure on demand.
    Unlinked,
}

/// Outcome of [`LeafNode::insert`].
#[derive(Debug)]
pub enum LeafInsert {
    /// The key existed; its value was replaced. Carries the old value.
    Updated(Vec<u8>),
    /// The record was added to this leaf.
    Inserted,
    /// The leaf was full and split. `right` holds the upper half and must be
    /// linked in by the caller; `split_key` is its first key.
    Split { split_key: Vec<u8>, right: LeafNode },
}

/// A leaf B+ tree node.
///
/// Records are strictly ascending under the tree's comparator and never exceed
/// `max_records`.
#[derive(Debug)]
pub struct LeafNode {
    records: Vec<Record>,
    max_records: usize,
    parent: Option<NodeId>,
    next: NextLeaf,
    state: NodeState,
}

impl LeafNode {
    /// Create a new empty, dirty leaf.
    #[must_use]
    pub fn new(parent: Option<NodeId>, max_records: usize) -> Self {
        Self {
            records: Vec::with_capacity(max_records),
            max_records,
            parent,
            next: NextLeaf::End,
            state: NodeState::new_dirty(),
        }
    }

    /// Rebuild a leaf from decoded records.
    ///
    /// The caller is responsible for the records being sorted and within
    /// capacity.
    #[must_use]
    pub const fn from_records(records: Vec<Record>, max_records: usize, state: NodeState) -> Self {
        Self {
            records,
            max_records,
            parent: None,
            next: NextLeaf::Unlinked,
            state,
        }
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[must_use]
    pub const fn next(&self) -> NextLeaf {
        self.next
    }

    pub const fn set_next(&mut self, next: NextLeaf) {
        self.next = next;
    }

    /// Binary search for `key`.
    ///
    /// Returns `(index, true)` on an exact match. Otherwise returns the index
    /// where `key` would be inserted (the first record greater than `key`) and
    /// `false`.
    #[must_use]
    pub fn find(&self, key: &[u8], cmp: Comparator) -> (usize, bool) {
        match self
            .records
            .binary_search_by(|record| cmp(&record.key, key))
        {
            Ok(i) => (i, true),
            Err(i) => (i, false),
        }
    }

    /// Position of the first record `>= key`, for range scans.
    ///
    /// Returns `(count, false)` when every resident key is smaller than `key`,
    /// meaning the scan continues in the next leaf.
    #[must_use]
    pub fn find_smallest(&self, key: &[u8], cmp: Comparator) -> (usize, bool) {
        let i = self
            .records
            .partition_point(|record| cmp(&record.key, key) == Ordering::Less);
        (i, i < self.records.len())
    }

    /// Get a value by key.
    #[must_use]
    pub fn get(&self, key: &[u8], cmp: Comparator) -> Option<&[u8]> {
        match self.find(key, cmp) {
            (i, true) => Some(self.records[i].value.as_slice()),
            (_, false) => None,
        }
    }

    /// Insert or update a record, splitting when full.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>, cmp: Comparator) -> LeafInsert {
        let (i, exact) = self.find(key, cmp);

        if exact {
            self.state.mark_dirty();
            let old = std::mem::replace(&mut self.records[i].value, value);
            return LeafInsert::Updated(old);
        }

        if !self.is_full() {
            self.insert_at(i, key, value);
            return LeafInsert::Inserted;
        }

        let mut right = self.split();
        if cmp(key, &right.records[0].key) == Ordering::Less {
            let (i, _) = self.find(key, cmp);
            self.insert_at(i, key, value);
        } else {
            let (i, _) = right.find(key, cmp);
            right.insert_at(i, key, value);
        }

        let split_key = right.records[0].key.clone();
        LeafInsert::Split { split_key, right }
    }

    fn insert_at(&mut self, index: usize, key: &[u8], value: Vec<u8>) {
        self.records.insert(
            index,
            Record {
                key: key.to_vec(),
                value,
            },
        );
        self.state.mark_dirty();
    }

    /// Move the upper half of the records into a new right sibling.
    ///
    /// The left half keeps `count / 2 + 1` records. The new leaf inherits this
    /// leaf's `next` link; the caller points this leaf at the new one once it
    /// has an id. Both halves are dirty afterwards.
    pub fn split(&mut self) -> Self {
        let keep = self.records.len() / 2 + 1;
        let mut right = Self::new(None, self.max_records);
        right.records = self.records.split_off(keep);
        right.next = self.next;
        self.state.mark_dirty();
        right
    }
}

impl TreeNode for LeafNode {
    fn node_type(&self) -> NodeType {
        NodeType::Leaf
    }

    fn count(&self) -> usize {
        self.records.len()
    }

    fn is_full(&self) -> bool {
        self.records.len() >= self.max_records
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
        self.records.last().map(|record| record.key.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::int64_to_bytes;
    use crate::storage::btree::node::compare_keys;

    fn key(i: i64) -> [u8; 8] {
        int64_to_bytes(i)
    }

    fn leaf_with(keys: &[i64], max_records: usize) -> LeafNode {
        let mut leaf = LeafNode::new(None, max_records);
        for &k in keys {
            assert!(matches!(
                leaf.insert(&key(k), vec![], compare_keys),
                LeafInsert::Inserted
            ));
        }
        leaf
    }

    fn keys_of(leaf: &LeafNode) -> Vec<[u8; 8]> {
        leaf.records()
            .iter()
            .map(|r| r.key.as_slice().try_into().expect("8-byte key"))
            .collect()
    }

    #[test]
    fn test_find_exact_and_insert_position() {
        let leaf = leaf_with(&[10, 20, 30], 7);

        assert_eq!(leaf.find(&key(20), compare_keys), (1, true));
        assert_eq!(leaf.find(&key(5), compare_keys), (0, false));
        assert_eq!(leaf.find(&key(25), compare_keys), (2, false));
        assert_eq!(leaf.find(&key(35), compare_keys), (3, false));
    }

    #[test]
    fn test_find_smallest() {
        let leaf = leaf_with(&[10, 20, 30], 7);

        assert_eq!(leaf.find_smallest(&key(10), compare_keys), (0, true));
        assert_eq!(leaf.find_smallest(&key(11), compare_keys), (1, true));
        assert_eq!(leaf.find_smallest(&key(31), compare_keys), (3, false));
    }

    #[test]
    fn test_insert_keeps_order() {
        let leaf = leaf_with(&[30, 10, 20], 7);
        assert_eq!(keys_of(&leaf), vec![key(10), key(20), key(30)]);
        assert!(leaf.state().is_dirty());
    }

    #[test]
    fn test_insert_existing_replaces_value() {
        let mut leaf = LeafNode::new(None, 7);
        leaf.insert(&key(1), b"one".to_vec(), compare_keys);
        leaf.state_mut().mark_clean();

        match leaf.insert(&key(1), b"uno".to_vec(), compare_keys) {
            LeafInsert::Updated(old) => assert_eq!(old, b"one".to_vec()),
            other => panic!("expected update, got {other:?}"),
        }
        assert_eq!(leaf.count(), 1);
        assert_eq!(leaf.get(&key(1), compare_keys), Some(&b"uno"[..]));
        assert!(leaf.state().is_dirty(), "replacing a value dirties the leaf");
    }

    #[test]
    fn test_split_layout() {
        let mut leaf = leaf_with(&[1, 2, 3, 4, 5], 5);
        leaf.set_next(NextLeaf::Leaf(NodeId(42)));

        let right = leaf.split();

        assert_eq!(keys_of(&leaf), vec![key(1), key(2), key(3)]);
        assert_eq!(keys_of(&right), vec![key(4), key(5)]);
        assert_eq!(right.next(), NextLeaf::Leaf(NodeId(42)));
        assert!(right.state().is_dirty());
    }

    #[test]
    fn test_full_insert_into_right_half() {
        let mut leaf = leaf_with(&[1, 2, 3, 4, 5], 5);

        match leaf.insert(&key(6), vec![], compare_keys) {
            LeafInsert::Split { split_key, right } => {
                assert_eq!(split_key, key(4).to_vec());
                assert_eq!(keys_of(&leaf), vec![key(1), key(2), key(3)]);
                assert_eq!(keys_of(&right), vec![key(4), key(5), key(6)]);
            }
            other => panic!("expected split, got {other:?}"),
        }
    }

    #[test]
    fn test_full_insert_into_left_half() {
        let mut leaf = leaf_with(&[10, 20, 30, 40, 50], 5);

        match leaf.insert(&key(15), vec![], compare_keys) {
            LeafInsert::Split { split_key, right } => {
                assert_eq!(split_key, key(40).to_vec());
                assert_eq!(keys_of(&leaf), vec![key(10), key(15), key(20), key(30)]);
                assert_eq!(keys_of(&right), vec![key(40), key(50)]);
            }
            other => panic!("expected split, got {other:?}"),
        }
    }

    #[test]
    fn test_largest_key() {
        assert_eq!(LeafNode::new(None, 3).largest_key(), None);
        let leaf = leaf_with(&[3, 1, 2], 5);
        assert_eq!(leaf.largest_key(), Some(&key(3)[..]));
    }
}
