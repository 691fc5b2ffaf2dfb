//! Ordered scans over the leaf chain.

use std::cmp::Ordering;

use crate::storage::Database;
use crate::storage::btree::node::{NodeId, Record};
use crate::storage::btree::tree::{BTree, BTreeError};

/// Cursor over records in key order.
///
/// Produced by [`BTree::search_range`] and [`BTree::iter`]. Leaves are
/// followed through their `next` links; leaves that are not resident yet are
/// loaded as the cursor reaches them.
pub struct RangeIter<'a, D> {
    tree: &'a mut BTree<D>,
    leaf: Option<NodeId>,
    index: usize,
    /// Inclusive upper bound; `None` scans to the end of the tree.
    end: Option<Vec<u8>>,
}

impl<D: Database> BTree<D> {
    /// Records with `start <= key <= end`, in ascending order.
    ///
    /// An empty range (`start > end`) yields nothing.
    pub fn search_range(
        &mut self,
        start: &[u8],
        end: &[u8],
    ) -> Result<RangeIter<'_, D>, BTreeError> {
        self.check_key(start)?;
        self.check_key(end)?;

        let (leaf, _, _) = self.descend(start)?;
        let (index, _) = self.nodes.leaf(leaf).find_smallest(start, self.cmp);
        let non_empty = (self.cmp)(start, end) != Ordering::Greater;

        Ok(RangeIter {
            leaf: non_empty.then_some(leaf),
            tree: self,
            index,
            end: Some(end.to_vec()),
        })
    }

    /// Every record in ascending order, starting from the leftmost leaf.
    pub fn iter(&mut self) -> RangeIter<'_, D> {
        RangeIter {
            leaf: Some(self.first),
            tree: self,
            index: 0,
            end: None,
        }
    }
}

impl<D: Database> RangeIter<'_, D> {
    /// The next record, or `None` once the range is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<Record>, BTreeError> {
        while let Some(leaf) = self.leaf {
            let records = self.tree.nodes.leaf(leaf).records();
            if let Some(record) = records.get(self.index) {
                if let Some(end) = &self.end
                    && (self.tree.cmp)(&record.key, end) == Ordering::Greater
                {
                    self.leaf = None;
                    return Ok(None);
                }
                self.index += 1;
                return Ok(Some(record.clone()));
            }

            // Past the last record of this leaf; fall through to the next one.
            self.leaf = self.tree.next_leaf(leaf)?;
            self.index = 0;
        }
        Ok(None)
    }
}

impl<D: Database> Iterator for RangeIter<'_, D> {
    type Item = Result<Record, BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.leaf = None;
                Some(Err(e))
            }
        }
    }
}

impl<D> std::fmt::Debug for RangeIter<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeIter")
            .field("leaf", &self.leaf)
            .field("index", &self.index)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::{bytes_to_int64, int64_to_bytes};
    use crate::config::TreeConfig;
    use crate::storage::MemDatabase;
    use crate::storage::btree::node::TreeNode;
    use crate::testing::small_config;

    fn key(i: i64) -> [u8; 8] {
        int64_to_bytes(i)
    }

    fn collect_keys<D: Database>(iter: RangeIter<'_, D>) -> Vec<i64> {
        iter.map(|record| {
            let record = record.expect("scan");
            bytes_to_int64(&record.key).expect("8-byte key")
        })
        .collect()
    }

    fn tree_with<'a>(
        db: &'a MemDatabase,
        config: TreeConfig,
        keys: impl IntoIterator<Item = i64>,
    ) -> BTree<&'a MemDatabase> {
        let mut tree = BTree::new(db, config).expect("create tree");
        for i in keys {
            tree.insert(&key(i), i.to_string().into_bytes())
                .expect("insert");
        }
        tree
    }

    #[test]
    fn test_range_ten_to_twenty() {
        let db = MemDatabase::new();
        let mut tree = tree_with(&db, TreeConfig::default(), 1..=100);

        let records: Vec<Record> = tree
            .search_range(&key(10), &key(20))
            .expect("range")
            .collect::<Result<_, _>>()
            .expect("scan");

        assert_eq!(records.len(), 11);
        for (record, i) in records.iter().zip(10..=20) {
            assert_eq!(record.key, key(i).to_vec());
            assert_eq!(record.value, i.to_string().into_bytes());
        }
    }

    #[test]
    fn test_range_across_leaves() {
        let db = MemDatabase::new();
        let mut tree = tree_with(&db, small_config(), (0..500).rev());

        let keys = collect_keys(tree.search_range(&key(37), &key(412)).expect("range"));
        assert_eq!(keys, (37..=412).collect::<Vec<i64>>());
    }

    #[test]
    fn test_range_bounds_between_keys() {
        let db = MemDatabase::new();
        let mut tree = tree_with(&db, small_config(), (0..100).map(|i| i * 10));

        let keys = collect_keys(tree.search_range(&key(15), &key(61)).expect("range"));
        assert_eq!(keys, vec![20, 30, 40, 50, 60]);

        // Start past every key of its leaf continues in the next leaf.
        let keys = collect_keys(tree.search_range(&key(21), &key(30)).expect("range"));
        assert_eq!(keys, vec![30]);
    }

    #[test]
    fn test_range_empty_results() {
        let db = MemDatabase::new();
        let mut tree = tree_with(&db, small_config(), 0..50);

        assert!(collect_keys(tree.search_range(&key(30), &key(20)).expect("range")).is_empty());
        assert!(collect_keys(tree.search_range(&key(60), &key(90)).expect("range")).is_empty());
        assert!(
            collect_keys(tree.search_range(&key(-9), &key(-1)).expect("range")).is_empty()
        );
    }

    #[test]
    fn test_range_is_restartable() {
        let db = MemDatabase::new();
        let mut tree = tree_with(&db, small_config(), 0..30);

        let first = collect_keys(tree.search_range(&key(5), &key(9)).expect("range"));
        let second = collect_keys(tree.search_range(&key(5), &key(9)).expect("range"));
        assert_eq!(first, second);
        assert!(!tree.iter().any(|r| r.is_err()));
    }

    #[test]
    fn test_range_key_length_checked() {
        let db = MemDatabase::new();
        let mut tree = tree_with(&db, small_config(), 0..3);

        assert!(matches!(
            tree.search_range(&[0; 4], &key(1)),
            Err(BTreeError::KeyLength { .. })
        ));
    }

    #[test]
    fn test_iter_full_scan() {
        let db = MemDatabase::new();
        let mut tree = tree_with(&db, small_config(), (0..300).map(|i| (i * 37) % 300));

        assert_eq!(collect_keys(tree.iter()), (0..300).collect::<Vec<i64>>());
    }

    #[test]
    fn test_iter_empty_tree() {
        let db = MemDatabase::new();
        let mut tree = tree_with(&db, TreeConfig::default(), std::iter::empty());

        assert_eq!(tree.iter().next_entry().expect("scan"), None);
    }

    #[test]
    fn test_range_over_lazily_loaded_tree() {
        let db = MemDatabase::new();
        let root_hash = {
            let mut tree = tree_with(&db, small_config(), 0..400);
            tree.commit().expect("commit").root_hash
        };

        let mut tree = BTree::open(&db, small_config(), root_hash).expect("open");
        let keys = collect_keys(tree.search_range(&key(150), &key(260)).expect("range"));
        assert_eq!(keys, (150..=260).collect::<Vec<i64>>());

        assert_eq!(collect_keys(tree.iter()), (0..400).collect::<Vec<i64>>());
        assert!(tree.verify().is_empty());
    }

    #[test]
    fn test_scan_surfaces_missing_node() {
        let source = MemDatabase::new();
        let root_hash = {
            let mut tree = tree_with(&source, small_config(), 0..50);
            tree.commit().expect("commit").root_hash
        };

        // Copy only the root and the leftmost path into a second store.
        let partial = MemDatabase::new();
        {
            let mut tree = BTree::open(&source, small_config(), root_hash).expect("open");
            let mut id = Some(tree.first_leaf());
            while let Some(node) = id {
                let state = tree.node(node).state();
                let hash = state.cached_hash().expect("loaded node hash");
                let data = state.cached_encoding().expect("loaded node bytes");
                partial.put(&hash, data).expect("copy");
                id = tree.node(node).parent();
            }
        }

        let mut tree = BTree::open(&partial, small_config(), root_hash).expect("open partial");
        let results: Vec<_> = tree.iter().collect();
        assert!(matches!(
            results.last(),
            Some(Err(BTreeError::MissingNode(_)))
        ));
        assert!(results.iter().rev().skip(1).all(Result::is_ok));
    }
}
