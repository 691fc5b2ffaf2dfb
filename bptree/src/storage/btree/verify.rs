//! Structural invariant checks.
//!
//! [`BTree::verify`] walks the resident part of the tree and reports every
//! broken invariant it finds. It never loads nodes, so subtrees that are still
//! only known by their hash are skipped.

use std::cmp::Ordering;

use crate::storage::btree::interior::{Child, InteriorNode};
use crate::storage::btree::leaf::{LeafNode, NextLeaf};
use crate::storage::btree::node::{Node, NodeId, TreeNode};
use crate::storage::btree::tree::BTree;

/// A broken structural invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// The node the violation was found at.
    pub node: NodeId,
    /// What is wrong.
    pub description: String,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node {}: {}", self.node, self.description)
    }
}

/// A node to check, with what its parent says about it.
struct Visit {
    id: NodeId,
    parent: Option<NodeId>,
    depth: usize,
    /// Smallest key the subtree may hold.
    lower: Option<Vec<u8>>,
    /// Keys in the subtree are strictly below this; `None` on the rightmost
    /// path.
    upper: Option<Vec<u8>>,
    /// The parent's boundary key for this node.
    routing_key: Option<Vec<u8>>,
}

enum Step {
    Visit(Visit),
    /// A child that is not resident.
    Unresolved,
}

impl<D> BTree<D> {
    /// Check the structural invariants of the resident tree.
    ///
    /// Returns an empty list for a well-formed tree.
    #[must_use]
    pub fn verify(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        // Leaves in key order; `None` where an unresolved subtree sits.
        let mut leaves: Vec<Option<NodeId>> = Vec::new();

        let mut stack = vec![Step::Visit(Visit {
            id: self.root,
            parent: None,
            depth: 1,
            lower: None,
            upper: None,
            routing_key: None,
        })];

        while let Some(step) = stack.pop() {
            let Step::Visit(visit) = step else {
                leaves.push(None);
                continue;
            };

            let node = self.nodes.get(visit.id);
            self.check_links(&mut violations, node, &visit);

            match node {
                Node::Leaf(leaf) => {
                    self.check_leaf(&mut violations, leaf, &visit);
                    leaves.push(Some(visit.id));
                }
                Node::Interior(interior) => {
                    self.check_interior(&mut violations, interior, &visit);
                    push_children(&mut stack, interior, &visit);
                }
            }
        }

        self.check_leaf_chain(&mut violations, &leaves);
        self.check_first_leaf(&mut violations);
        violations
    }

    fn check_links(&self, violations: &mut Vec<InvariantViolation>, node: &Node, visit: &Visit) {
        if node.parent() != visit.parent {
            violations.push(InvariantViolation {
                node: visit.id,
                description: format!(
                    "parent link is {:?}, but it is routed to from {:?}",
                    node.parent(),
                    visit.parent
                ),
            });
        }

        if let Some(parent) = visit.parent
            && node.state().is_dirty()
            && !self.nodes.get(parent).state().is_dirty()
        {
            violations.push(InvariantViolation {
                node: visit.id,
                description: format!("dirty node under clean parent {parent}"),
            });
        }
    }

    fn check_leaf(&self, violations: &mut Vec<InvariantViolation>, leaf: &LeafNode, visit: &Visit) {
        let mut report = |description: String| {
            violations.push(InvariantViolation {
                node: visit.id,
                description,
            });
        };
        let max = self.config.max_leaf_records;

        if visit.depth != self.height {
            report(format!("leaf at depth {}, tree height {}", visit.depth, self.height));
        }

        let sole_leaf = visit.parent == Some(self.root)
            && self.nodes.interior(self.root).count() == 1;
        if leaf.count() > max || (leaf.count() < max / 2 && !sole_leaf) {
            report(format!("{} records, allowed {}..={max}", leaf.count(), max / 2));
        }

        let records = leaf.records();
        for (i, pair) in records.windows(2).enumerate() {
            if (self.cmp)(&pair[0].key, &pair[1].key) != Ordering::Less {
                report(format!("record {} is not above record {i}", i + 1));
            }
        }

        for (i, record) in records.iter().enumerate() {
            let below = visit
                .lower
                .as_ref()
                .is_some_and(|lower| (self.cmp)(&record.key, lower) == Ordering::Less);
            let above = visit
                .upper
                .as_ref()
                .is_some_and(|upper| (self.cmp)(&record.key, upper) != Ordering::Less);
            if below || above {
                report(format!("record {i} lies outside the range routed to this leaf"));
            }
        }
    }

    fn check_interior(
        &self,
        violations: &mut Vec<InvariantViolation>,
        node: &InteriorNode,
        visit: &Visit,
    ) {
        let mut report = |description: String| {
            violations.push(InvariantViolation {
                node: visit.id,
                description,
            });
        };
        let max = self.config.max_interior_entries;
        let is_root = visit.parent.is_none();

        let count = node.count();
        if count == 0 || count > max || (!is_root && count < max / 2) {
            report(format!("{count} entries, allowed {}..={max}", max / 2));
        }
        if count == 0 {
            return;
        }

        let entries = node.entries();
        let routed = &entries[..count - 1];
        for (i, pair) in routed.windows(2).enumerate() {
            if (self.cmp)(&pair[0].key, &pair[1].key) != Ordering::Less {
                report(format!("boundary key {} is not above boundary key {i}", i + 1));
            }
        }

        let last = &entries[count - 1].key;
        let high_key = self.config.high_key();
        if is_root {
            if *last != high_key {
                report("root's last boundary key is not the high key".to_string());
            }
            return;
        }

        if visit.routing_key.as_ref() != Some(last) {
            report("last boundary key differs from the parent's key for this node".to_string());
        }
        // On the rightmost path the last key is the high key, which need not
        // sort last under a custom comparator.
        if let Some(prev) = routed.last()
            && *last != high_key
            && (self.cmp)(&prev.key, last) != Ordering::Less
        {
            report("last boundary key is not above the routing keys".to_string());
        }
    }

    fn check_leaf_chain(&self, violations: &mut Vec<InvariantViolation>, leaves: &[Option<NodeId>]) {
        for pair in leaves.windows(2) {
            let &[Some(leaf), following] = pair else {
                continue;
            };
            match (self.nodes.leaf(leaf).next(), following) {
                (NextLeaf::Unlinked, _) | (NextLeaf::Leaf(_), None) => {}
                (NextLeaf::Leaf(next), Some(expected)) if next == expected => {}
                (next, _) => violations.push(InvariantViolation {
                    node: leaf,
                    description: format!("next link {next:?} does not follow key order"),
                }),
            }
        }

        if let Some(&Some(last)) = leaves.last()
            && let NextLeaf::Leaf(next) = self.nodes.leaf(last).next()
        {
            violations.push(InvariantViolation {
                node: last,
                description: format!("last leaf links to {next}"),
            });
        }
    }

    fn check_first_leaf(&self, violations: &mut Vec<InvariantViolation>) {
        let mut current = self.root;
        loop {
            match self.nodes.get(current) {
                Node::Leaf(_) => break,
                Node::Interior(node) => match node.child(0) {
                    Child::Loaded(id) => current = id,
                    Child::Stored(_) => {
                        violations.push(InvariantViolation {
                            node: current,
                            description: "leftmost path is not resident".to_string(),
                        });
                        return;
                    }
                },
            }
        }

        if current != self.first {
            violations.push(InvariantViolation {
                node: self.first,
                description: format!("cached leftmost leaf, but the leftmost leaf is {current}"),
            });
        }
    }
}

/// Queue the children of `node` so they pop in key order.
fn push_children(stack: &mut Vec<Step>, node: &InteriorNode, visit: &Visit) {
    let entries = node.entries();
    let last = entries.len().saturating_sub(1);

    for (i, entry) in entries.iter().enumerate().rev() {
        let Child::Loaded(id) = entry.child else {
            stack.push(Step::Unresolved);
            continue;
        };

        let lower = if i == 0 {
            visit.lower.clone()
        } else {
            Some(entries[i - 1].key.clone())
        };
        let upper = if i == last {
            visit.upper.clone()
        } else {
            Some(entry.key.clone())
        };

        stack.push(Step::Visit(Visit {
            id,
            parent: Some(visit.id),
            depth: visit.depth + 1,
            lower,
            upper,
            routing_key: Some(entry.key.clone()),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::int64_to_bytes;
    use crate::config::TreeConfig;
    use crate::storage::MemDatabase;
    use crate::testing::small_config;

    fn key(i: i64) -> [u8; 8] {
        int64_to_bytes(i)
    }

    fn tree_with(db: &MemDatabase, n: i64) -> BTree<&MemDatabase> {
        let mut tree = BTree::new(db, small_config()).expect("create tree");
        for i in 0..n {
            tree.insert(&key(i), vec![]).expect("insert");
        }
        tree
    }

    fn descriptions(violations: &[InvariantViolation]) -> Vec<String> {
        violations.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_fresh_tree_is_valid() {
        let db = MemDatabase::new();
        let tree = BTree::new(&db, TreeConfig::default()).expect("create tree");
        assert!(tree.verify().is_empty());
    }

    #[test]
    fn test_grown_tree_is_valid() {
        let db = MemDatabase::new();
        let tree = tree_with(&db, 500);
        let violations = tree.verify();
        assert!(violations.is_empty(), "{:?}", descriptions(&violations));
    }

    #[test]
    fn test_detects_wrong_parent_link() {
        let db = MemDatabase::new();
        let mut tree = tree_with(&db, 50);
        let leaf = tree.first_leaf();
        tree.nodes.get_mut(leaf).set_parent(None);

        let violations = tree.verify();
        assert!(
            violations
                .iter()
                .any(|v| v.node == leaf && v.description.contains("parent link"))
        );
    }

    #[test]
    fn test_detects_broken_leaf_chain() {
        let db = MemDatabase::new();
        let mut tree = tree_with(&db, 50);
        let first = tree.first_leaf();
        tree.nodes.leaf_mut(first).set_next(NextLeaf::End);

        let violations = tree.verify();
        assert!(
            violations
                .iter()
                .any(|v| v.node == first && v.description.contains("next link"))
        );
    }

    #[test]
    fn test_detects_stale_first_leaf() {
        let db = MemDatabase::new();
        let mut tree = tree_with(&db, 50);
        let NextLeaf::Leaf(second) = tree.nodes.leaf(tree.first_leaf()).next() else {
            panic!("tree with 50 keys has more than one leaf");
        };
        tree.first = second;

        assert!(
            tree.verify()
                .iter()
                .any(|v| v.description.contains("leftmost leaf"))
        );
    }

    #[test]
    fn test_detects_clean_parent_over_dirty_child() {
        let db = MemDatabase::new();
        let mut tree = tree_with(&db, 50);
        tree.commit().expect("commit");
        let first = tree.first_leaf();
        tree.nodes.get_mut(first).state_mut().mark_dirty();

        assert!(
            tree.verify()
                .iter()
                .any(|v| v.node == first && v.description.contains("clean parent"))
        );
    }

    #[test]
    fn test_skips_unresolved_subtrees() {
        let db = MemDatabase::new();
        let root_hash = {
            let mut tree = tree_with(&db, 200);
            tree.commit().expect("commit").root_hash
        };

        let tree = BTree::open(&db, small_config(), root_hash).expect("open");
        assert!(tree.verify().is_empty());
    }

    #[test]
    fn test_violation_display() {
        let violation = InvariantViolation {
            node: NodeId(4),
            description: "broken".to_string(),
        };
        assert_eq!(violation.to_string(), "node #4: broken");
    }
}
