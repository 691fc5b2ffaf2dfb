use std::collections::BTreeMap;

use bptree::bytes::int64_to_bytes;
use bptree::config::TreeConfig;
use bptree::simulation::{FaultConfig, FaultyDatabase};
use bptree::storage::btree::{BTree, Record};
use bptree::storage::{Database, MemDatabase};
use proptest::prelude::*;

type Model = BTreeMap<Vec<u8>, Vec<u8>>;

fn small_config() -> TreeConfig {
    TreeConfig::new(8)
        .with_max_leaf_records(3)
        .with_max_interior_entries(3)
}

/// Keys around zero, so both `-1` (all `0xFF`, the high key) and the
/// sign-bit ordering of negative numbers show up.
fn arb_key() -> impl Strategy<Value = i64> {
    prop_oneof![-40i64..2_000, Just(-1), Just(i64::MAX), Just(i64::MIN)]
}

fn arb_value() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..6)
}

fn arb_inserts() -> impl Strategy<Value = Vec<(i64, Vec<u8>)>> {
    prop::collection::vec((arb_key(), arb_value()), 1..400)
}

fn arb_config() -> impl Strategy<Value = TreeConfig> {
    (0usize..3, 3usize..8).prop_map(|(leaf, interior)| {
        TreeConfig::new(8)
            .with_max_leaf_records(3 + 2 * leaf)
            .with_max_interior_entries(interior)
    })
}

fn build<D: Database>(
    db: D,
    config: TreeConfig,
    inserts: &[(i64, Vec<u8>)],
) -> (BTree<D>, Model) {
    let mut tree = BTree::new(db, config).expect("create tree");
    let mut model = Model::new();
    for (k, v) in inserts {
        let key = int64_to_bytes(*k).to_vec();
        let old = tree.insert(&key, v.clone()).expect("insert");
        assert_eq!(old, model.insert(key, v.clone()));
    }
    (tree, model)
}

fn scan<D: Database>(tree: &mut BTree<D>) -> Vec<(Vec<u8>, Vec<u8>)> {
    tree.iter()
        .map(|record| {
            let Record { key, value } = record.expect("scan");
            (key, value)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_scan_matches_model(config in arb_config(), inserts in arb_inserts()) {
        let db = MemDatabase::new();
        let (mut tree, model) = build(&db, config, &inserts);

        let expected: Vec<_> = model.into_iter().collect();
        prop_assert_eq!(scan(&mut tree), expected);

        let violations = tree.verify();
        prop_assert!(violations.is_empty(), "{:?}", violations);
    }

    #[test]
    fn prop_every_key_is_found(inserts in arb_inserts(), probes in prop::collection::vec(arb_key(), 0..50)) {
        let db = MemDatabase::new();
        let (mut tree, model) = build(&db, small_config(), &inserts);

        for (key, value) in &model {
            prop_assert_eq!(tree.get(key).expect("get"), Some(value.clone()));
        }
        for probe in probes {
            let key = int64_to_bytes(probe).to_vec();
            prop_assert_eq!(tree.get(&key).expect("get"), model.get(&key).cloned());
        }
    }

    #[test]
    fn prop_range_matches_model(inserts in arb_inserts(), a in arb_key(), b in arb_key()) {
        let db = MemDatabase::new();
        let (mut tree, model) = build(&db, small_config(), &inserts);
        let start = int64_to_bytes(a).to_vec();
        let end = int64_to_bytes(b).to_vec();

        let found: Vec<Vec<u8>> = tree
            .search_range(&start, &end)
            .expect("range")
            .map(|record| record.expect("scan").key)
            .collect();
        let expected: Vec<Vec<u8>> = if start <= end {
            model.range(start..=end).map(|(k, _)| k.clone()).collect()
        } else {
            Vec::new()
        };
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn prop_commit_then_open_round_trips(inserts in arb_inserts(), more in arb_inserts()) {
        let db = MemDatabase::new();
        let (mut tree, mut model) = build(&db, small_config(), &inserts);
        let summary = tree.commit().expect("commit");

        let mut reopened = BTree::open(&db, small_config(), summary.root_hash).expect("open");
        prop_assert_eq!(reopened.root_hash(), Some(summary.root_hash));
        let expected: Vec<_> = model.clone().into_iter().collect();
        prop_assert_eq!(scan(&mut reopened), expected);

        // Keep writing to the reopened tree and commit again.
        for (k, v) in &more {
            let key = int64_to_bytes(*k).to_vec();
            let old = reopened.insert(&key, v.clone()).expect("insert");
            prop_assert_eq!(old, model.insert(key, v.clone()));
        }
        let violations = reopened.verify();
        prop_assert!(violations.is_empty(), "{:?}", violations);
        let second = reopened.commit().expect("second commit");

        let mut last = BTree::open(&db, small_config(), second.root_hash).expect("reopen");
        let expected: Vec<_> = model.into_iter().collect();
        prop_assert_eq!(scan(&mut last), expected);
    }

    #[test]
    fn prop_failed_commit_retries_to_same_root(
        inserts in arb_inserts(),
        limit in 0usize..40,
        seed in any::<u64>(),
    ) {
        let reference_db = MemDatabase::new();
        let (mut reference, _) = build(&reference_db, small_config(), &inserts);
        let expected = reference.commit().expect("reference commit").root_hash;

        let config = FaultConfig {
            fail_puts_after: Some(limit),
            ..FaultConfig::none()
        };
        let db = FaultyDatabase::new(MemDatabase::new(), config, seed);
        let (mut tree, _) = build(&db, small_config(), &inserts);

        // Fewer nodes than the limit commit on the first try.
        let first = tree.commit();
        db.set_faults(FaultConfig::none());
        let root_hash = match first {
            Ok(summary) => summary.root_hash,
            Err(_) => tree.commit().expect("retry").root_hash,
        };
        prop_assert_eq!(root_hash, expected);

        let mut reopened = BTree::open(db.inner(), small_config(), root_hash).expect("open");
        prop_assert_eq!(scan(&mut reopened), scan(&mut reference));
    }
}
