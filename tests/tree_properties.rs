//! Property tests for the sparse Merkle tree
//!
//! Run with:
//! ```bash
//! cargo test --test tree_properties
//! ```

use proptest::prelude::*;
use smt_anchor::store::Table;
use smt_anchor::tree::DoctorTree;
use smt_anchor::{Blake3FieldHash, Doctor, FieldElement, NewDoctor, RecordId};

const KEY_LENGTH: u32 = 6;

fn doctor(id: RecordId, license: u64) -> Doctor {
    NewDoctor {
        license,
        user_id: id * 10,
    }
    .with_id(id)
}

fn tree() -> DoctorTree {
    DoctorTree::new(Blake3FieldHash, KEY_LENGTH).unwrap()
}

fn build(tree: &DoctorTree, keys: &[RecordId]) -> Table<Doctor> {
    let mut table = Table::new();
    for &key in keys {
        let record = doctor(key, 1000 + key);
        table.insert_record(record.clone()).unwrap();
        tree.insert(&mut table, &record).unwrap();
    }
    table
}

fn keys() -> impl Strategy<Value = Vec<RecordId>> {
    prop::collection::btree_set(1u64..64, 1..24).prop_map(|set| set.into_iter().collect())
}

proptest! {
    #[test]
    fn inclusion_proofs_verify(keys in keys()) {
        let tree = tree();
        let table = build(&tree, &keys);
        let root = tree.root_hash(&table).unwrap();

        for &key in &keys {
            let proof = tree.inclusion_proof(&table, key).unwrap();
            prop_assert_eq!(proof.root, root);
            prop_assert_eq!(proof.siblings.len(), KEY_LENGTH as usize);
            prop_assert!(proof.verify(tree.hasher()));
        }
    }

    #[test]
    fn root_ignores_insertion_order(keys in keys().prop_shuffle()) {
        let tree = tree();
        let mut sorted = keys.clone();
        sorted.sort_unstable();

        let shuffled = build(&tree, &keys);
        let ordered = build(&tree, &sorted);
        prop_assert_eq!(tree.root_hash(&shuffled).unwrap(), tree.root_hash(&ordered).unwrap());
        prop_assert_eq!(shuffled.nodes().len(), ordered.nodes().len());
    }

    #[test]
    fn remove_undoes_insert(keys in keys(), extra in 1u64..64) {
        prop_assume!(!keys.contains(&extra));
        let tree = tree();
        let mut table = build(&tree, &keys);
        let root = tree.root_hash(&table).unwrap();
        let nodes = table.nodes().len();

        let record = doctor(extra, 7);
        table.insert_record(record.clone()).unwrap();
        let proof = tree.insert(&mut table, &record).unwrap();
        prop_assert_eq!(proof.old_root, root);
        prop_assert_ne!(proof.new_root, root);

        let after = tree.remove(&mut table, extra).unwrap();
        prop_assert_eq!(after, root);
        prop_assert_eq!(tree.root_hash(&table).unwrap(), root);
        prop_assert_eq!(table.nodes().len(), nodes);
    }

    #[test]
    fn removing_everything_empties_the_tree(keys in keys().prop_shuffle()) {
        let tree = tree();
        let mut table = build(&tree, &keys);

        for &key in &keys {
            tree.remove(&mut table, key).unwrap();
        }
        prop_assert!(table.nodes().is_empty());
        prop_assert_eq!(tree.root_hash(&table).unwrap(), FieldElement::ZERO);
    }

    #[test]
    fn update_keeps_position(keys in keys(), pick in any::<prop::sample::Index>(), license in 0u64..1000) {
        let tree = tree();
        let mut table = build(&tree, &keys);
        let key = keys[pick.index(keys.len())];
        let siblings = tree.siblings(&table, key).unwrap();
        let nodes = table.nodes().len();

        let changed = doctor(key, license);
        let proof = tree.update(&mut table, &changed).unwrap();
        table.put_record(changed);

        prop_assert_eq!(&proof.siblings, &siblings);
        prop_assert_eq!(tree.siblings(&table, key).unwrap(), siblings);
        prop_assert_eq!(table.nodes().len(), nodes);
        prop_assert_eq!(tree.root_hash(&table).unwrap(), proof.new_root);
        prop_assert!(tree.inclusion_proof(&table, key).unwrap().verify(tree.hasher()));
    }
}
