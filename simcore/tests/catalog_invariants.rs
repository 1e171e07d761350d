// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

//! Property tests for catalog consistency (§8, property 1) and cascade
//! completeness (§8, property 2) under random sequences of structural
//! mutations, run directly against `KeyCatalog` without a kernel attached,
//! these are pure bookkeeping properties.

use proptest::prelude::*;
use simcore::catalog::{rkey, Kind, KeyCatalog};

#[derive(Clone, Debug)]
enum Op {
    MakeVectorSet { vkey: String },
    MakeRecommendation { src_idx: usize, tgt_idx: usize },
    DeleteVectorSet { idx: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[a-z]{1,6}".prop_map(|vkey| Op::MakeVectorSet { vkey }),
        (0usize..8, 0usize..8).prop_map(|(src_idx, tgt_idx)| Op::MakeRecommendation {
            src_idx,
            tgt_idx
        }),
        (0usize..8).prop_map(|idx| Op::DeleteVectorSet { idx }),
    ]
}

/// Every key's presence in `kind_of`/`basis_of` agrees, and every
/// recommendation's endpoints are still live VectorSets under the same
/// basis with the reverse indices pointing back at each other.
fn assert_consistent(catalog: &KeyCatalog, vector_set_keys: &[String]) {
    for vkey in vector_set_keys {
        if !catalog.contains(vkey) {
            continue;
        }
        assert_eq!(catalog.kind_of(vkey), Some(Kind::VectorSet));
        assert_eq!(catalog.basis_of(vkey).as_deref(), Some("b1"));
        for target in catalog.targets_of(vkey).unwrap_or_default() {
            let key = rkey(vkey, &target);
            assert!(
                catalog.contains(&key),
                "targets_of({vkey}) claims {target} but {key} is missing from the catalog"
            );
            assert_eq!(catalog.kind_of(&key), Some(Kind::Recommendation));
            assert!(
                catalog.contains(&target),
                "recommendation target {target} is not itself a live key"
            );
        }
    }
}

proptest! {
    #[test]
    fn catalog_stays_consistent_under_random_mutation(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let catalog = KeyCatalog::new();
        catalog.insert_basis("b1", vec!["x".into(), "y".into()]);
        let mut vector_set_keys: Vec<String> = Vec::new();

        for op in ops {
            match op {
                Op::MakeVectorSet { vkey } => {
                    if !catalog.contains(&vkey) {
                        catalog.insert_vector_set("b1", &vkey);
                        vector_set_keys.push(vkey);
                    }
                },
                Op::MakeRecommendation { src_idx, tgt_idx } => {
                    if vector_set_keys.is_empty() {
                        continue;
                    }
                    let src = &vector_set_keys[src_idx % vector_set_keys.len()];
                    let tgt = &vector_set_keys[tgt_idx % vector_set_keys.len()];
                    if src == tgt || !catalog.contains(src) || !catalog.contains(tgt) {
                        continue;
                    }
                    let key = rkey(src, tgt);
                    if !catalog.contains(&key) {
                        catalog.insert_recommendation(src, tgt, "b1", "cosine");
                    }
                },
                Op::DeleteVectorSet { idx } => {
                    if vector_set_keys.is_empty() {
                        continue;
                    }
                    let vkey = vector_set_keys[idx % vector_set_keys.len()].clone();
                    if let Some(removed) = catalog.remove_vector_set(&vkey) {
                        for target in &removed.targets {
                            catalog.remove_recommendation(&rkey(&vkey, target));
                        }
                        for source in &removed.sources {
                            if source != &vkey {
                                catalog.remove_recommendation(&rkey(source, &vkey));
                            }
                        }
                    }
                },
            }
            assert_consistent(&catalog, &vector_set_keys);
        }
    }
}
