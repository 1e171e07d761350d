// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pure validation predicates (§4.2). These run synchronously on the
//! caller's thread before anything is enqueued; they are advisory, not
//! authoritative; the definitive check happens again under the writer
//! executor that actually performs the mutation (§5), because the catalog
//! can change between a read here and the job running.

use std::path::Path;

use crate::catalog::{Kind, KeyCatalog};
use crate::error::EngineError;

pub fn valid_key_format(key: &str) -> Result<(), EngineError> {
    if key.contains('_') {
        Err(EngineError::InvalidKeyFormat(key.to_string()))
    } else {
        Ok(())
    }
}

pub fn not_exists(catalog: &KeyCatalog, key: &str) -> Result<(), EngineError> {
    if catalog.contains(key) {
        Err(EngineError::DuplicateEntry(key.to_string()))
    } else {
        Ok(())
    }
}

pub fn exists(catalog: &KeyCatalog, key: &str) -> Result<(), EngineError> {
    if catalog.contains(key) {
        Ok(())
    } else {
        Err(EngineError::UnknownEntry(key.to_string()))
    }
}

pub fn kind_is(catalog: &KeyCatalog, key: &str, expected: Kind) -> Result<(), EngineError> {
    match catalog.kind_of(key) {
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => Err(EngineError::KindMismatch {
            key: key.to_string(),
            expected: expected.as_str(),
            actual: actual.as_str(),
        }),
        None => Err(EngineError::UnknownEntry(key.to_string())),
    }
}

pub fn valid_id(id: i64) -> Result<(), EngineError> {
    if id >= 1 {
        Ok(())
    } else {
        Err(EngineError::InvalidId(id))
    }
}

pub fn valid_probs(values: &[f32]) -> Result<(), EngineError> {
    for &x in values {
        if !(0.0..=1.0).contains(&x) {
            return Err(EngineError::InvalidProbability(x));
        }
    }
    Ok(())
}

/// Validates an alternating `(index, weight)` sparse pair list: even length,
/// each index within `[0, max_index]`, each weight non-negative.
pub fn valid_sparse_pairs(max_index: u32, pairs: &[i64]) -> Result<(), EngineError> {
    if pairs.len() % 2 != 0 {
        return Err(EngineError::InvalidSparsePair(
            "odd number of values in alternating index/weight list".to_string(),
        ));
    }
    for chunk in pairs.chunks(2) {
        let (index, weight) = (chunk[0], chunk[1]);
        if index < 0 || index as u64 > max_index as u64 {
            return Err(EngineError::InvalidSparsePair(format!(
                "index {index} out of range [0, {max_index}]"
            )));
        }
        if weight < 0 {
            return Err(EngineError::InvalidSparsePair(format!(
                "weight {weight} must be >= 0"
            )));
        }
    }
    Ok(())
}

pub fn same_basis(catalog: &KeyCatalog, src: &str, tgt: &str) -> Result<(), EngineError> {
    let src_basis = catalog.basis_of(src);
    let tgt_basis = catalog.basis_of(tgt);
    if src_basis.is_some() && src_basis == tgt_basis {
        Ok(())
    } else {
        Err(EngineError::BasisMismatch {
            src: src.to_string(),
            tgt: tgt.to_string(),
        })
    }
}

pub fn valid_dump_path(path: &Path) -> Result<(), EngineError> {
    if path.exists() {
        Ok(())
    } else {
        Err(EngineError::DumpMissing(path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_underscore_keys() {
        assert!(valid_key_format("a_b").is_err());
        assert!(valid_key_format("ab").is_ok());
    }

    #[test]
    fn rejects_out_of_range_probabilities() {
        assert!(valid_probs(&[0.2, 0.3, 0.5]).is_ok());
        assert!(valid_probs(&[1.1, 0.0, 0.0]).is_err());
        assert!(valid_probs(&[-0.1]).is_err());
    }

    #[test]
    fn rejects_invalid_ids() {
        assert!(valid_id(1).is_ok());
        assert!(valid_id(0).is_err());
        assert!(valid_id(-1).is_err());
    }

    #[test]
    fn rejects_malformed_sparse_pairs() {
        assert!(valid_sparse_pairs(10, &[0, 1, 5, 2]).is_ok());
        assert!(valid_sparse_pairs(10, &[0, 1, 5]).is_err());
        assert!(valid_sparse_pairs(10, &[11, 1]).is_err());
        assert!(valid_sparse_pairs(10, &[0, -1]).is_err());
    }

    #[test]
    fn cross_basis_recommendation_rejected() {
        let catalog = KeyCatalog::new();
        catalog.insert_basis("b1", vec![]);
        catalog.insert_basis("b2", vec![]);
        catalog.insert_vector_set("b1", "src");
        catalog.insert_vector_set("b2", "tgt");
        assert!(same_basis(&catalog, "src", "tgt").is_err());
    }
}
