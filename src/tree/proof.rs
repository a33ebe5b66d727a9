//! Proof-input data emitted by tree mutations
//!
//! Field names serialize in camelCase because these structs are handed to
//! the proving circuits as-is.

use crate::hasher::FieldHash;
use crate::model::{FieldElement, RecordId};
use serde::{Deserialize, Serialize};

/// SMT processor function selector understood by the circuits
pub type ProcessorFunction = [u8; 2];

pub const FNC_INSERT: ProcessorFunction = [1, 0];
pub const FNC_UPDATE: ProcessorFunction = [0, 1];

/// Inputs proving an insertion
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationProof {
    pub fnc: ProcessorFunction,
    pub old_root: FieldElement,
    pub new_root: FieldElement,
    /// Sibling hashes along the pre-insertion path, padded to the key length
    pub siblings: Vec<FieldElement>,
    pub old_key: RecordId,
    pub old_value: FieldElement,
    /// 1 iff the tree was empty before the insertion
    pub is_old0: u8,
    pub new_key: RecordId,
    pub new_value: FieldElement,
}

/// Inputs proving an in-place value change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProof {
    pub fnc: ProcessorFunction,
    pub old_root: FieldElement,
    pub new_root: FieldElement,
    pub siblings: Vec<FieldElement>,
    pub old_key: RecordId,
    pub old_value: FieldElement,
    pub is_old0: u8,
    pub new_key: RecordId,
    pub new_value: FieldElement,
}

/// Membership of `key` with `value` under `root`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    pub root: FieldElement,
    pub siblings: Vec<FieldElement>,
    pub key: RecordId,
    pub value: FieldElement,
}

impl InclusionProof {
    /// Recompute the root from the leaf and its siblings
    ///
    /// The leaf sits one level below the deepest non-zero sibling; zero
    /// siblings past that point are padding.
    pub fn compute_root<H: FieldHash>(&self, hasher: &H) -> FieldElement {
        let depth = self
            .siblings
            .iter()
            .rposition(|s| !s.is_zero())
            .map_or(0, |i| i + 1);

        let mut hash = hasher.hash1(FieldElement::from(self.key), self.value);
        for level in (0..depth).rev() {
            let sibling = self.siblings[level];
            hash = if (self.key >> level) & 1 == 1 {
                hasher.hash0(sibling, hash)
            } else {
                hasher.hash0(hash, sibling)
            };
        }
        hash
    }

    /// Check the proof against its own root
    pub fn verify<H: FieldHash>(&self, hasher: &H) -> bool {
        self.compute_root(hasher) == self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_proof_json_names() {
        let proof = CreationProof {
            fnc: FNC_INSERT,
            old_root: FieldElement::ZERO,
            new_root: FieldElement::ONE,
            siblings: vec![FieldElement::ZERO; 4],
            old_key: 0,
            old_value: FieldElement::ZERO,
            is_old0: 1,
            new_key: 1,
            new_value: FieldElement::ONE,
        };
        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json["isOld0"], 1);
        assert_eq!(json["fnc"], serde_json::json!([1, 0]));
        assert!(json.get("oldRoot").is_some());
        assert_eq!(json["siblings"].as_array().unwrap().len(), 4);
    }
}
