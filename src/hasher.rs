//! Pluggable field hash
//!
//! The tree only needs three operations from its hash: `hash0` for internal
//! nodes, `hash1` for leaves and `hash_fields` for hashing a record's
//! authenticated fields. A Poseidon implementation can be dropped in by
//! implementing [`FieldHash`]; the default uses BLAKE3 reduced into the field.

use crate::model::FieldElement;

const DOMAIN: &[u8] = b"smt-anchor/field-hash/v1";

/// Cryptographic hash over field elements
pub trait FieldHash: Clone + Send + Sync + 'static {
    /// Hash an ordered list of field elements
    fn hash_fields(&self, inputs: &[FieldElement]) -> FieldElement;

    /// Internal node hash
    fn hash0(&self, left: FieldElement, right: FieldElement) -> FieldElement {
        self.hash_fields(&[left, right])
    }

    /// Leaf hash: H(key, value, 1)
    fn hash1(&self, key: FieldElement, value: FieldElement) -> FieldElement {
        self.hash_fields(&[key, value, FieldElement::ONE])
    }
}

/// BLAKE3-backed field hash
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3FieldHash;

impl FieldHash for Blake3FieldHash {
    fn hash_fields(&self, inputs: &[FieldElement]) -> FieldElement {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN);
        // Arity prefix keeps hash0/hash1/record hashes in separate domains
        hasher.update(&(inputs.len() as u64).to_le_bytes());
        for input in inputs {
            hasher.update(input.as_bytes());
        }
        FieldElement::reduce(*hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let h = Blake3FieldHash;
        let a = FieldElement::from_u64(1);
        let b = FieldElement::from_u64(2);
        assert_eq!(h.hash0(a, b), h.hash0(a, b));
        assert_ne!(h.hash0(a, b), h.hash0(b, a));
    }

    #[test]
    fn test_leaf_and_node_domains_differ() {
        let h = Blake3FieldHash;
        let a = FieldElement::from_u64(7);
        let b = FieldElement::from_u64(9);
        assert_ne!(h.hash0(a, b), h.hash1(a, b));
        assert_ne!(h.hash1(a, b), h.hash_fields(&[a, b]));
    }
}
