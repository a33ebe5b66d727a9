//! Sparse Merkle tree engine

use super::path::{split_key, MAX_KEY_LENGTH};
use super::proof::{CreationProof, InclusionProof, UpdateProof, FNC_INSERT, FNC_UPDATE};
use super::{NodeStore, TreeStore};
use crate::hasher::{Blake3FieldHash, FieldHash};
use crate::model::{FieldElement, NodeId, RecordId, Side, TreeNode, TreeRecord};
use crate::{Error, Result};
use std::marker::PhantomData;
use tracing::debug;

/// Tree mechanics for one record kind
///
/// The engine is stateless apart from its hash and key length; every
/// operation works against the store it is given, so callers control the
/// transaction each mutation runs in.
#[derive(Clone, Debug)]
pub struct SparseMerkleTree<R, H = Blake3FieldHash> {
    hasher: H,
    key_length: u32,
    _record: PhantomData<fn() -> R>,
}

/// Result of walking a key's path from the root
struct Descent {
    /// Hash of the branch not taken at each level, padded with zeros
    siblings: Vec<FieldElement>,
    /// The leaf reached, or the internal node whose slot for the key is empty
    terminal: TreeNode,
}

impl<R: TreeRecord, H: FieldHash> SparseMerkleTree<R, H> {
    pub fn new(hasher: H, key_length: u32) -> Result<Self> {
        if key_length == 0 || key_length > MAX_KEY_LENGTH {
            return Err(Error::Config(format!(
                "key length must be within 1..={}, got {}",
                MAX_KEY_LENGTH, key_length
            )));
        }
        Ok(SparseMerkleTree {
            hasher,
            key_length,
            _record: PhantomData,
        })
    }

    pub fn key_length(&self) -> u32 {
        self.key_length
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Authenticated value of a record
    pub fn hash_data(&self, record: &R) -> FieldElement {
        record.hash_data(&self.hasher)
    }

    /// Current root hash (zero for an empty tree)
    pub fn root_hash<S: NodeStore + ?Sized>(&self, store: &S) -> Result<FieldElement> {
        Ok(store.root()?.map_or(FieldElement::ZERO, |root| root.hash))
    }

    /// Insert a record as a new leaf
    pub fn insert<S: TreeStore<R> + ?Sized>(&self, store: &mut S, record: &R) -> Result<CreationProof> {
        let key = record.id();
        let bits = split_key(key, self.key_length)?;
        if store.leaf(key)?.is_some() {
            return Err(Error::AlreadyExists(format!("{} leaf {}", R::KIND, key)));
        }

        let new_value = self.hash_data(record);
        let leaf_hash = self.leaf_hash(key, new_value);

        let Some(root) = store.root()? else {
            store.create_node(leaf_hash, Some(key), None)?;
            debug!(tree = %R::KIND, key, "inserted root leaf");
            return Ok(CreationProof {
                fnc: FNC_INSERT,
                old_root: FieldElement::ZERO,
                new_root: leaf_hash,
                siblings: vec![FieldElement::ZERO; bits.len()],
                old_key: 0,
                old_value: FieldElement::ZERO,
                is_old0: 1,
                new_key: key,
                new_value,
            });
        };

        // Siblings and the old node come from the same walk, before any change
        let descent = self.descend(&*store, &root, &bits)?;
        let (old_key, old_value) = match descent.terminal.key {
            Some(old_key) => (old_key, self.hash_data(&store.load_record(old_key)?)),
            None => (0, FieldElement::ZERO),
        };

        let leaf = self.attach_leaf(store, root.clone(), &bits, key, leaf_hash)?;
        let parent = leaf.parent.ok_or_else(|| {
            Error::InvariantViolation(format!("new leaf {} has no parent", leaf.id))
        })?;
        let new_root = self.rehash_from(store, parent)?;

        debug!(tree = %R::KIND, key, old_key, root = %new_root.short(), "inserted leaf");
        Ok(CreationProof {
            fnc: FNC_INSERT,
            old_root: root.hash,
            new_root,
            siblings: descent.siblings,
            old_key,
            old_value,
            is_old0: 0,
            new_key: key,
            new_value,
        })
    }

    /// Re-hash an existing leaf with the record's new value
    ///
    /// The store must still hold the previous version of the record; its
    /// value becomes `old_value` in the proof.
    pub fn update<S: TreeStore<R> + ?Sized>(&self, store: &mut S, record: &R) -> Result<UpdateProof> {
        let key = record.id();
        let bits = split_key(key, self.key_length)?;
        let mut leaf = store
            .leaf(key)?
            .ok_or_else(|| Error::NotFound(format!("{} leaf {}", R::KIND, key)))?;
        let root = store
            .root()?
            .ok_or_else(|| Error::InvariantViolation(format!("leaf {} without a root", key)))?;

        let descent = self.descend(&*store, &root, &bits)?;
        if descent.terminal.id != leaf.id {
            return Err(Error::InvariantViolation(format!(
                "leaf {} is not on the path of key {}",
                leaf.id, key
            )));
        }

        let old_value = self.hash_data(&store.load_record(key)?);
        let new_value = self.hash_data(record);
        leaf.hash = self.leaf_hash(key, new_value);
        store.save_node(&leaf)?;

        let new_root = match leaf.parent {
            Some(parent) => self.rehash_from(store, parent)?,
            None => leaf.hash,
        };

        debug!(tree = %R::KIND, key, root = %new_root.short(), "updated leaf");
        Ok(UpdateProof {
            fnc: FNC_UPDATE,
            old_root: root.hash,
            new_root,
            siblings: descent.siblings,
            old_key: key,
            old_value,
            is_old0: 0,
            new_key: key,
            new_value,
        })
    }

    /// Delete a leaf and collapse the branches it leaves behind
    ///
    /// Exact inverse of [`insert`](Self::insert): the tree ends up with the
    /// structure and root it would have had if the key was never inserted.
    /// Returns the new root hash.
    pub fn remove<S: NodeStore + ?Sized>(&self, store: &mut S, key: RecordId) -> Result<FieldElement> {
        split_key(key, self.key_length)?;
        let leaf = store
            .leaf(key)?
            .ok_or_else(|| Error::NotFound(format!("{} leaf {}", R::KIND, key)))?;
        store.delete_node(leaf.id)?;

        let Some(parent) = leaf.parent else {
            debug!(tree = %R::KIND, key, "removed last leaf");
            return Ok(FieldElement::ZERO);
        };

        let mut current = store.node(parent)?;
        let new_root = loop {
            let left = store.child(current.id, Side::Left)?;
            let right = store.child(current.id, Side::Right)?;
            match (left, right) {
                (None, None) => {
                    // Empty internal node
                    store.delete_node(current.id)?;
                    match current.parent {
                        Some(parent) => current = store.node(parent)?,
                        None => break FieldElement::ZERO,
                    }
                }
                (Some(only), None) | (None, Some(only)) if only.is_leaf() => {
                    store.delete_node(only.id)?;
                    current.key = only.key;
                    current.hash = only.hash;
                    store.save_node(&current)?;
                    let promoted = self.collapse_upward(store, current)?;
                    break match promoted.parent {
                        Some(parent) => self.rehash_from(store, parent)?,
                        None => promoted.hash,
                    };
                }
                _ => break self.rehash_from(store, current.id)?,
            }
        };

        debug!(tree = %R::KIND, key, root = %new_root.short(), "removed leaf");
        Ok(new_root)
    }

    /// Sibling hashes along the path of `key`
    pub fn siblings<S: NodeStore + ?Sized>(&self, store: &S, key: RecordId) -> Result<Vec<FieldElement>> {
        let bits = split_key(key, self.key_length)?;
        let root = store
            .root()?
            .ok_or_else(|| Error::NotFound(format!("{} tree is empty", R::KIND)))?;
        Ok(self.descend(store, &root, &bits)?.siblings)
    }

    /// Membership proof for the leaf holding `key`
    pub fn inclusion_proof<S: TreeStore<R> + ?Sized>(&self, store: &S, key: RecordId) -> Result<InclusionProof> {
        let bits = split_key(key, self.key_length)?;
        let root = store
            .root()?
            .ok_or_else(|| Error::NotFound(format!("{} tree is empty", R::KIND)))?;
        let descent = self.descend(store, &root, &bits)?;
        if descent.terminal.key != Some(key) {
            return Err(Error::NotFound(format!("{} leaf {}", R::KIND, key)));
        }

        Ok(InclusionProof {
            root: root.hash,
            siblings: descent.siblings,
            key,
            value: self.hash_data(&store.load_record(key)?),
        })
    }

    // === Internal helpers ===

    fn leaf_hash(&self, key: RecordId, value: FieldElement) -> FieldElement {
        self.hasher.hash1(FieldElement::from(key), value)
    }

    fn descend<S: NodeStore + ?Sized>(&self, store: &S, root: &TreeNode, bits: &[bool]) -> Result<Descent> {
        let mut siblings = Vec::with_capacity(bits.len());
        let mut current = root.clone();

        for &bit in bits {
            if current.is_leaf() {
                break;
            }
            let side = Side::from_bit(bit);
            let sibling = store.child(current.id, side.opposite())?;
            siblings.push(sibling.map_or(FieldElement::ZERO, |n| n.hash));

            match store.child(current.id, side)? {
                Some(child) => current = child,
                None => break,
            }
        }

        siblings.resize(bits.len(), FieldElement::ZERO);
        Ok(Descent {
            siblings,
            terminal: current,
        })
    }

    /// Walk down the key's path, splitting resident leaves until a free slot appears
    fn attach_leaf<S: NodeStore + ?Sized>(
        &self,
        store: &mut S,
        root: TreeNode,
        bits: &[bool],
        key: RecordId,
        leaf_hash: FieldElement,
    ) -> Result<TreeNode> {
        let mut current = root;

        for (depth, &bit) in bits.iter().enumerate() {
            if let Some(resident) = current.key {
                // Collision: turn the leaf into an internal node and push
                // the resident one level down on its own side
                let resident_bits = split_key(resident, self.key_length)?;
                let resident_hash = current.hash;
                current.key = None;
                current.hash = FieldElement::ZERO;
                store.save_node(&current)?;
                store.create_node(
                    resident_hash,
                    Some(resident),
                    Some((current.id, Side::from_bit(resident_bits[depth]))),
                )?;
            }

            let side = Side::from_bit(bit);
            match store.child(current.id, side)? {
                Some(child) => current = child,
                None => return store.create_node(leaf_hash, Some(key), Some((current.id, side))),
            }
        }

        Err(Error::InvariantViolation(format!(
            "no free slot for key {} within {} bits",
            key, self.key_length
        )))
    }

    /// Move a promoted leaf up through parents that have no other child
    fn collapse_upward<S: NodeStore + ?Sized>(&self, store: &mut S, mut node: TreeNode) -> Result<TreeNode> {
        while let Some(parent_id) = node.parent {
            let mut parent = store.node(parent_id)?;
            if self.child_count(&*store, parent_id)? != 1 {
                break;
            }
            store.delete_node(node.id)?;
            parent.key = node.key;
            parent.hash = node.hash;
            store.save_node(&parent)?;
            node = parent;
        }
        Ok(node)
    }

    fn child_count<S: NodeStore + ?Sized>(&self, store: &S, id: NodeId) -> Result<usize> {
        let left = store.child(id, Side::Left)?.is_some();
        let right = store.child(id, Side::Right)?.is_some();
        Ok(usize::from(left) + usize::from(right))
    }

    /// Recompute hashes from an internal node up to the root
    fn rehash_from<S: NodeStore + ?Sized>(&self, store: &mut S, start: NodeId) -> Result<FieldElement> {
        let mut node = store.node(start)?;
        loop {
            if node.is_leaf() {
                return Err(Error::InvariantViolation(format!(
                    "leaf {} found above another node",
                    node.id
                )));
            }
            let left = store
                .child(node.id, Side::Left)?
                .map_or(FieldElement::ZERO, |n| n.hash);
            let right = store
                .child(node.id, Side::Right)?
                .map_or(FieldElement::ZERO, |n| n.hash);
            node.hash = self.hasher.hash0(left, right);
            store.save_node(&node)?;

            match node.parent {
                Some(parent) => node = store.node(parent)?,
                None => return Ok(node.hash),
            }
        }
    }
}
