//! Sparse Merkle tree over persisted nodes
//!
//! This implements a fixed-depth binary authenticated tree where:
//! - Keys are record ids, split into `key_length` path bits (LSB first)
//! - Only occupied paths are materialized; absent children hash to zero
//! - A leaf sits at the shallowest depth where its key is unique, so the
//!   structure (and the root) depends only on the set of records
//!
//! Nodes live in a store addressed by id; the engine never holds references
//! between nodes, it resolves parents and children through [`NodeStore`].

mod instances;
mod path;
mod proof;
mod smt;

pub use instances::{DoctorTree, PrescriptionTree};
pub use path::{split_key, MAX_KEY_LENGTH};
pub use proof::{
    CreationProof, InclusionProof, ProcessorFunction, UpdateProof, FNC_INSERT, FNC_UPDATE,
};
pub use smt::SparseMerkleTree;

use crate::model::{FieldElement, NodeId, RecordId, Side, TreeNode};
use crate::Result;

/// Node storage for one tree
pub trait NodeStore {
    /// The node without a parent, if the tree is not empty
    fn root(&self) -> Result<Option<TreeNode>>;

    fn node(&self, id: NodeId) -> Result<TreeNode>;

    fn child(&self, parent: NodeId, side: Side) -> Result<Option<TreeNode>>;

    /// The leaf holding `key`, if any
    fn leaf(&self, key: RecordId) -> Result<Option<TreeNode>>;

    /// Create a node, under `parent` on the given side or as the root
    fn create_node(
        &mut self,
        hash: FieldElement,
        key: Option<RecordId>,
        parent: Option<(NodeId, Side)>,
    ) -> Result<TreeNode>;

    /// Persist a changed hash or key; position in the tree is immutable
    fn save_node(&mut self, node: &TreeNode) -> Result<()>;

    /// Delete a childless node
    fn delete_node(&mut self, id: NodeId) -> Result<()>;
}

/// Node storage plus access to the records the leaves reference
pub trait TreeStore<R>: NodeStore {
    fn load_record(&self, id: RecordId) -> Result<R>;
}
