//! Tree node type

use super::FieldElement;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node inside one tree's node table
pub type NodeId = u64;

/// Integer identifier of a business record, also its tree key
pub type RecordId = u64;

/// Which branch a node hangs from under its parent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// A set path bit descends right, a clear one left
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            Side::Right
        } else {
            Side::Left
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("LEFT"),
            Side::Right => f.write_str("RIGHT"),
        }
    }
}

/// A persisted tree node
///
/// Nodes reference their parent by id; children are resolved through the
/// node table's `(parent, side)` index. A node is a leaf iff `key` is set,
/// and the key doubles as the reference to the owning record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: NodeId,
    pub hash: FieldElement,
    pub key: Option<RecordId>,
    pub parent: Option<NodeId>,
    pub side: Option<Side>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.key.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
