//! Node table - the persisted arena behind one tree
//!
//! Besides the nodes themselves the table keeps three indices:
//! - `(parent, side)` → child, unique per slot
//! - leaf key → node, unique per key
//! - the single root
//!
//! Only the nodes are serialized; indices are rebuilt (and checked) on load.

use crate::model::{FieldElement, NodeId, RecordId, Side, TreeNode};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "NodeTableRepr", into = "NodeTableRepr")]
pub struct NodeTable {
    nodes: BTreeMap<NodeId, TreeNode>,
    children: BTreeMap<(NodeId, Side), NodeId>,
    leaves: BTreeMap<RecordId, NodeId>,
    root: Option<NodeId>,
    next_id: NodeId,
}

/// On-disk form of a node table
#[derive(Clone, Serialize, Deserialize)]
struct NodeTableRepr {
    nodes: Vec<TreeNode>,
    next_id: NodeId,
}

impl Default for NodeTable {
    fn default() -> Self {
        NodeTable {
            nodes: BTreeMap::new(),
            children: BTreeMap::new(),
            leaves: BTreeMap::new(),
            root: None,
            next_id: 1,
        }
    }
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    pub fn root(&self) -> Option<&TreeNode> {
        self.root.and_then(|id| self.nodes.get(&id))
    }

    pub fn get(&self, id: NodeId) -> Result<&TreeNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| Error::InvariantViolation(format!("dangling node reference {}", id)))
    }

    pub fn child(&self, parent: NodeId, side: Side) -> Option<&TreeNode> {
        self.children
            .get(&(parent, side))
            .and_then(|id| self.nodes.get(id))
    }

    pub fn leaf(&self, key: RecordId) -> Option<&TreeNode> {
        self.leaves.get(&key).and_then(|id| self.nodes.get(id))
    }

    pub fn create(
        &mut self,
        hash: FieldElement,
        key: Option<RecordId>,
        parent: Option<(NodeId, Side)>,
    ) -> Result<TreeNode> {
        if let Some(key) = key {
            if let Some(existing) = self.leaves.get(&key) {
                return Err(Error::InvariantViolation(format!(
                    "key {} already held by node {}",
                    key, existing
                )));
            }
        }

        match parent {
            None => {
                if let Some(root) = self.root {
                    return Err(Error::InvariantViolation(format!(
                        "tree already has root {}",
                        root
                    )));
                }
            }
            Some((parent_id, side)) => {
                let parent = self.get(parent_id)?;
                if parent.is_leaf() {
                    return Err(Error::InvariantViolation(format!(
                        "leaf {} cannot take children",
                        parent_id
                    )));
                }
                if let Some(occupant) = self.children.get(&(parent_id, side)) {
                    return Err(Error::InvariantViolation(format!(
                        "slot {} of node {} is held by {}",
                        side, parent_id, occupant
                    )));
                }
            }
        }

        let node = TreeNode {
            id: self.next_id,
            hash,
            key,
            parent: parent.map(|(id, _)| id),
            side: parent.map(|(_, side)| side),
        };
        self.next_id += 1;
        self.index(&node);
        self.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    pub fn save(&mut self, node: &TreeNode) -> Result<()> {
        let current = self.get(node.id)?.clone();
        if current.parent != node.parent || current.side != node.side {
            return Err(Error::InvariantViolation(format!(
                "node {} cannot move within the tree",
                node.id
            )));
        }

        if current.key != node.key {
            if let Some(key) = node.key {
                if self.has_children(node.id) {
                    return Err(Error::InvariantViolation(format!(
                        "node {} has children and cannot hold key {}",
                        node.id, key
                    )));
                }
                if let Some(holder) = self.leaves.get(&key) {
                    return Err(Error::InvariantViolation(format!(
                        "key {} already held by node {}",
                        key, holder
                    )));
                }
                self.leaves.insert(key, node.id);
            }
            if let Some(old) = current.key {
                self.leaves.remove(&old);
            }
        }

        self.nodes.insert(node.id, node.clone());
        Ok(())
    }

    pub fn delete(&mut self, id: NodeId) -> Result<()> {
        if self.has_children(id) {
            return Err(Error::InvariantViolation(format!(
                "node {} still has children",
                id
            )));
        }
        let node = self
            .nodes
            .remove(&id)
            .ok_or_else(|| Error::InvariantViolation(format!("dangling node reference {}", id)))?;

        match (node.parent, node.side) {
            (Some(parent), Some(side)) => {
                self.children.remove(&(parent, side));
            }
            _ => self.root = None,
        }
        if let Some(key) = node.key {
            self.leaves.remove(&key);
        }
        Ok(())
    }

    fn has_children(&self, id: NodeId) -> bool {
        self.children.contains_key(&(id, Side::Left)) || self.children.contains_key(&(id, Side::Right))
    }

    fn index(&mut self, node: &TreeNode) {
        match (node.parent, node.side) {
            (Some(parent), Some(side)) => {
                self.children.insert((parent, side), node.id);
            }
            _ => self.root = Some(node.id),
        }
        if let Some(key) = node.key {
            self.leaves.insert(key, node.id);
        }
    }
}

impl From<NodeTable> for NodeTableRepr {
    fn from(table: NodeTable) -> Self {
        NodeTableRepr {
            nodes: table.nodes.into_values().collect(),
            next_id: table.next_id,
        }
    }
}

impl TryFrom<NodeTableRepr> for NodeTable {
    type Error = Error;

    fn try_from(repr: NodeTableRepr) -> Result<Self> {
        let mut table = NodeTable {
            next_id: repr.next_id,
            ..NodeTable::default()
        };

        for node in repr.nodes {
            if node.id >= table.next_id {
                return Err(Error::Corruption(format!(
                    "node id {} beyond allocator position {}",
                    node.id, table.next_id
                )));
            }
            if node.parent.is_some() != node.side.is_some() {
                return Err(Error::Corruption(format!("node {} has a partial parent link", node.id)));
            }
            let duplicate = match (node.parent, node.side) {
                (Some(parent), Some(side)) => table.children.contains_key(&(parent, side)),
                _ => table.root.is_some(),
            };
            if duplicate || node.key.is_some_and(|k| table.leaves.contains_key(&k)) {
                return Err(Error::Corruption(format!("node {} collides with another node", node.id)));
            }
            table.index(&node);
            table.nodes.insert(node.id, node);
        }

        if let Some((&(parent, _), _)) = table
            .children
            .iter()
            .find(|((parent, _), _)| !table.nodes.contains_key(parent))
        {
            return Err(Error::Corruption(format!("missing parent node {}", parent)));
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_root() {
        let mut table = NodeTable::new();
        table.create(FieldElement::ZERO, None, None).unwrap();
        let second = table.create(FieldElement::ZERO, None, None);
        assert!(matches!(second, Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_slot_is_unique() {
        let mut table = NodeTable::new();
        let root = table.create(FieldElement::ZERO, None, None).unwrap();
        table
            .create(FieldElement::ONE, Some(1), Some((root.id, Side::Right)))
            .unwrap();
        let clash = table.create(FieldElement::ONE, Some(3), Some((root.id, Side::Right)));
        assert!(matches!(clash, Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_leaf_cannot_take_children() {
        let mut table = NodeTable::new();
        let root = table.create(FieldElement::ONE, Some(1), None).unwrap();
        let child = table.create(FieldElement::ONE, Some(2), Some((root.id, Side::Left)));
        assert!(matches!(child, Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_save_moves_leaf_index() {
        let mut table = NodeTable::new();
        let root = table.create(FieldElement::ZERO, None, None).unwrap();
        let mut leaf = table
            .create(FieldElement::ONE, Some(1), Some((root.id, Side::Right)))
            .unwrap();

        table.delete(leaf.id).unwrap();
        assert!(table.leaf(1).is_none());

        let mut root = table.root().unwrap().clone();
        root.key = Some(1);
        table.save(&root).unwrap();
        assert_eq!(table.leaf(1).unwrap().id, root.id);

        leaf.parent = None;
        assert!(table.save(&leaf).is_err());
    }

    #[test]
    fn test_delete_requires_no_children() {
        let mut table = NodeTable::new();
        let root = table.create(FieldElement::ZERO, None, None).unwrap();
        table
            .create(FieldElement::ONE, Some(1), Some((root.id, Side::Left)))
            .unwrap();
        assert!(matches!(table.delete(root.id), Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_indices_rebuilt_after_decode() {
        let mut table = NodeTable::new();
        let root = table.create(FieldElement::ZERO, None, None).unwrap();
        table
            .create(FieldElement::ONE, Some(3), Some((root.id, Side::Right)))
            .unwrap();

        let bytes = bincode::serialize(&table).unwrap();
        let decoded: NodeTable = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.root().unwrap().id, root.id);
        assert_eq!(decoded.child(root.id, Side::Right).unwrap().key, Some(3));
        assert!(decoded.leaf(3).is_some());
    }
}
