//! Anchor queue - pending external commits, one per tree mutation

use super::RecordId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sequence number of a queue entry; defines processing order
pub type EntryId = u64;

/// Opaque handle to a submitted ledger transaction
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxRef(pub String);

impl TxRef {
    pub fn new(tx: impl Into<String>) -> Self {
        TxRef(tx.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which tree mutation an entry anchors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueAction {
    Create,
    Update,
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueAction::Create => f.write_str("CREATE"),
            QueueAction::Update => f.write_str("UPDATE"),
        }
    }
}

/// A pending external commit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorEntry {
    pub id: EntryId,
    pub record_id: RecordId,
    /// None while awaiting resubmission
    pub tx_ref: Option<TxRef>,
    pub action: QueueAction,
    /// The original commit was unwound; redo with a fresh proof
    pub is_regeneration: bool,
}

/// Ordered log of pending anchor entries for one tree
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnchorQueue {
    entries: BTreeMap<EntryId, AnchorEntry>,
    next_id: EntryId,
}

impl Default for AnchorQueue {
    fn default() -> Self {
        AnchorQueue {
            entries: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl AnchorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry at the back of the queue
    pub fn push(&mut self, record_id: RecordId, tx_ref: TxRef, action: QueueAction) -> AnchorEntry {
        let entry = AnchorEntry {
            id: self.next_id,
            record_id,
            tx_ref: Some(tx_ref),
            action,
            is_regeneration: false,
        };
        self.next_id += 1;
        self.entries.insert(entry.id, entry.clone());
        entry
    }

    pub fn get(&self, id: EntryId) -> Option<&AnchorEntry> {
        self.entries.get(&id)
    }

    pub fn remove(&mut self, id: EntryId) -> Result<AnchorEntry> {
        self.entries
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("queue entry {}", id)))
    }

    /// Oldest entries first, at most `limit`
    pub fn pending(&self, limit: usize) -> Vec<AnchorEntry> {
        self.entries.values().take(limit).cloned().collect()
    }

    /// Oldest regeneration tasks first, at most `limit`
    pub fn regenerations(&self, limit: usize) -> Vec<AnchorEntry> {
        self.entries
            .values()
            .filter(|e| e.is_regeneration)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Entries at or after `id` whose tree effect is still applied, oldest first
    pub fn applied_from(&self, id: EntryId) -> Vec<AnchorEntry> {
        self.entries
            .range(id..)
            .map(|(_, e)| e)
            .filter(|e| !e.is_regeneration)
            .cloned()
            .collect()
    }

    /// Turn every entry after `id` into a regeneration task
    pub fn mark_regeneration_after(&mut self, id: EntryId) -> usize {
        let mut marked = 0;
        for (_, entry) in self.entries.range_mut(id + 1..) {
            entry.tx_ref = None;
            entry.is_regeneration = true;
            marked += 1;
        }
        marked
    }

    /// Whether any entry anchors the given record
    pub fn references(&self, record_id: RecordId) -> bool {
        self.entries.values().any(|e| e.record_id == record_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnchorEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
