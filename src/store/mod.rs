//! Transactional record, node and queue storage
//!
//! All persisted state (records, tree nodes and anchor queues of both trees)
//! lives in one [`State`] value. Writers work on a private copy inside a
//! [`Transaction`]; committing writes the snapshot file and then publishes
//! the copy, dropping the transaction discards it. Writers are serialized,
//! readers always see the last committed state.

mod file_store;
mod nodes;

pub use file_store::FileStore;
pub use nodes::NodeTable;

use crate::model::{
    AnchorQueue, Doctor, FieldElement, NodeId, Prescription, RecordId, Side, TreeKind, TreeNode,
    TreeRecord,
};
use crate::tree::{NodeStore, TreeStore};
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Records, nodes and queue of one tree
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "R: TreeRecord"))]
pub struct Table<R> {
    records: BTreeMap<RecordId, R>,
    next_record_id: RecordId,
    nodes: NodeTable,
    queue: AnchorQueue,
}

impl<R> Default for Table<R> {
    fn default() -> Self {
        Table {
            records: BTreeMap::new(),
            next_record_id: 1,
            nodes: NodeTable::new(),
            queue: AnchorQueue::new(),
        }
    }
}

impl<R: TreeRecord> Table<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next record id
    pub fn allocate_id(&mut self) -> RecordId {
        let id = self.next_record_id;
        self.next_record_id += 1;
        id
    }

    /// Store a new record under its own id
    pub fn insert_record(&mut self, record: R) -> Result<()> {
        let id = record.id();
        if self.records.contains_key(&id) {
            return Err(Error::AlreadyExists(format!("{} record {}", R::KIND, id)));
        }
        self.next_record_id = self.next_record_id.max(id + 1);
        self.records.insert(id, record);
        Ok(())
    }

    /// Replace an existing record
    pub fn put_record(&mut self, record: R) {
        self.records.insert(record.id(), record);
    }

    pub fn remove_record(&mut self, id: RecordId) -> Result<R> {
        self.records
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("{} record {}", R::KIND, id)))
    }

    pub fn record(&self, id: RecordId) -> Result<&R> {
        self.records
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("{} record {}", R::KIND, id)))
    }

    pub fn get(&self, id: RecordId) -> Option<&R> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &R> {
        self.records.values()
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn queue(&self) -> &AnchorQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut AnchorQueue {
        &mut self.queue
    }
}

impl<R: TreeRecord> NodeStore for Table<R> {
    fn root(&self) -> Result<Option<TreeNode>> {
        Ok(self.nodes.root().cloned())
    }

    fn node(&self, id: NodeId) -> Result<TreeNode> {
        self.nodes.get(id).cloned()
    }

    fn child(&self, parent: NodeId, side: Side) -> Result<Option<TreeNode>> {
        Ok(self.nodes.child(parent, side).cloned())
    }

    fn leaf(&self, key: RecordId) -> Result<Option<TreeNode>> {
        Ok(self.nodes.leaf(key).cloned())
    }

    fn create_node(
        &mut self,
        hash: FieldElement,
        key: Option<RecordId>,
        parent: Option<(NodeId, Side)>,
    ) -> Result<TreeNode> {
        self.nodes.create(hash, key, parent)
    }

    fn save_node(&mut self, node: &TreeNode) -> Result<()> {
        self.nodes.save(node)
    }

    fn delete_node(&mut self, id: NodeId) -> Result<()> {
        self.nodes.delete(id)
    }
}

impl<R: TreeRecord> TreeStore<R> for Table<R> {
    fn load_record(&self, id: RecordId) -> Result<R> {
        self.record(id).cloned()
    }
}

/// Everything that is persisted
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct State {
    pub doctors: Table<Doctor>,
    pub prescriptions: Table<Prescription>,
}

impl State {
    pub fn table<R: StoredRecord>(&self) -> &Table<R> {
        R::table(self)
    }

    pub fn table_mut<R: StoredRecord>(&mut self) -> &mut Table<R> {
        R::table_mut(self)
    }

    pub fn nodes(&self, kind: TreeKind) -> &NodeTable {
        match kind {
            TreeKind::Doctors => self.doctors.nodes(),
            TreeKind::Prescriptions => self.prescriptions.nodes(),
        }
    }

    pub fn queue(&self, kind: TreeKind) -> &AnchorQueue {
        match kind {
            TreeKind::Doctors => self.doctors.queue(),
            TreeKind::Prescriptions => self.prescriptions.queue(),
        }
    }

    pub fn contains(&self, kind: TreeKind, id: RecordId) -> bool {
        match kind {
            TreeKind::Doctors => self.doctors.get(id).is_some(),
            TreeKind::Prescriptions => self.prescriptions.get(id).is_some(),
        }
    }

    /// Root hash of a tree (zero when empty)
    pub fn root(&self, kind: TreeKind) -> FieldElement {
        self.nodes(kind)
            .root()
            .map_or(FieldElement::ZERO, |root| root.hash)
    }
}

/// A record kind with a table in [`State`]
pub trait StoredRecord: TreeRecord {
    fn table(state: &State) -> &Table<Self>;
    fn table_mut(state: &mut State) -> &mut Table<Self>;
}

impl StoredRecord for Doctor {
    fn table(state: &State) -> &Table<Self> {
        &state.doctors
    }

    fn table_mut(state: &mut State) -> &mut Table<Self> {
        &mut state.doctors
    }
}

impl StoredRecord for Prescription {
    fn table(state: &State) -> &Table<Self> {
        &state.prescriptions
    }

    fn table_mut(state: &mut State) -> &mut Table<Self> {
        &mut state.prescriptions
    }
}

/// Shared handle to the committed state
pub struct Store {
    state: RwLock<State>,
    writer: Mutex<()>,
    file: Option<FileStore>,
}

impl Store {
    /// A store that lives only as long as the process
    pub fn in_memory() -> Self {
        Store {
            state: RwLock::new(State::default()),
            writer: Mutex::new(()),
            file: None,
        }
    }

    /// Create a new, empty snapshot file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = FileStore::new(path);
        if file.exists() {
            return Err(Error::AlreadyExists(file.path().display().to_string()));
        }
        let state = State::default();
        file.save(&state)?;
        info!(path = %file.path().display(), "created store");
        Ok(Store {
            state: RwLock::new(state),
            writer: Mutex::new(()),
            file: Some(file),
        })
    }

    /// Open an existing snapshot file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = FileStore::new(path);
        let state = file.load()?;
        debug!(
            path = %file.path().display(),
            doctors = state.doctors.records.len(),
            prescriptions = state.prescriptions.records.len(),
            "opened store"
        );
        Ok(Store {
            state: RwLock::new(state),
            writer: Mutex::new(()),
            file: Some(file),
        })
    }

    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }

    /// Run a closure against the committed state
    pub fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        f(&self.state.read())
    }

    /// Copy of the committed state
    pub fn snapshot(&self) -> State {
        self.state.read().clone()
    }

    /// Start a write transaction, waiting for any other writer to finish
    pub async fn begin(&self) -> Transaction<'_> {
        let guard = self.writer.lock().await;
        Transaction {
            store: self,
            working: self.snapshot(),
            _guard: guard,
        }
    }
}

/// An exclusive unit of work over a private copy of the state
///
/// Dropping a transaction without committing rolls it back.
pub struct Transaction<'a> {
    store: &'a Store,
    working: State,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> Transaction<'a> {
    pub fn state(&self) -> &State {
        &self.working
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.working
    }

    pub fn table<R: StoredRecord>(&self) -> &Table<R> {
        self.working.table()
    }

    pub fn table_mut<R: StoredRecord>(&mut self) -> &mut Table<R> {
        self.working.table_mut()
    }

    /// Persist and publish the working state
    pub fn commit(self) -> Result<()> {
        if let Some(file) = &self.store.file {
            file.save(&self.working)?;
        }
        *self.store.state.write() = self.working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewDoctor;
    use tempfile::tempdir;

    fn doctor(id: RecordId) -> Doctor {
        NewDoctor {
            license: id * 10,
            user_id: id,
        }
        .with_id(id)
    }

    #[test]
    fn test_allocate_ids_after_explicit_insert() {
        let mut table: Table<Doctor> = Table::new();
        assert_eq!(table.allocate_id(), 1);
        table.insert_record(doctor(5)).unwrap();
        assert_eq!(table.allocate_id(), 6);
        assert!(matches!(table.insert_record(doctor(5)), Err(Error::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = Store::in_memory();
        {
            let mut tx = store.begin().await;
            tx.table_mut::<Doctor>().insert_record(doctor(1)).unwrap();
        }
        assert!(store.read(|s| s.doctors.get(1).is_none()));

        let mut tx = store.begin().await;
        tx.table_mut::<Doctor>().insert_record(doctor(1)).unwrap();
        tx.commit().unwrap();
        assert!(store.read(|s| s.doctors.get(1).is_some()));
    }

    #[tokio::test]
    async fn test_commit_persists_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("anchors.smt");

        {
            let store = Store::create(&path).unwrap();
            let mut tx = store.begin().await;
            tx.table_mut::<Doctor>().insert_record(doctor(3)).unwrap();
            tx.commit().unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert_eq!(store.read(|s| s.doctors.record(3).unwrap().license), 30);
        assert!(matches!(Store::create(&path), Err(Error::AlreadyExists(_))));
    }
}
