//! Core data model types for smt_anchor

mod field;
mod node;
mod queue;
mod record;

pub use field::FieldElement;
pub use node::{NodeId, RecordId, Side, TreeNode};
pub use queue::{AnchorEntry, AnchorQueue, EntryId, QueueAction, TxRef};
pub use record::{
    now_millis, Doctor, NewDoctor, NewPrescription, Prescription, TreeKind, TreeRecord,
};
