//! # smt_anchor
//!
//! Sparse Merkle tree index for application records, with roots anchored to
//! an external ledger.
//!
//! Every record write mutates a local authenticated tree and submits the new
//! root, with a proof, to a ledger. Ledger commits are slow and may fail, so
//! each submission is tracked in an ordered queue that a reconciliation
//! worker drains: confirmed entries are finalized, a failed entry is unwound
//! together with everything applied after it, and the unwound work is
//! regenerated against the restored tree.
//!
//! ## Core Concepts
//!
//! - **Trees**: one sparse Merkle tree per record kind (doctors, prescriptions)
//! - **Proofs**: mutations emit the circuit inputs that prove them
//! - **Anchor queue**: per-tree log of submissions awaiting confirmation
//! - **Reconciliation**: confirm, revert or regenerate queue entries in order
//!
//! ## Example
//!
//! ```ignore
//! use smt_anchor::{AnchorConfig, AnchorService, MockLedger, MockProver, NewDoctor, Store};
//! use std::sync::Arc;
//!
//! let store = Arc::new(Store::open_or_create("anchors.smt")?);
//! let service = AnchorService::new(
//!     store,
//!     Arc::new(MockLedger::instant()),
//!     Arc::new(MockProver::new()),
//!     AnchorConfig::default(),
//! )?;
//! let doctor = service.create_doctor(NewDoctor { license: 1234, user_id: 7 }).await?;
//! ```

pub mod config;
pub mod hasher;
pub mod ledger;
pub mod model;
pub mod service;
pub mod store;
pub mod tree;
pub mod worker;

mod error;

pub use config::AnchorConfig;
pub use error::{Error, Result};
pub use hasher::{Blake3FieldHash, FieldHash};
pub use ledger::{CircuitId, LedgerClient, MockLedger, MockProver, Proof, ProofSystem, RootUpdate};
pub use model::{
    AnchorEntry, Doctor, FieldElement, NewDoctor, NewPrescription, Prescription, QueueAction,
    RecordId, TreeKind, TreeRecord, TxRef,
};
pub use service::{AnchorEvent, AnchorService};
pub use store::{State, Store, Transaction};
pub use tree::{CreationProof, InclusionProof, SparseMerkleTree, UpdateProof};
pub use worker::{ReconciliationWorker, TickReport, WorkerHandle};

/// Snapshot file format version
pub const VERSION: u32 = 1;

/// Magic bytes for file identification
pub const MAGIC: &[u8; 8] = b"SMTANCHR";
