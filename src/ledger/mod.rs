//! External collaborators: the ledger that anchors roots and the prover
//!
//! The core only needs a narrow contract from each, so both are traits:
//! - [`LedgerClient`] submits root updates and polls their fate
//! - [`ProofSystem`] turns circuit inputs into a succinct proof
//!
//! Scriptable in-process implementations live in [`mock`].

mod mock;

pub use mock::{MockLedger, MockProver, Submission, TxStatus};

use crate::model::{FieldElement, RecordId, TreeKind, TxRef};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A Groth16-shaped proof with its public signals
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    #[serde(rename = "publicSignals")]
    pub public_signals: Vec<String>,
}

/// Circuit a proof is generated for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitId {
    DoctorCreation,
    PrescriptionCreation,
    PrescriptionUpdate,
    MerkleInclusion,
}

impl CircuitId {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitId::DoctorCreation => "doctor_creation",
            CircuitId::PrescriptionCreation => "prescription_creation",
            CircuitId::PrescriptionUpdate => "prescription_update",
            CircuitId::MerkleInclusion => "merkle_inclusion",
        }
    }

    /// Circuit proving an insertion into the given tree
    pub fn creation(kind: TreeKind) -> Self {
        match kind {
            TreeKind::Doctors => CircuitId::DoctorCreation,
            TreeKind::Prescriptions => CircuitId::PrescriptionCreation,
        }
    }

    /// Circuit proving an in-place update in the given tree
    pub fn update(kind: TreeKind) -> Result<Self> {
        match kind {
            TreeKind::Doctors => Err(Error::Unsupported(format!("no update circuit for {}", kind))),
            TreeKind::Prescriptions => Ok(CircuitId::PrescriptionUpdate),
        }
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which on-ledger root a submission replaces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootUpdate {
    DoctorsRoot,
    PrescriptionsRoot,
    /// Prescriptions root after a dispensation
    PrescriptionUsed,
}

impl RootUpdate {
    pub fn creation(kind: TreeKind) -> Self {
        match kind {
            TreeKind::Doctors => RootUpdate::DoctorsRoot,
            TreeKind::Prescriptions => RootUpdate::PrescriptionsRoot,
        }
    }

    pub fn update(kind: TreeKind) -> Result<Self> {
        match kind {
            TreeKind::Doctors => Err(Error::Unsupported(format!("no update method for {}", kind))),
            TreeKind::Prescriptions => Ok(RootUpdate::PrescriptionUsed),
        }
    }

    /// The tree whose root this submission carries
    pub fn kind(&self) -> TreeKind {
        match self {
            RootUpdate::DoctorsRoot => TreeKind::Doctors,
            RootUpdate::PrescriptionsRoot | RootUpdate::PrescriptionUsed => TreeKind::Prescriptions,
        }
    }
}

/// Client of the ledger contract that stores the tree roots
///
/// Implementations report an unreachable ledger as [`Error::Unavailable`];
/// every other error is treated as a definitive answer.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a new root with its proof; returns a handle to poll
    async fn submit_root_update(
        &self,
        target: RootUpdate,
        new_root: FieldElement,
        proof: &Proof,
    ) -> Result<TxRef>;

    /// Whether the transaction was definitively rejected
    async fn is_failed(&self, tx: &TxRef) -> Result<bool>;

    /// Whether the transaction is final
    async fn is_confirmed(&self, tx: &TxRef) -> Result<bool>;

    /// Ask the ledger whether `key` with `value` is in the anchored tree
    async fn submit_inclusion_check(
        &self,
        kind: TreeKind,
        key: RecordId,
        value: FieldElement,
        proof: &Proof,
    ) -> Result<bool>;
}

/// Proof generation backend
#[async_trait]
pub trait ProofSystem: Send + Sync {
    /// Prove `inputs` (camelCase JSON) against the given circuit
    async fn prove(&self, inputs: &serde_json::Value, circuit: CircuitId) -> Result<Proof>;
}
