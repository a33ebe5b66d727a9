//! In-process ledger and prover for testing and local runs

use super::{CircuitId, LedgerClient, Proof, ProofSystem, RootUpdate};
use crate::model::{FieldElement, RecordId, TreeKind, TxRef};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

/// Fate of a submitted transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A root update the mock ledger received
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub tx_ref: TxRef,
    pub target: RootUpdate,
    pub root: FieldElement,
    pub status: TxStatus,
}

#[derive(Default)]
struct LedgerState {
    submissions: Vec<Submission>,
    anchored: HashMap<TreeKind, FieldElement>,
    unavailable: Option<String>,
}

/// A scriptable ledger
///
/// Submissions stay pending until a test confirms or fails them, unless the
/// ledger was built with [`MockLedger::instant`]. Confirming a submission
/// makes its root the anchored root of its tree.
pub struct MockLedger {
    auto_confirm: bool,
    state: Mutex<LedgerState>,
}

impl MockLedger {
    pub fn new() -> Self {
        MockLedger {
            auto_confirm: false,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// A ledger that confirms every submission immediately
    pub fn instant() -> Self {
        MockLedger {
            auto_confirm: true,
            ..Self::new()
        }
    }

    /// Seed the anchored root of a tree
    pub fn with_anchored_root(self, kind: TreeKind, root: FieldElement) -> Self {
        self.state.lock().anchored.insert(kind, root);
        self
    }

    pub fn confirm(&self, tx: &TxRef) -> Result<()> {
        self.settle(tx, TxStatus::Confirmed)
    }

    pub fn fail(&self, tx: &TxRef) -> Result<()> {
        self.settle(tx, TxStatus::Failed)
    }

    /// Confirm every pending submission, oldest first
    pub fn confirm_all(&self) -> usize {
        let mut state = self.state.lock();
        let mut confirmed = 0;
        let LedgerState {
            submissions,
            anchored,
            ..
        } = &mut *state;
        for submission in submissions.iter_mut().filter(|s| s.status == TxStatus::Pending) {
            submission.status = TxStatus::Confirmed;
            anchored.insert(submission.target.kind(), submission.root);
            confirmed += 1;
        }
        confirmed
    }

    /// Make every call fail with [`Error::Unavailable`] until cleared
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.state.lock().unavailable = reason.map(str::to_string);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().submissions.clone()
    }

    pub fn status(&self, tx: &TxRef) -> Option<TxStatus> {
        self.state
            .lock()
            .submissions
            .iter()
            .find(|s| &s.tx_ref == tx)
            .map(|s| s.status)
    }

    pub fn anchored_root(&self, kind: TreeKind) -> Option<FieldElement> {
        self.state.lock().anchored.get(&kind).copied()
    }

    fn settle(&self, tx: &TxRef, status: TxStatus) -> Result<()> {
        let mut state = self.state.lock();
        let LedgerState {
            submissions,
            anchored,
            ..
        } = &mut *state;
        let submission = submissions
            .iter_mut()
            .find(|s| &s.tx_ref == tx)
            .ok_or_else(|| Error::Ledger(format!("unknown transaction {}", tx)))?;
        submission.status = status;
        if status == TxStatus::Confirmed {
            anchored.insert(submission.target.kind(), submission.root);
        }
        Ok(())
    }

    fn check_available(state: &LedgerState) -> Result<()> {
        match &state.unavailable {
            Some(reason) => Err(Error::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn lookup(&self, tx: &TxRef) -> Result<TxStatus> {
        let state = self.state.lock();
        Self::check_available(&state)?;
        match state.submissions.iter().find(|s| &s.tx_ref == tx) {
            Some(submission) => Ok(submission.status),
            // Submitted by an earlier process; an instant ledger confirmed it
            None if self.auto_confirm => Ok(TxStatus::Confirmed),
            None => Err(Error::Ledger(format!("unknown transaction {}", tx))),
        }
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn submit_root_update(
        &self,
        target: RootUpdate,
        new_root: FieldElement,
        proof: &Proof,
    ) -> Result<TxRef> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        if proof.public_signals.first() != Some(&new_root.to_hex()) {
            return Err(Error::Ledger("proof does not commit to the submitted root".into()));
        }

        let nonce = state.submissions.len() as u64 + 1;
        let digest = blake3::Hasher::new()
            .update(new_root.as_bytes())
            .update(&nonce.to_le_bytes())
            .finalize();
        let tx_ref = TxRef::new(format!("0x{}", hex::encode(digest.as_bytes())));

        let status = if self.auto_confirm {
            state.anchored.insert(target.kind(), new_root);
            TxStatus::Confirmed
        } else {
            TxStatus::Pending
        };
        state.submissions.push(Submission {
            tx_ref: tx_ref.clone(),
            target,
            root: new_root,
            status,
        });
        Ok(tx_ref)
    }

    async fn is_failed(&self, tx: &TxRef) -> Result<bool> {
        Ok(self.lookup(tx)? == TxStatus::Failed)
    }

    async fn is_confirmed(&self, tx: &TxRef) -> Result<bool> {
        Ok(self.lookup(tx)? == TxStatus::Confirmed)
    }

    async fn submit_inclusion_check(
        &self,
        kind: TreeKind,
        key: RecordId,
        value: FieldElement,
        proof: &Proof,
    ) -> Result<bool> {
        let state = self.state.lock();
        Self::check_available(&state)?;
        let Some(anchored) = state.anchored.get(&kind) else {
            return Ok(false);
        };
        let expected = [anchored.to_hex(), key.to_string(), value.to_hex()];
        Ok(proof.public_signals == expected)
    }
}

/// Deterministic stand-in for a Groth16 prover
///
/// The first public signal is the root the inputs commit to (`newRoot` for
/// mutations, `root` for inclusion); inclusion proofs add key and value.
pub struct MockProver {
    failure: Mutex<Option<String>>,
    requests: Mutex<Vec<(CircuitId, Value)>>,
}

impl MockProver {
    pub fn new() -> Self {
        MockProver {
            failure: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A prover that rejects every request
    pub fn failing(reason: &str) -> Self {
        let prover = Self::new();
        prover.set_failing(Some(reason));
        prover
    }

    /// Make every request fail with [`Error::Proof`] until cleared
    pub fn set_failing(&self, reason: Option<&str>) {
        *self.failure.lock() = reason.map(str::to_string);
    }

    /// Inputs received so far, in order
    pub fn requests(&self) -> Vec<(CircuitId, Value)> {
        self.requests.lock().clone()
    }
}

impl Default for MockProver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProofSystem for MockProver {
    async fn prove(&self, inputs: &Value, circuit: CircuitId) -> Result<Proof> {
        self.requests.lock().push((circuit, inputs.clone()));
        if let Some(reason) = self.failure.lock().clone() {
            return Err(Error::Proof(reason));
        }

        let root_field = match circuit {
            CircuitId::MerkleInclusion => "root",
            _ => "newRoot",
        };
        let root = inputs
            .get(root_field)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Proof(format!("{} inputs lack {}", circuit, root_field)))?;

        let mut public_signals = vec![root.to_string()];
        if circuit == CircuitId::MerkleInclusion {
            for field in ["key", "value"] {
                match inputs.get(field) {
                    Some(Value::String(s)) => public_signals.push(s.clone()),
                    Some(other) => public_signals.push(other.to_string()),
                    None => return Err(Error::Proof(format!("inclusion inputs lack {}", field))),
                }
            }
        }

        let encoded = serde_json::to_vec(inputs)?;
        let digest = blake3::Hasher::new()
            .update(circuit.as_str().as_bytes())
            .update(&encoded)
            .finalize();
        let word = |i: usize| hex::encode(&digest.as_bytes()[i * 8..(i + 1) * 8]);

        Ok(Proof {
            pi_a: vec![word(0), word(1), "1".into()],
            pi_b: vec![vec![word(2), word(3)], vec![word(1), word(0)], vec!["1".into(), "0".into()]],
            pi_c: vec![word(3), word(2), "1".into()],
            public_signals,
        })
    }
}
