//! Request-path operations
//!
//! Every business write runs in one store transaction that stores the
//! record, mutates its tree, proves the mutation, submits the new root to
//! the ledger and appends the anchor queue entry. If any step fails the
//! transaction is dropped and nothing is kept.

use crate::config::AnchorConfig;
use crate::hasher::{Blake3FieldHash, FieldHash};
use crate::ledger::{CircuitId, LedgerClient, ProofSystem, RootUpdate};
use crate::model::{
    AnchorEntry, Doctor, EntryId, FieldElement, NewDoctor, NewPrescription, Prescription,
    QueueAction, RecordId, TreeKind, TreeRecord, TxRef,
};
use crate::store::{State, Store, StoredRecord, Transaction};
use crate::tree::{DoctorTree, InclusionProof, PrescriptionTree, SparseMerkleTree};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 256;

/// Outcome of an anchor entry, published to subscribers
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnchorEvent {
    /// The ledger confirmed the entry; the record is final
    Confirmed {
        kind: TreeKind,
        record_id: RecordId,
        action: QueueAction,
        tx_ref: TxRef,
    },
    /// The ledger rejected the entry; it and every later entry were unwound
    Reverted {
        kind: TreeKind,
        record_id: RecordId,
        entry_id: EntryId,
        tx_ref: TxRef,
        undone: usize,
    },
    /// An unwound entry was redone and resubmitted
    Regenerated {
        kind: TreeKind,
        record_id: RecordId,
        action: QueueAction,
        tx_ref: TxRef,
    },
}

/// Writes records and anchors the resulting tree roots
pub struct AnchorService<H: FieldHash = Blake3FieldHash> {
    store: Arc<Store>,
    ledger: Arc<dyn LedgerClient>,
    prover: Arc<dyn ProofSystem>,
    hasher: H,
    config: AnchorConfig,
    events: broadcast::Sender<AnchorEvent>,
}

impl AnchorService<Blake3FieldHash> {
    pub fn new(
        store: Arc<Store>,
        ledger: Arc<dyn LedgerClient>,
        prover: Arc<dyn ProofSystem>,
        config: AnchorConfig,
    ) -> Result<Self> {
        Self::with_hasher(store, ledger, prover, config, Blake3FieldHash)
    }
}

impl<H: FieldHash> AnchorService<H> {
    pub fn with_hasher(
        store: Arc<Store>,
        ledger: Arc<dyn LedgerClient>,
        prover: Arc<dyn ProofSystem>,
        config: AnchorConfig,
        hasher: H,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(AnchorService {
            store,
            ledger,
            prover,
            hasher,
            config,
            events,
        })
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnchorEvent> {
        self.events.subscribe()
    }

    /// Tree engine for a record kind
    pub fn tree<R: TreeRecord>(&self) -> Result<SparseMerkleTree<R, H>> {
        SparseMerkleTree::new(self.hasher.clone(), self.config.key_length)
    }

    // === Writes ===

    pub async fn create_doctor(&self, new: NewDoctor) -> Result<Doctor> {
        let mut tx = self.store.begin().await;
        let doctor = new.with_id(tx.table_mut::<Doctor>().allocate_id());
        tx.table_mut::<Doctor>().insert_record(doctor.clone())?;

        if self.config.anchoring_enabled {
            self.anchor_create(&mut tx, &doctor).await?;
        }
        tx.commit()?;

        info!(record_id = doctor.id, license = doctor.license, "created doctor");
        Ok(doctor)
    }

    /// Issue a prescription; the issuing doctor must be anchored and confirmed
    pub async fn create_prescription(&self, new: NewPrescription) -> Result<Prescription> {
        let mut tx = self.store.begin().await;
        let doctors = tx.table::<Doctor>();
        doctors.record(new.doctor_id)?;
        if doctors.queue().references(new.doctor_id) {
            return Err(Error::Busy(format!("doctor {} has a pending anchor", new.doctor_id)));
        }
        if self.config.anchoring_enabled && doctors.nodes().is_empty() {
            return Err(Error::NotFound("doctor tree is empty".into()));
        }

        let prescription = new.with_id(tx.table_mut::<Prescription>().allocate_id());
        tx.table_mut::<Prescription>()
            .insert_record(prescription.clone())?;

        if self.config.anchoring_enabled {
            self.anchor_create(&mut tx, &prescription).await?;
        }
        tx.commit()?;

        info!(
            record_id = prescription.id,
            doctor_id = prescription.doctor_id,
            "created prescription"
        );
        Ok(prescription)
    }

    /// Record a dispensation; rejected while the prescription is still being anchored
    pub async fn mark_prescription_used(&self, id: RecordId, pharmacist_id: u64) -> Result<Prescription> {
        let mut tx = self.store.begin().await;
        let table = tx.table::<Prescription>();
        let mut prescription = table.record(id)?.clone();
        if table.queue().references(id) {
            return Err(Error::Busy(format!("prescription {} has a pending anchor", id)));
        }
        if prescription.used {
            return Err(Error::AlreadyExists(format!("prescription {} already used", id)));
        }

        prescription.dispense(pharmacist_id);
        if self.config.anchoring_enabled {
            self.anchor_update(&mut tx, &prescription).await?;
        } else {
            tx.table_mut::<Prescription>()
                .put_record(prescription.clone());
        }
        tx.commit()?;

        info!(record_id = id, pharmacist_id, "prescription used");
        Ok(prescription)
    }

    /// Check a prescription against the anchored prescriptions root
    pub async fn verify_prescription(&self, id: RecordId) -> Result<bool> {
        let proof = self.store.read(|state| -> Result<Option<InclusionProof>> {
            let table = state.table::<Prescription>();
            table.record(id)?;
            if table.queue().references(id) {
                return Err(Error::Busy(format!("prescription {} has a pending anchor", id)));
            }
            if !self.config.anchoring_enabled {
                return Ok(None);
            }
            self.tree::<Prescription>()?
                .inclusion_proof(table, id)
                .map(Some)
        })?;

        let Some(proof) = proof else {
            debug!(record_id = id, "anchoring disabled, skipping ledger check");
            return Ok(true);
        };

        let inputs = serde_json::to_value(&proof)?;
        let zk = self.prover.prove(&inputs, CircuitId::MerkleInclusion).await?;
        let valid = self
            .ledger
            .submit_inclusion_check(TreeKind::Prescriptions, id, proof.value, &zk)
            .await?;

        info!(record_id = id, valid, "verified prescription");
        Ok(valid)
    }

    // === Reads ===

    pub fn doctor(&self, id: RecordId) -> Result<Doctor> {
        self.store.read(|state| state.doctors.record(id).cloned())
    }

    pub fn prescription(&self, id: RecordId) -> Result<Prescription> {
        self.store.read(|state| state.prescriptions.record(id).cloned())
    }

    /// Whether the record has no pending anchor entry
    pub fn is_active(&self, kind: TreeKind, id: RecordId) -> Result<bool> {
        self.store.read(|state| {
            if !state.contains(kind, id) {
                return Err(Error::NotFound(format!("{} record {}", kind, id)));
            }
            Ok(!state.queue(kind).references(id))
        })
    }

    pub fn root(&self, kind: TreeKind) -> FieldElement {
        self.store.read(|state| state.root(kind))
    }

    pub fn siblings(&self, kind: TreeKind, key: RecordId) -> Result<Vec<FieldElement>> {
        self.store.read(|state| match kind {
            TreeKind::Doctors => {
                let tree: DoctorTree<H> = self.tree()?;
                tree.siblings(&state.doctors, key)
            }
            TreeKind::Prescriptions => {
                let tree: PrescriptionTree<H> = self.tree()?;
                tree.siblings(&state.prescriptions, key)
            }
        })
    }

    pub fn inclusion_proof(&self, kind: TreeKind, key: RecordId) -> Result<InclusionProof> {
        self.store.read(|state| match kind {
            TreeKind::Doctors => {
                let tree: DoctorTree<H> = self.tree()?;
                tree.inclusion_proof(&state.doctors, key)
            }
            TreeKind::Prescriptions => {
                let tree: PrescriptionTree<H> = self.tree()?;
                tree.inclusion_proof(&state.prescriptions, key)
            }
        })
    }

    /// Pending entries, oldest first
    pub fn queue(&self, kind: TreeKind) -> Vec<AnchorEntry> {
        self.store
            .read(|state| state.queue(kind).iter().cloned().collect())
    }

    // === Anchoring ===

    /// Insert the record into its tree and submit the new root
    pub(crate) async fn anchor_create<R: StoredRecord>(
        &self,
        tx: &mut Transaction<'_>,
        record: &R,
    ) -> Result<AnchorEntry> {
        let tree = self.tree::<R>()?;
        let proof = tree.insert(tx.table_mut::<R>(), record)?;

        let mut inputs = serde_json::to_value(&proof)?;
        if let Some(issuer) = record.issuer() {
            let membership = self.issuer_membership(tx.state(), issuer)?;
            merge_issuer(&mut inputs, &membership)?;
        }

        let tx_ref = self
            .submit(
                CircuitId::creation(R::KIND),
                RootUpdate::creation(R::KIND),
                proof.new_root,
                &inputs,
            )
            .await?;
        let entry = tx
            .table_mut::<R>()
            .queue_mut()
            .push(record.id(), tx_ref, QueueAction::Create);

        debug!(tree = %R::KIND, record_id = record.id(), entry_id = entry.id, "queued create");
        Ok(entry)
    }

    /// Re-hash the record's leaf with its new value and submit the new root
    ///
    /// `record` carries the new value; the table still holds the old one and
    /// is updated here.
    pub(crate) async fn anchor_update<R: StoredRecord>(
        &self,
        tx: &mut Transaction<'_>,
        record: &R,
    ) -> Result<AnchorEntry> {
        let circuit = CircuitId::update(R::KIND)?;
        let target = RootUpdate::update(R::KIND)?;

        let tree = self.tree::<R>()?;
        let proof = tree.update(tx.table_mut::<R>(), record)?;
        tx.table_mut::<R>().put_record(record.clone());

        let inputs = serde_json::to_value(&proof)?;
        let tx_ref = self.submit(circuit, target, proof.new_root, &inputs).await?;
        let entry = tx
            .table_mut::<R>()
            .queue_mut()
            .push(record.id(), tx_ref, QueueAction::Update);

        debug!(tree = %R::KIND, record_id = record.id(), entry_id = entry.id, "queued update");
        Ok(entry)
    }

    pub(crate) fn ledger(&self) -> &dyn LedgerClient {
        self.ledger.as_ref()
    }

    pub(crate) fn emit(&self, event: AnchorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn submit(
        &self,
        circuit: CircuitId,
        target: RootUpdate,
        new_root: FieldElement,
        inputs: &Value,
    ) -> Result<TxRef> {
        let proof = self.prover.prove(inputs, circuit).await?;
        self.ledger.submit_root_update(target, new_root, &proof).await
    }

    fn issuer_membership(&self, state: &State, issuer: RecordId) -> Result<InclusionProof> {
        let tree: DoctorTree<H> = self.tree()?;
        tree.inclusion_proof(&state.doctors, issuer)
    }
}

/// Embed the issuing doctor's membership as extra circuit inputs
fn merge_issuer(inputs: &mut Value, membership: &InclusionProof) -> Result<()> {
    let Value::Object(map) = inputs else {
        return Err(Error::Proof("circuit inputs must be a JSON object".into()));
    };
    map.insert("doctorRoot".into(), serde_json::to_value(membership.root)?);
    map.insert("doctorSiblings".into(), serde_json::to_value(&membership.siblings)?);
    map.insert("doctorKey".into(), Value::from(membership.key));
    map.insert("doctorValue".into(), serde_json::to_value(membership.value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MockLedger, MockProver};

    fn config() -> AnchorConfig {
        AnchorConfig {
            key_length: 4,
            ..AnchorConfig::default()
        }
    }

    fn service_with(config: AnchorConfig) -> (AnchorService, Arc<MockLedger>, Arc<MockProver>) {
        let ledger = Arc::new(MockLedger::new());
        let prover = Arc::new(MockProver::new());
        let service = AnchorService::new(
            Arc::new(Store::in_memory()),
            ledger.clone(),
            prover.clone(),
            config,
        )
        .unwrap();
        (service, ledger, prover)
    }

    fn new_doctor() -> NewDoctor {
        NewDoctor {
            license: 1234,
            user_id: 7,
        }
    }

    fn new_prescription(doctor_id: RecordId) -> NewPrescription {
        NewPrescription {
            doctor_id,
            presentation_id: 3,
            patient_id: 11,
            quantity: 2,
            emitted_at: Some(1_700_000_000_000),
        }
    }

    /// Drop every pending entry of a tree, as if the ledger confirmed them
    async fn drain<R: StoredRecord>(service: &AnchorService) {
        let mut tx = service.store().begin().await;
        let ids: Vec<_> = tx.table::<R>().queue().iter().map(|e| e.id).collect();
        for id in ids {
            tx.table_mut::<R>().queue_mut().remove(id).unwrap();
        }
        tx.commit().unwrap();
    }

    #[tokio::test]
    async fn test_create_doctor_queues_entry() {
        let (service, ledger, _) = service_with(config());
        let doctor = service.create_doctor(new_doctor()).await.unwrap();

        assert_eq!(doctor.id, 1);
        assert_ne!(service.root(TreeKind::Doctors), FieldElement::ZERO);
        assert!(!service.is_active(TreeKind::Doctors, 1).unwrap());

        let queue = service.queue(TreeKind::Doctors);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].action, QueueAction::Create);
        assert_eq!(ledger.submissions()[0].root, service.root(TreeKind::Doctors));
    }

    #[tokio::test]
    async fn test_prescription_embeds_doctor_membership() {
        let (service, _, prover) = service_with(config());
        let doctor = service.create_doctor(new_doctor()).await.unwrap();
        drain::<Doctor>(&service).await;
        service
            .create_prescription(new_prescription(doctor.id))
            .await
            .unwrap();

        let (circuit, inputs) = prover.requests().pop().unwrap();
        assert_eq!(circuit, CircuitId::PrescriptionCreation);
        assert_eq!(inputs["doctorKey"], doctor.id);
        assert_eq!(inputs["doctorRoot"], service.root(TreeKind::Doctors).to_hex());
        assert_eq!(inputs["doctorSiblings"].as_array().unwrap().len(), 4);
        assert_eq!(inputs["fnc"], serde_json::json!([1, 0]));
    }

    #[tokio::test]
    async fn test_prescription_requires_doctor() {
        let (service, _, _) = service_with(config());
        let result = service.create_prescription(new_prescription(1)).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(service.queue(TreeKind::Prescriptions).is_empty());
    }

    #[tokio::test]
    async fn test_prescription_rejected_while_doctor_pending() {
        let (service, _, _) = service_with(config());
        let doctor = service.create_doctor(new_doctor()).await.unwrap();

        let result = service.create_prescription(new_prescription(doctor.id)).await;
        assert!(matches!(result, Err(Error::Busy(_))));
        assert!(service.queue(TreeKind::Prescriptions).is_empty());
        assert!(matches!(service.prescription(1), Err(Error::NotFound(_))));

        drain::<Doctor>(&service).await;
        let prescription = service
            .create_prescription(new_prescription(doctor.id))
            .await
            .unwrap();
        assert_eq!(prescription.id, 1);
    }

    #[tokio::test]
    async fn test_use_rejected_while_pending() {
        let (service, _, _) = service_with(config());
        let doctor = service.create_doctor(new_doctor()).await.unwrap();
        drain::<Doctor>(&service).await;
        let prescription = service
            .create_prescription(new_prescription(doctor.id))
            .await
            .unwrap();

        let result = service.mark_prescription_used(prescription.id, 9).await;
        assert!(matches!(result, Err(Error::Busy(_))));
        let result = service.verify_prescription(prescription.id).await;
        assert!(matches!(result, Err(Error::Busy(_))));

        // Once the queue is drained the update goes through
        drain::<Prescription>(&service).await;

        let used = service.mark_prescription_used(prescription.id, 9).await.unwrap();
        assert!(used.used);
        assert_eq!(used.pharmacist_id, Some(9));
        let queue = service.queue(TreeKind::Prescriptions);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].action, QueueAction::Update);
    }

    #[tokio::test]
    async fn test_failed_submission_rolls_back() {
        let (service, ledger, _) = service_with(config());
        ledger.set_unavailable(Some("rpc down"));

        let result = service.create_doctor(new_doctor()).await;
        assert!(matches!(result, Err(Error::Unavailable(_))));
        assert_eq!(service.root(TreeKind::Doctors), FieldElement::ZERO);
        assert!(matches!(service.doctor(1), Err(Error::NotFound(_))));

        ledger.set_unavailable(None);
        let doctor = service.create_doctor(new_doctor()).await.unwrap();
        assert_eq!(doctor.id, 1);
    }

    #[tokio::test]
    async fn test_key_space_exhaustion() {
        let (service, _, _) = service_with(AnchorConfig {
            key_length: 2,
            ..AnchorConfig::default()
        });
        for _ in 0..3 {
            service.create_doctor(new_doctor()).await.unwrap();
        }
        let result = service.create_doctor(new_doctor()).await;
        assert!(matches!(result, Err(Error::InvalidKey { key: 4, .. })));
    }

    #[tokio::test]
    async fn test_disabled_anchoring_only_stores_records() {
        let (service, ledger, _) = service_with(AnchorConfig {
            anchoring_enabled: false,
            ..config()
        });
        let doctor = service.create_doctor(new_doctor()).await.unwrap();
        let prescription = service
            .create_prescription(new_prescription(doctor.id))
            .await
            .unwrap();
        service
            .mark_prescription_used(prescription.id, 2)
            .await
            .unwrap();

        assert!(ledger.submissions().is_empty());
        assert_eq!(service.root(TreeKind::Prescriptions), FieldElement::ZERO);
        assert!(service.prescription(prescription.id).unwrap().used);
        assert!(service.verify_prescription(prescription.id).await.unwrap());
    }
}
