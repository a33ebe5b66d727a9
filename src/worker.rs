//! Reconciliation of the anchor queues against the ledger
//!
//! Each tick walks the doctor queue, then the prescription queue:
//! 1. Regeneration pass: redo and resubmit entries unwound by a revert;
//!    an entry whose redo is rejected for good is dropped
//! 2. Confirmation pass: in queue order, drop confirmed entries; stop at the
//!    first entry that is pending or awaiting resubmission; on a failed entry
//!    unwind it and everything queued after it
//!
//! An entry is never finalized while an older one of the same tree is
//! unconfirmed, so the locally committed history only ever advances along
//! roots the ledger accepted.

use crate::hasher::{Blake3FieldHash, FieldHash};
use crate::model::{AnchorEntry, Doctor, Prescription, QueueAction};
use crate::service::{AnchorEvent, AnchorService};
use crate::store::StoredRecord;
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What one tick did
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub confirmed: usize,
    pub reverted: usize,
    pub regenerated: usize,
    /// Regeneration entries given up on: record gone or redo rejected
    pub dropped: usize,
    /// Another run was in progress; nothing was done
    pub skipped: bool,
}

pub struct ReconciliationWorker<H: FieldHash = Blake3FieldHash> {
    service: Arc<AnchorService<H>>,
    running: Mutex<()>,
}

impl<H: FieldHash> ReconciliationWorker<H> {
    pub fn new(service: Arc<AnchorService<H>>) -> Self {
        ReconciliationWorker {
            service,
            running: Mutex::new(()),
        }
    }

    /// Run one reconciliation tick
    ///
    /// Returns immediately with `skipped` set if another tick is running.
    /// A transient ledger error aborts the tick; entries handled before it
    /// stay handled.
    pub async fn run_once(&self) -> Result<TickReport> {
        let Ok(_running) = self.running.try_lock() else {
            info!("reconciliation already running, skipping tick");
            return Ok(TickReport {
                skipped: true,
                ..TickReport::default()
            });
        };

        let mut report = TickReport::default();
        if !self.service.config().anchoring_enabled {
            debug!("anchoring disabled, nothing to reconcile");
            return Ok(report);
        }

        self.reconcile::<Doctor>(&mut report).await?;
        self.reconcile::<Prescription>(&mut report).await?;

        if report != TickReport::default() {
            info!(
                confirmed = report.confirmed,
                reverted = report.reverted,
                regenerated = report.regenerated,
                dropped = report.dropped,
                "reconciliation tick"
            );
        }
        Ok(report)
    }

    /// Drive `run_once` every `interval` until the handle is shut down
    pub fn spawn(self: Arc<Self>, interval: Duration) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => match self.run_once().await {
                        Ok(_) => {}
                        Err(e) if e.is_transient() => {
                            warn!(error = %e, "ledger unavailable, retrying next tick");
                        }
                        Err(e) => error!(error = %e, "reconciliation tick failed"),
                    },
                }
            }
            info!("reconciliation worker stopped");
        });
        WorkerHandle { shutdown_tx, task }
    }

    async fn reconcile<R: StoredRecord>(&self, report: &mut TickReport) -> Result<()> {
        self.regenerate::<R>(report).await?;
        self.confirm::<R>(report).await
    }

    async fn regenerate<R: StoredRecord>(&self, report: &mut TickReport) -> Result<()> {
        let store = self.service.store();
        let batch_size = self.service.config().batch_size;
        let batch = store.read(|state| state.table::<R>().queue().regenerations(batch_size));

        for stale in batch {
            let mut tx = store.begin().await;
            tx.table_mut::<R>().queue_mut().remove(stale.id)?;

            let Some(mut record) = tx.table::<R>().get(stale.record_id).cloned() else {
                warn!(
                    tree = %R::KIND,
                    entry_id = stale.id,
                    record_id = stale.record_id,
                    "record to regenerate is gone, dropping entry"
                );
                tx.commit()?;
                report.dropped += 1;
                continue;
            };

            let redone = match stale.action {
                QueueAction::Create => self.service.anchor_create(&mut tx, &record).await,
                QueueAction::Update => match record.set_updated(true) {
                    Ok(()) => self.service.anchor_update(&mut tx, &record).await,
                    Err(e) => Err(e),
                },
            };
            let entry = match redone {
                Ok(entry) => entry,
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    drop(tx);
                    self.abandon::<R>(&stale, &e).await?;
                    report.dropped += 1;
                    continue;
                }
            };
            tx.commit()?;

            report.regenerated += 1;
            info!(
                tree = %R::KIND,
                record_id = entry.record_id,
                old_entry = stale.id,
                entry_id = entry.id,
                action = %entry.action,
                "regenerated anchor"
            );
            if let Some(tx_ref) = entry.tx_ref {
                self.service.emit(AnchorEvent::Regenerated {
                    kind: R::KIND,
                    record_id: entry.record_id,
                    action: entry.action,
                    tx_ref,
                });
            }
        }
        Ok(())
    }

    /// Give up on a regeneration entry that cannot be redone
    ///
    /// The tree already reflects the entry's undone state. A CREATE that
    /// never made it back into the tree loses its record; an UPDATE leaves
    /// the record as the revert restored it.
    async fn abandon<R: StoredRecord>(&self, stale: &AnchorEntry, cause: &Error) -> Result<()> {
        let mut tx = self.service.store().begin().await;
        let table = tx.table_mut::<R>();
        table.queue_mut().remove(stale.id)?;
        if stale.action == QueueAction::Create {
            table.remove_record(stale.record_id)?;
        }
        tx.commit()?;

        error!(
            tree = %R::KIND,
            record_id = stale.record_id,
            entry_id = stale.id,
            action = %stale.action,
            error = %cause,
            "regeneration failed, dropping entry"
        );
        Ok(())
    }

    async fn confirm<R: StoredRecord>(&self, report: &mut TickReport) -> Result<()> {
        let store = self.service.store();
        let ledger = self.service.ledger();
        let batch_size = self.service.config().batch_size;
        let batch = store.read(|state| state.table::<R>().queue().pending(batch_size));

        for entry in batch {
            let Some(tx_ref) = entry.tx_ref.clone() else {
                // Awaiting resubmission; nothing behind it can be final
                break;
            };

            if ledger.is_failed(&tx_ref).await? {
                self.revert::<R>(&entry).await?;
                report.reverted += 1;
                break;
            }
            if !ledger.is_confirmed(&tx_ref).await? {
                break;
            }

            let mut tx = store.begin().await;
            tx.table_mut::<R>().queue_mut().remove(entry.id)?;
            tx.commit()?;

            report.confirmed += 1;
            info!(
                tree = %R::KIND,
                record_id = entry.record_id,
                entry_id = entry.id,
                tx_ref = %tx_ref,
                "anchor confirmed"
            );
            self.service.emit(AnchorEvent::Confirmed {
                kind: R::KIND,
                record_id: entry.record_id,
                action: entry.action,
                tx_ref,
            });
        }
        Ok(())
    }

    /// Unwind a failed entry and every entry applied after it
    ///
    /// Effects are undone newest first so the tree returns to the root it
    /// had before `failing` was applied. A failed CREATE loses its record;
    /// later entries become regeneration tasks.
    async fn revert<R: StoredRecord>(&self, failing: &AnchorEntry) -> Result<usize> {
        let tree = self.service.tree::<R>()?;
        let mut tx = self.service.store().begin().await;
        let table = tx.table_mut::<R>();

        let affected = table.queue().applied_from(failing.id);
        for entry in affected.iter().rev() {
            match entry.action {
                QueueAction::Create => {
                    tree.remove(table, entry.record_id)?;
                }
                QueueAction::Update => {
                    let mut record = table.record(entry.record_id)?.clone();
                    record.set_updated(false)?;
                    tree.update(table, &record)?;
                    table.put_record(record);
                }
            }
        }

        table.queue_mut().remove(failing.id)?;
        if failing.action == QueueAction::Create {
            table.remove_record(failing.record_id)?;
        }
        let marked = table.queue_mut().mark_regeneration_after(failing.id);
        let root = tree.root_hash(&*table)?;
        tx.commit()?;

        warn!(
            tree = %R::KIND,
            record_id = failing.record_id,
            entry_id = failing.id,
            undone = affected.len(),
            marked,
            root = %root.short(),
            "anchor failed, reverted"
        );
        if let Some(tx_ref) = failing.tx_ref.clone() {
            self.service.emit(AnchorEvent::Reverted {
                kind: R::KIND,
                record_id: failing.record_id,
                entry_id: failing.id,
                tx_ref,
                undone: affected.len(),
            });
        }
        Ok(affected.len())
    }
}

/// Handle to a spawned worker loop
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop the loop after the current tick and wait for it
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "reconciliation task panicked");
        }
    }
}
