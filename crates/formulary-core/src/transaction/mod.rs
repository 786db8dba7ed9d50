//! Explicit transaction context.
//!
//! A [`Transaction`] owns the map from structure id to its private overlay for
//! the lifetime of one transaction. Overlays are created lazily on first access
//! and are invisible to every other transaction until `commit` publishes them.


use crate::{
    bitmap::{changes::BitmapChanges, transactional::TransactionalBitmap},
    obs::sink::{self, MetricsEvent, TransactionOutcome},
};
use parking_lot::Mutex;
use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};
use thiserror::Error as ThisError;
use tracing::debug;

/// Serializes publication of overlays across all transactions.
static COMMIT_LOCK: Mutex<()> = parking_lot::const_mutex(());

static TRANSACTION_IDS: AtomicU64 = AtomicU64::new(1);
static TRANSACTIONAL_IDS: AtomicU64 = AtomicU64::new(1);

/// Draw the next value of the global transactional-source id sequence.
pub(crate) fn next_transactional_id() -> u64 {
    TRANSACTIONAL_IDS.fetch_add(1, Ordering::Relaxed)
}

///
/// TransactionError
///

#[derive(Debug, ThisError)]
pub enum TransactionError {
    #[error("transaction {id} is marked rollback-only and was aborted")]
    RollbackOnly { id: u64 },
}

///
/// CommitReport
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CommitReport {
    pub transaction_id: u64,
    pub structures: u64,
    pub insertions: u64,
    pub removals: u64,
}

///
/// Overlay
///
/// Private view of one structure inside one transaction.
///

#[derive(Debug)]
pub(crate) struct Overlay {
    pub(crate) target: TransactionalBitmap,
    pub(crate) changes: BitmapChanges,
    pub(crate) snapshot_state_id: u64,
    pub(crate) layer_id: u64,
}

impl Overlay {
    fn open(target: &TransactionalBitmap) -> Self {
        let (base, state_id) = target.published_snapshot();

        Self {
            target: target.clone(),
            changes: BitmapChanges::new(base),
            snapshot_state_id: state_id,
            layer_id: state_id,
        }
    }

    /// Transactional-source id of this view: the snapshot's state id while the
    /// layer is clean, a private id once it carries uncommitted changes.
    pub(crate) fn transactional_id(&self) -> u64 {
        if self.changes.is_dirty() {
            self.layer_id
        } else {
            self.snapshot_state_id
        }
    }

    pub(crate) fn add(&mut self, id: u32) -> bool {
        let changed = self.changes.add(id);
        if changed {
            self.layer_id = next_transactional_id();
        }
        changed
    }

    pub(crate) fn remove(&mut self, id: u32) -> bool {
        let changed = self.changes.remove(id);
        if changed {
            self.layer_id = next_transactional_id();
        }
        changed
    }
}

///
/// Transaction
///
/// Active until `commit` or `abort` consumes it; dropping an active
/// transaction aborts it. A transaction is used from one thread at a time.
///

#[derive(Debug)]
pub struct Transaction {
    id: u64,
    overlays: RefCell<BTreeMap<u64, Overlay>>,
    rollback_only: Cell<bool>,
    finished: bool,
}

impl Transaction {
    #[must_use]
    pub fn begin() -> Self {
        let id = TRANSACTION_IDS.fetch_add(1, Ordering::Relaxed);
        debug!(tx = id, "transaction begin");

        Self {
            id,
            overlays: RefCell::new(BTreeMap::new()),
            rollback_only: Cell::new(false),
            finished: false,
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Force the transaction to abort on commit.
    pub fn set_rollback_only(&self) {
        self.rollback_only.set(true);
    }

    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.get()
    }

    /// Number of structures accessed so far.
    #[must_use]
    pub fn touched_structures(&self) -> usize {
        self.overlays.borrow().len()
    }

    /// Run `f` against the overlay of `target`, opening it on first access.
    pub(crate) fn with_overlay<R>(
        &self,
        target: &TransactionalBitmap,
        f: impl FnOnce(&mut Overlay) -> R,
    ) -> R {
        let mut overlays = self.overlays.borrow_mut();
        let overlay = overlays
            .entry(target.id())
            .or_insert_with(|| Overlay::open(target));

        f(overlay)
    }

    /// Publish every dirty overlay as a new immutable base of its structure.
    pub fn commit(mut self) -> Result<CommitReport, TransactionError> {
        let overlays = std::mem::take(self.overlays.get_mut());
        self.finished = true;

        if self.rollback_only.get() {
            Self::record_abort(self.id, overlays.len());
            return Err(TransactionError::RollbackOnly { id: self.id });
        }

        let mut report = CommitReport {
            transaction_id: self.id,
            ..CommitReport::default()
        };

        {
            let _commit = COMMIT_LOCK.lock();
            for overlay in overlays.values().filter(|o| o.changes.is_dirty()) {
                overlay.target.publish(&overlay.changes);

                report.structures += 1;
                report.insertions += overlay.changes.insertions().len();
                report.removals += overlay.changes.removals().len();
            }
        }

        debug!(
            tx = self.id,
            structures = report.structures,
            insertions = report.insertions,
            removals = report.removals,
            "transaction committed"
        );
        sink::record(MetricsEvent::TransactionFinished {
            outcome: TransactionOutcome::Committed,
            structures: report.structures,
            insertions: report.insertions,
            removals: report.removals,
        });

        Ok(report)
    }

    /// Discard every overlay; published bases are untouched.
    pub fn abort(mut self) {
        let overlays = std::mem::take(self.overlays.get_mut());
        self.finished = true;

        Self::record_abort(self.id, overlays.len());
    }

    fn record_abort(id: u64, structures: usize) {
        debug!(tx = id, structures, "transaction aborted");
        sink::record(MetricsEvent::TransactionFinished {
            outcome: TransactionOutcome::Aborted,
            structures: u64::try_from(structures).unwrap_or(u64::MAX),
            insertions: 0,
            removals: 0,
        });
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            let structures = std::mem::take(self.overlays.get_mut()).len();
            self.finished = true;

            Self::record_abort(self.id, structures);
        }
    }
}
