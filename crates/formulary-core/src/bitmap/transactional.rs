use crate::{
    bitmap::{BaseBitmap, Bitmap, SharedBitmap, changes::BitmapChanges},
    formula::Formula,
    transaction::{Transaction, next_transactional_id},
};
use parking_lot::RwLock;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

static STRUCTURE_IDS: AtomicU64 = AtomicU64::new(1);

///
/// TransactionalBitmap
///
/// Shared handle over a published immutable base bitmap.
///
/// Every operation takes the transaction context explicitly:
/// - `None` reads and writes the published base directly. In this mode the
///   structure assumes a single writer; concurrent writers are serialized by
///   the base lock but observe no isolation from each other.
/// - `Some(tx)` reads and writes through the private overlay `tx` holds for
///   this structure, created on first access.
///
/// The *state id* is drawn from the global transactional id sequence and is
/// renewed whenever a new base is published. It identifies the base contents
/// for cache validity checks.
///

#[derive(Clone, Debug)]
pub struct TransactionalBitmap {
    inner: Arc<Structure>,
}

#[derive(Debug)]
struct Structure {
    id: u64,
    published: RwLock<Published>,
}

#[derive(Debug)]
struct Published {
    base: Arc<BaseBitmap>,
    state_id: u64,
    version: u64,
}

impl Published {
    fn renew(&mut self) {
        self.state_id = next_transactional_id();
        self.version += 1;
    }
}

impl TransactionalBitmap {
    #[must_use]
    pub fn new(initial: BaseBitmap) -> Self {
        Self {
            inner: Arc::new(Structure {
                id: STRUCTURE_IDS.fetch_add(1, Ordering::Relaxed),
                published: RwLock::new(Published {
                    base: Arc::new(initial),
                    state_id: next_transactional_id(),
                    version: 0,
                }),
            }),
        }
    }

    #[must_use]
    pub fn from_ids(ids: impl IntoIterator<Item = u32>) -> Self {
        Self::new(ids.into_iter().collect())
    }

    /// Stable structure identity.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// State id of the currently published base.
    #[must_use]
    pub fn state_id(&self) -> u64 {
        self.inner.published.read().state_id
    }

    /// Number of bases published since creation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.published.read().version
    }

    pub(crate) fn published_snapshot(&self) -> (Arc<BaseBitmap>, u64) {
        let published = self.inner.published.read();
        (Arc::clone(&published.base), published.state_id)
    }

    /// Publish `changes` on top of the current base.
    pub(crate) fn publish(&self, changes: &BitmapChanges) {
        let mut published = self.inner.published.write();
        let next = changes.apply_onto(&published.base);
        published.base = Arc::new(next);
        published.renew();
    }

    #[must_use]
    pub fn contains(&self, id: u32, tx: Option<&Transaction>) -> bool {
        match tx {
            Some(tx) => tx.with_overlay(self, |overlay| overlay.changes.contains(id)),
            None => self.inner.published.read().base.contains(id),
        }
    }

    #[must_use]
    pub fn len(&self, tx: Option<&Transaction>) -> usize {
        match tx {
            Some(tx) => tx.with_overlay(self, |overlay| overlay.changes.merged_len()),
            None => self.inner.published.read().base.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self, tx: Option<&Transaction>) -> bool {
        self.len(tx) == 0
    }

    /// Immutable view of the contents visible in the given context.
    #[must_use]
    pub fn snapshot(&self, tx: Option<&Transaction>) -> Arc<BaseBitmap> {
        match tx {
            Some(tx) => tx.with_overlay(self, |overlay| overlay.changes.merged()),
            None => Arc::clone(&self.inner.published.read().base),
        }
    }

    /// Transactional-source id of the contents visible in the given context.
    #[must_use]
    pub fn transactional_id(&self, tx: Option<&Transaction>) -> u64 {
        match tx {
            Some(tx) => tx.with_overlay(self, |overlay| overlay.transactional_id()),
            None => self.state_id(),
        }
    }

    pub fn add(&self, id: u32, tx: Option<&Transaction>) -> bool {
        match tx {
            Some(tx) => tx.with_overlay(self, |overlay| overlay.add(id)),
            None => self.mutate_base(|base| base.insert(id)),
        }
    }

    pub fn remove(&self, id: u32, tx: Option<&Transaction>) -> bool {
        match tx {
            Some(tx) => tx.with_overlay(self, |overlay| overlay.remove(id)),
            None => self.mutate_base(|base| base.delete(id)),
        }
    }

    pub fn add_all(&self, ids: &[u32], tx: Option<&Transaction>) {
        for id in ids {
            self.add(*id, tx);
        }
    }

    pub fn remove_all(&self, ids: &[u32], tx: Option<&Transaction>) {
        for id in ids {
            self.remove(*id, tx);
        }
    }

    /// Constant leaf over the visible contents, tagged with its transactional-source id.
    #[must_use]
    pub fn to_formula(&self, tx: Option<&Transaction>) -> Formula {
        let (bitmap, source_id) = match tx {
            Some(tx) => tx.with_overlay(self, |overlay| {
                (overlay.changes.merged(), overlay.transactional_id())
            }),
            None => self.published_snapshot(),
        };
        let bitmap: SharedBitmap = bitmap;

        Formula::constant_with_source(bitmap, self.id(), source_id)
    }

    // Copy-on-write when snapshots of the base are still referenced.
    fn mutate_base(&self, f: impl FnOnce(&mut BaseBitmap) -> bool) -> bool {
        let mut published = self.inner.published.write();
        let changed = f(Arc::make_mut(&mut published.base));
        if changed {
            published.renew();
        }
        changed
    }
}
