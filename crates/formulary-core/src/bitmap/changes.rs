use crate::bitmap::{BaseBitmap, Bitmap};
use roaring::RoaringBitmap;
use std::{cell::OnceCell, sync::Arc};

///
/// BitmapChanges
///
/// Diff layer over an immutable `original` bitmap.
///
/// Invariants:
/// - an id is never in both `insertions` and `removals`
/// - `insertions` never contains an id of `original`, `removals` only ids of `original`
/// - `merged()` equals `(original ∪ insertions) \ removals` and is memoized until
///   the next effective mutation
///

#[derive(Clone, Debug)]
pub struct BitmapChanges {
    original: Arc<BaseBitmap>,
    insertions: RoaringBitmap,
    removals: RoaringBitmap,
    merged: OnceCell<Arc<BaseBitmap>>,
}

impl BitmapChanges {
    #[must_use]
    pub fn new(original: Arc<BaseBitmap>) -> Self {
        Self {
            original,
            insertions: RoaringBitmap::new(),
            removals: RoaringBitmap::new(),
            merged: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn original(&self) -> &Arc<BaseBitmap> {
        &self.original
    }

    #[must_use]
    pub const fn insertions(&self) -> &RoaringBitmap {
        &self.insertions
    }

    #[must_use]
    pub const fn removals(&self) -> &RoaringBitmap {
        &self.removals
    }

    /// True when the layer differs from `original`.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.insertions.is_empty() || !self.removals.is_empty()
    }

    pub fn add(&mut self, id: u32) -> bool {
        let changed = if self.removals.remove(id) {
            true
        } else if self.original.contains(id) {
            false
        } else {
            self.insertions.insert(id)
        };

        if changed {
            self.merged.take();
        }
        changed
    }

    pub fn remove(&mut self, id: u32) -> bool {
        let changed = if self.insertions.remove(id) {
            true
        } else if self.original.contains(id) {
            self.removals.insert(id)
        } else {
            false
        };

        if changed {
            self.merged.take();
        }
        changed
    }

    /// Membership without materializing the merge.
    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        self.insertions.contains(id) || (self.original.contains(id) && !self.removals.contains(id))
    }

    /// Cardinality of the merged view in O(1).
    #[must_use]
    pub fn merged_len(&self) -> usize {
        let removals = usize::try_from(self.removals.len()).unwrap_or(usize::MAX);
        let insertions = usize::try_from(self.insertions.len()).unwrap_or(usize::MAX);

        self.original.len() - removals + insertions
    }

    /// `(original ∪ insertions) \ removals`, memoized.
    #[must_use]
    pub fn merged(&self) -> Arc<BaseBitmap> {
        if !self.is_dirty() {
            return Arc::clone(&self.original);
        }

        Arc::clone(self.merged.get_or_init(|| {
            let mut merged = self.original.to_roaring();
            merged |= &self.insertions;
            merged -= &self.removals;
            Arc::new(BaseBitmap::from_roaring(merged))
        }))
    }

    /// Apply this diff onto `base`, which may be newer than `original`.
    #[must_use]
    pub fn apply_onto(&self, base: &BaseBitmap) -> BaseBitmap {
        let mut next = base.clone();
        next.union_with(&self.insertions);
        next.subtract(&self.removals);
        next
    }
}
