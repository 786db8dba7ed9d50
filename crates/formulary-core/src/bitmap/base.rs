use crate::bitmap::{Bitmap, BitmapError, MutableBitmap};
use roaring::RoaringBitmap;
use std::sync::OnceLock;

///
/// BaseBitmap
///
/// General mutable bitmap backed by a compressed roaring bitmap.
/// Cardinality is memoized and invalidated by every effective mutation.
///

#[derive(Clone, Debug, Default)]
pub struct BaseBitmap {
    roaring: RoaringBitmap,
    cardinality: OnceLock<usize>,
}

impl BaseBitmap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_roaring(roaring: RoaringBitmap) -> Self {
        Self {
            roaring,
            cardinality: OnceLock::new(),
        }
    }

    /// Borrow the backing roaring bitmap.
    #[must_use]
    pub const fn as_roaring(&self) -> &RoaringBitmap {
        &self.roaring
    }

    /// Infallible insertion; `MutableBitmap::add` delegates here.
    pub fn insert(&mut self, id: u32) -> bool {
        let changed = self.roaring.insert(id);
        if changed {
            self.cardinality.take();
        }
        changed
    }

    /// Infallible removal; `MutableBitmap::remove` delegates here.
    pub fn delete(&mut self, id: u32) -> bool {
        let changed = self.roaring.remove(id);
        if changed {
            self.cardinality.take();
        }
        changed
    }

    /// In-place union with `other`.
    pub fn union_with(&mut self, other: &RoaringBitmap) {
        self.roaring |= other;
        self.cardinality.take();
    }

    /// In-place difference with `other`.
    pub fn subtract(&mut self, other: &RoaringBitmap) {
        self.roaring -= other;
        self.cardinality.take();
    }
}

impl<const N: usize> From<[u32; N]> for BaseBitmap {
    fn from(ids: [u32; N]) -> Self {
        ids.into_iter().collect()
    }
}

impl FromIterator<u32> for BaseBitmap {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self::from_roaring(iter.into_iter().collect())
    }
}

impl PartialEq for BaseBitmap {
    fn eq(&self, other: &Self) -> bool {
        self.roaring == other.roaring
    }
}

impl Eq for BaseBitmap {}

impl Bitmap for BaseBitmap {
    fn contains(&self, id: u32) -> bool {
        self.roaring.contains(id)
    }

    fn index_of(&self, id: u32) -> Option<usize> {
        if !self.roaring.contains(id) {
            return None;
        }

        // `rank` counts values <= id, the id included.
        usize::try_from(self.roaring.rank(id) - 1).ok()
    }

    fn get(&self, index: usize) -> Result<u32, BitmapError> {
        u32::try_from(index)
            .ok()
            .and_then(|n| self.roaring.select(n))
            .ok_or_else(|| BitmapError::IndexOutOfRange {
                index,
                len: self.len(),
            })
    }

    fn first(&self) -> Option<u32> {
        self.roaring.min()
    }

    fn last(&self) -> Option<u32> {
        self.roaring.max()
    }

    fn len(&self) -> usize {
        *self
            .cardinality
            .get_or_init(|| usize::try_from(self.roaring.len()).unwrap_or(usize::MAX))
    }

    fn iter(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        Box::new(self.roaring.iter())
    }

    fn to_roaring(&self) -> RoaringBitmap {
        self.roaring.clone()
    }
}

impl MutableBitmap for BaseBitmap {
    fn add(&mut self, id: u32) -> Result<bool, BitmapError> {
        Ok(self.insert(id))
    }

    fn remove(&mut self, id: u32) -> Result<bool, BitmapError> {
        Ok(self.delete(id))
    }
}
