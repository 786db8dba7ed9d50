//! Ordered sets of record ids.
//!
//! Every bitmap iterates in ascending order; positional access (`get`,
//! `index_of`, `range`) is consistent with that order.

mod array;
mod base;
pub mod changes;
mod empty;
pub mod transactional;

#[cfg(test)]
mod tests;

pub use array::ArrayBitmap;
pub use base::BaseBitmap;
pub use empty::EmptyBitmap;

use roaring::RoaringBitmap;
use std::{fmt, sync::Arc};
use thiserror::Error as ThisError;

/// Shared, immutable bitmap handle produced by formulas.
pub type SharedBitmap = Arc<dyn Bitmap>;

///
/// BitmapError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum BitmapError {
    #[error("{operation} is not supported by {bitmap}")]
    Unsupported {
        operation: &'static str,
        bitmap: &'static str,
    },

    #[error("index {index} out of range for bitmap of size {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("range {start}..{end} is invalid for bitmap of size {len}")]
    InvalidRange { start: usize, end: usize, len: usize },
}

///
/// Bitmap
///
/// Read contract shared by every bitmap shape.
///

pub trait Bitmap: fmt::Debug + Send + Sync {
    fn contains(&self, id: u32) -> bool;

    /// Position of `id` in ascending order, if present.
    fn index_of(&self, id: u32) -> Option<usize>;

    /// Id at `index`; fails when `index >= len()`.
    fn get(&self, index: usize) -> Result<u32, BitmapError>;

    /// Ids at positions `start..end` as a freshly allocated vector.
    fn range(&self, start: usize, end: usize) -> Result<Vec<u32>, BitmapError> {
        let len = self.len();
        if start > end || end > len {
            return Err(BitmapError::InvalidRange { start, end, len });
        }

        Ok(self.iter().skip(start).take(end - start).collect())
    }

    fn first(&self) -> Option<u32> {
        self.iter().next()
    }

    fn last(&self) -> Option<u32>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn iter(&self) -> Box<dyn Iterator<Item = u32> + '_>;

    fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }

    fn to_roaring(&self) -> RoaringBitmap {
        self.iter().collect()
    }
}

///
/// MutableBitmap
///
/// `add`/`remove` report whether the set changed; bulk variants ignore
/// duplicates and missing ids.
///

pub trait MutableBitmap: Bitmap {
    fn add(&mut self, id: u32) -> Result<bool, BitmapError>;

    fn remove(&mut self, id: u32) -> Result<bool, BitmapError>;

    fn add_all(&mut self, ids: &[u32]) -> Result<(), BitmapError> {
        for id in ids {
            self.add(*id)?;
        }

        Ok(())
    }

    fn remove_all(&mut self, ids: &[u32]) -> Result<(), BitmapError> {
        for id in ids {
            self.remove(*id)?;
        }

        Ok(())
    }
}

/// Structural equality over ascending contents.
#[must_use]
pub fn same_contents(a: &dyn Bitmap, b: &dyn Bitmap) -> bool {
    a.len() == b.len() && a.iter().eq(b.iter())
}

/// Intersection of all operands; the empty operand list yields an empty bitmap.
#[must_use]
pub fn and_all(operands: &[&dyn Bitmap]) -> BaseBitmap {
    let Some((first, rest)) = operands.split_first() else {
        return BaseBitmap::new();
    };

    let mut acc = first.to_roaring();
    for operand in rest {
        if acc.is_empty() {
            break;
        }
        acc &= operand.to_roaring();
    }

    BaseBitmap::from_roaring(acc)
}

/// Union of all operands.
#[must_use]
pub fn or_all(operands: &[&dyn Bitmap]) -> BaseBitmap {
    let mut acc = RoaringBitmap::new();
    for operand in operands {
        acc |= operand.to_roaring();
    }

    BaseBitmap::from_roaring(acc)
}

/// `superset \ subtracted`.
#[must_use]
pub fn and_not(superset: &dyn Bitmap, subtracted: &dyn Bitmap) -> BaseBitmap {
    let mut acc = superset.to_roaring();
    acc -= subtracted.to_roaring();

    BaseBitmap::from_roaring(acc)
}
