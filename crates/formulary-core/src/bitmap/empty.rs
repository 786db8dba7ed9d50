use crate::bitmap::{Bitmap, BitmapError, MutableBitmap, SharedBitmap};
use std::sync::{Arc, LazyLock};

static SHARED_EMPTY: LazyLock<SharedBitmap> = LazyLock::new(|| Arc::new(EmptyBitmap));

///
/// EmptyBitmap
///
/// Immutable, always-empty bitmap used as a safe zero value.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EmptyBitmap;

impl EmptyBitmap {
    /// The process-wide shared instance.
    #[must_use]
    pub fn shared() -> SharedBitmap {
        Arc::clone(&SHARED_EMPTY)
    }

    const fn immutable(operation: &'static str) -> BitmapError {
        BitmapError::Unsupported {
            operation,
            bitmap: "EmptyBitmap",
        }
    }
}

impl Bitmap for EmptyBitmap {
    fn contains(&self, _id: u32) -> bool {
        false
    }

    fn index_of(&self, _id: u32) -> Option<usize> {
        None
    }

    fn get(&self, index: usize) -> Result<u32, BitmapError> {
        Err(BitmapError::IndexOutOfRange { index, len: 0 })
    }

    fn last(&self) -> Option<u32> {
        None
    }

    fn len(&self) -> usize {
        0
    }

    fn iter(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        Box::new(std::iter::empty())
    }
}

impl MutableBitmap for EmptyBitmap {
    fn add(&mut self, _id: u32) -> Result<bool, BitmapError> {
        Err(Self::immutable("add"))
    }

    fn remove(&mut self, _id: u32) -> Result<bool, BitmapError> {
        Err(Self::immutable("remove"))
    }
}
