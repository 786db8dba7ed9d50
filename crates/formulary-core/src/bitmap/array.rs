use crate::bitmap::{Bitmap, BitmapError, MutableBitmap};

///
/// ArrayBitmap
///
/// Append-only bitmap for write-once index segments. Ids may be inserted in any
/// order (they are kept sorted) but never removed.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ArrayBitmap {
    ids: Vec<u32>,
}

impl ArrayBitmap {
    #[must_use]
    pub const fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Build from arbitrary ids; duplicates collapse.
    #[must_use]
    pub fn from_ids(ids: impl IntoIterator<Item = u32>) -> Self {
        let mut ids: Vec<u32> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();

        Self { ids }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.ids
    }
}

impl Bitmap for ArrayBitmap {
    fn contains(&self, id: u32) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    fn index_of(&self, id: u32) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    fn get(&self, index: usize) -> Result<u32, BitmapError> {
        self.ids
            .get(index)
            .copied()
            .ok_or(BitmapError::IndexOutOfRange {
                index,
                len: self.ids.len(),
            })
    }

    fn range(&self, start: usize, end: usize) -> Result<Vec<u32>, BitmapError> {
        self.ids
            .get(start..end)
            .map(<[u32]>::to_vec)
            .ok_or(BitmapError::InvalidRange {
                start,
                end,
                len: self.ids.len(),
            })
    }

    fn first(&self) -> Option<u32> {
        self.ids.first().copied()
    }

    fn last(&self) -> Option<u32> {
        self.ids.last().copied()
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        Box::new(self.ids.iter().copied())
    }

    fn to_vec(&self) -> Vec<u32> {
        self.ids.clone()
    }
}

impl MutableBitmap for ArrayBitmap {
    fn add(&mut self, id: u32) -> Result<bool, BitmapError> {
        match self.ids.binary_search(&id) {
            Ok(_) => Ok(false),
            Err(pos) => {
                self.ids.insert(pos, id);
                Ok(true)
            }
        }
    }

    fn remove(&mut self, _id: u32) -> Result<bool, BitmapError> {
        Err(BitmapError::Unsupported {
            operation: "remove",
            bitmap: "ArrayBitmap",
        })
    }
}
