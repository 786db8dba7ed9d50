//! Content hashing for formula identity and transactional-source sets.
//!
//! All hashes are xxh3-64 over big-endian encodings so that identical trees
//! produce identical hashes across processes and platforms.

use xxhash_rust::xxh3::Xxh3;

pub(crate) fn feed_u8(h: &mut Xxh3, x: u8) {
    h.update(&[x]);
}
pub(crate) fn feed_u32(h: &mut Xxh3, x: u32) {
    h.update(&x.to_be_bytes());
}
pub(crate) fn feed_u64(h: &mut Xxh3, x: u64) {
    h.update(&x.to_be_bytes());
}
pub(crate) fn feed_i64(h: &mut Xxh3, x: i64) {
    h.update(&x.to_be_bytes());
}
pub(crate) fn feed_str(h: &mut Xxh3, s: &str) {
    feed_u32(h, u32::try_from(s.len()).unwrap_or(u32::MAX));
    h.update(s.as_bytes());
}

///
/// NodeHasher
///
/// Incremental hasher for a single formula node. Children of commutative
/// containers are fed through [`NodeHasher::children_unordered`] so that the
/// resulting hash does not depend on operand order.
///

pub(crate) struct NodeHasher(Xxh3);

impl NodeHasher {
    pub(crate) fn new(tag: u8) -> Self {
        let mut h = Xxh3::new();
        feed_u8(&mut h, tag);
        Self(h)
    }

    pub(crate) fn raw(&mut self) -> &mut Xxh3 {
        &mut self.0
    }

    pub(crate) fn value(mut self, x: u64) -> Self {
        feed_u64(&mut self.0, x);
        self
    }

    pub(crate) fn children_ordered(mut self, hashes: impl IntoIterator<Item = u64>) -> Self {
        let mut count = 0u32;
        for hash in hashes {
            feed_u64(&mut self.0, hash);
            count = count.saturating_add(1);
        }
        feed_u32(&mut self.0, count);
        self
    }

    pub(crate) fn children_unordered(self, hashes: impl IntoIterator<Item = u64>) -> Self {
        let mut sorted: Vec<u64> = hashes.into_iter().collect();
        sorted.sort_unstable();
        self.children_ordered(sorted)
    }

    pub(crate) fn finish(self) -> u64 {
        self.0.digest()
    }
}

/// Hash a distinct, ascending set of transactional-source ids.
///
/// Callers must pass ids already sorted and de-duplicated; the empty set
/// hashes to zero so that source-free subtrees compare equal.
#[must_use]
pub fn transactional_id_hash(ids: &[u64]) -> u64 {
    if ids.is_empty() {
        return 0;
    }

    let mut h = Xxh3::new();
    for id in ids {
        feed_u64(&mut h, *id);
    }
    h.digest()
}

/// Hash the contents of an ascending id sequence.
pub(crate) fn content_hash(ids: impl IntoIterator<Item = u32>) -> u64 {
    let mut h = Xxh3::new();
    let mut count = 0u64;
    for id in ids {
        feed_u32(&mut h, id);
        count = count.saturating_add(1);
    }
    feed_u64(&mut h, count);
    h.digest()
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unordered_children_hash_is_order_independent() {
        let a = NodeHasher::new(1).children_unordered([3, 1, 2]).finish();
        let b = NodeHasher::new(1).children_unordered([2, 3, 1]).finish();
        assert_eq!(a, b);
    }

    #[test]
    fn ordered_children_hash_depends_on_order() {
        let a = NodeHasher::new(1).children_ordered([1, 2]).finish();
        let b = NodeHasher::new(1).children_ordered([2, 1]).finish();
        assert_ne!(a, b);
    }

    #[test]
    fn tag_participates_in_hash() {
        let a = NodeHasher::new(1).children_unordered([7]).finish();
        let b = NodeHasher::new(2).children_unordered([7]).finish();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_transactional_set_hashes_to_zero() {
        assert_eq!(transactional_id_hash(&[]), 0);
        assert_ne!(transactional_id_hash(&[1, 2]), transactional_id_hash(&[1, 3]));
    }

    #[test]
    fn content_hash_distinguishes_prefixes() {
        assert_ne!(content_hash([1, 2]), content_hash([1, 2, 0]));
        assert_eq!(content_hash([4, 9]), content_hash(vec![4, 9]));
    }
}
