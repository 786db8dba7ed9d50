use crate::hash::transactional_id_hash;
use std::sync::Arc;

///
/// CachePayloadHeader
///
/// Identity shared by every flattened payload variant.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CachePayloadHeader {
    /// Structural hash of the subtree the payload replaces.
    pub record_hash: u64,

    /// Hash of `transactional_data_ids`.
    pub transactional_id_hash: u64,

    /// Distinct, ascending transactional-source ids the result depends on.
    pub transactional_data_ids: Arc<[u64]>,
}

impl CachePayloadHeader {
    #[must_use]
    pub fn new(record_hash: u64, transactional_data_ids: impl IntoIterator<Item = u64>) -> Self {
        let mut ids: Vec<u64> = transactional_data_ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();

        Self {
            record_hash,
            transactional_id_hash: transactional_id_hash(&ids),
            transactional_data_ids: ids.into(),
        }
    }

    /// True while the live sources still hash to the recorded value.
    #[must_use]
    pub const fn is_valid_for(&self, live_transactional_id_hash: u64) -> bool {
        self.transactional_id_hash == live_transactional_id_hash
    }

    pub(crate) fn estimated_size_bytes(&self) -> u64 {
        let ids = u64::try_from(self.transactional_data_ids.len()).unwrap_or(u64::MAX);
        ids.saturating_mul(8).saturating_add(16)
    }
}
