use crate::{
    bitmap::{BaseBitmap, Bitmap, SharedBitmap},
    entity::EntityReference,
    hash::{NodeHasher, content_hash, feed_i64, feed_str, feed_u32},
    price::{FilteredPriceRecords, PriceIndexKey},
};
use std::sync::Arc;

///
/// ConstantFormula
///
/// Leaf over an already materialized bitmap, optionally tagged with the
/// structure it was read from and the transactional-source id of the
/// contents read.
///

#[derive(Clone, Debug)]
pub struct ConstantFormula {
    pub(crate) bitmap: SharedBitmap,
    pub(crate) source: Option<TransactionalSource>,
}

///
/// TransactionalSource
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransactionalSource {
    pub structure_id: u64,
    pub transactional_id: u64,
}

impl ConstantFormula {
    #[must_use]
    pub const fn bitmap(&self) -> &SharedBitmap {
        &self.bitmap
    }

    #[must_use]
    pub const fn source(&self) -> Option<TransactionalSource> {
        self.source
    }

    #[must_use]
    pub const fn transactional_id(&self) -> Option<u64> {
        match self.source {
            Some(source) => Some(source.transactional_id),
            None => None,
        }
    }

    // Sourced leaves are identified by their structure; the contents they read
    // are versioned through the transactional id.
    pub(super) fn identity(&self, node: NodeHasher) -> u64 {
        match self.source {
            Some(source) => node.value(1).value(source.structure_id).finish(),
            None => node
                .value(0)
                .value(content_hash(self.bitmap.iter()))
                .finish(),
        }
    }
}

///
/// MultipleEntityFormula
///
/// Entity references of several collections, masked to synthetic ids. The
/// masked ids have no index representation, so the node is terminal.
///

#[derive(Clone, Debug)]
pub struct MultipleEntityFormula {
    pub(crate) references: Arc<[EntityReference]>,
    pub(crate) masked_ids: Arc<BaseBitmap>,
}

impl MultipleEntityFormula {
    #[must_use]
    pub fn references(&self) -> &[EntityReference] {
        &self.references
    }

    #[must_use]
    pub const fn masked_ids(&self) -> &Arc<BaseBitmap> {
        &self.masked_ids
    }

    pub(super) fn identity(&self, mut node: NodeHasher) -> u64 {
        for reference in self.references.iter() {
            feed_str(node.raw(), &reference.entity_type);
            feed_u32(node.raw(), reference.pk);
        }
        node.value(content_hash(self.masked_ids.iter())).finish()
    }
}

///
/// PriceRecordsFormula
///
/// Leaf exposing the price records of one price index and the entities
/// owning them.
///

#[derive(Clone, Debug)]
pub struct PriceRecordsFormula {
    pub(crate) key: PriceIndexKey,
    pub(crate) records: FilteredPriceRecords,
    pub(crate) entity_ids: Arc<BaseBitmap>,
    pub(crate) transactional_id: Option<u64>,
}

impl PriceRecordsFormula {
    pub(super) fn new(
        key: PriceIndexKey,
        records: FilteredPriceRecords,
        transactional_id: Option<u64>,
    ) -> Self {
        let entity_ids = records.iter().map(|r| r.entity_pk).collect();

        Self {
            key,
            records,
            entity_ids: Arc::new(entity_ids),
            transactional_id,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &PriceIndexKey {
        &self.key
    }

    #[must_use]
    pub const fn records(&self) -> &FilteredPriceRecords {
        &self.records
    }

    #[must_use]
    pub const fn entity_ids(&self) -> &Arc<BaseBitmap> {
        &self.entity_ids
    }

    pub(super) fn identity(&self, mut node: NodeHasher) -> u64 {
        self.key.feed(node.raw());
        // A sourced leaf reads the live index named by its key.
        match self.transactional_id {
            Some(_) => node.value(1).finish(),
            None => {
                for record in self.records.iter() {
                    feed_u32(node.raw(), record.internal_price_id);
                    feed_u32(node.raw(), record.entity_pk);
                    feed_i64(node.raw(), record.price_without_tax);
                    feed_i64(node.raw(), record.price_with_tax);
                }
                node.value(0).finish()
            }
        }
    }
}
