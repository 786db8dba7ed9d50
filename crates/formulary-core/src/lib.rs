//! Core runtime for Formulary: bitmaps, transactional overlays, lazy formulas,
//! the flattened-formula cache, and the entity prefetch optimizer.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod bitmap;
pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod formula;
pub mod obs;
pub mod prefetch;
pub mod price;
pub mod query;
pub mod transaction;

pub(crate) mod hash;

#[cfg(test)]
pub(crate) mod test_support;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, caches, or metrics plumbing are re-exported here.
///

pub mod prelude {
    pub use crate::{
        bitmap::{ArrayBitmap, BaseBitmap, Bitmap, EmptyBitmap, MutableBitmap, SharedBitmap},
        bitmap::transactional::TransactionalBitmap,
        entity::{
            AttributeFilter, AttributeValue, EntityContentRequire, EntityFetchRequirements,
            EntityFetcher, EntityReference, EntityToBitmapFilter, PrefetchedEntities,
            PriceBetweenFilter, SealedEntity,
        },
        formula::Formula,
        price::{
            FilteredPriceRecords, PriceAmountPredicate, PriceEvaluationContext, PriceIndexKey,
            PriceRecord, QueryPriceMode,
        },
        transaction::Transaction,
    };
}
