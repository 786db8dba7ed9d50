//! Memoized formula results.
//!
//! A [`FlattenedFormula`] is an immutable substitute for a computed subtree,
//! keyed by the subtree's structural hash and valid only while the live
//! transactional-source ids hash to the recorded value. The [`FormulaCache`]
//! decides which subtrees are worth flattening and swaps valid payloads into
//! new query trees. Invalidation is versioned: a stale payload is dropped and
//! recaptured, never repaired.

mod flattened;
mod header;
mod store;


pub use crate::hash::transactional_id_hash;
pub use flattened::{FlattenedFormula, FlattenedPayload, PricePredicatePayload};
pub use header::CachePayloadHeader;
pub use store::{CacheStats, EvaluationSummary, FormulaCache};
