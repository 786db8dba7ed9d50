//! Lazy computation nodes producing bitmaps.
//!
//! A [`Formula`] is a closed sum of node kinds plus per-node memo cells. Trees
//! are immutable apart from the memo cells, which are filled on first access
//! and reset by [`Formula::initialize`]. A tree is owned by one thread at a
//! time: `Formula` is `Send` but not `Sync`.

mod compute;
mod cost;
mod entity_filter;
mod leaf;
mod memo;
mod price_filter;
mod selection;
mod visitor;


pub use entity_filter::EntityFilterFormula;
pub use leaf::{
    ConstantFormula, MultipleEntityFormula, PriceRecordsFormula, TransactionalSource,
};
pub use price_filter::PriceFilterFormula;
pub use selection::{SelectionBinding, SelectionFormula};
pub use visitor::{FormulaFinder, FormulaVisitor, LookUp};

use crate::{
    bitmap::{BaseBitmap, Bitmap, BitmapError, SharedBitmap},
    cache::{FlattenedFormula, transactional_id_hash},
    entity::{EntityFetchRequirements, EntityReference, EntityToBitmapFilter},
    hash::NodeHasher,
    price::{FilteredPriceRecords, PriceAmountPredicate, PriceEvaluationContext, PriceIndexKey},
};
use memo::Memo;
use std::sync::Arc;
use thiserror::Error as ThisError;

///
/// FormulaError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum FormulaError {
    #[error("{formula} is immutable and cannot be cloned with other inner formulas")]
    Immutable { formula: &'static str },

    #[error("{formula} expects {expected} inner formulas, got {found}")]
    InnerFormulaArity {
        formula: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{formula} cannot be computed: {reason}")]
    MissingContext {
        formula: &'static str,
        reason: String,
    },

    #[error("{formula} was computed before initialize")]
    NotInitialized { formula: &'static str },

    #[error(transparent)]
    Bitmap(#[from] BitmapError),

    /// Failure reported by an entity filter implementation.
    #[error("entity fetch failed: {0}")]
    EntityFetch(String),
}

impl FormulaError {
    /// True when the planner may prefetch entities and retry.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::MissingContext { .. })
    }
}

///
/// FormulaKind
///

#[derive(Clone, Debug)]
pub enum FormulaKind {
    Empty,
    Constant(ConstantFormula),
    And(Vec<Formula>),
    Or(Vec<Formula>),
    Not {
        subtracted: Box<Formula>,
        superset: Box<Formula>,
    },
    /// Conjunction of user-supplied constraints; kept apart from `And` so that
    /// the planner can tell user filters from internal joins.
    UserFilter(Vec<Formula>),
    MultipleEntity(MultipleEntityFormula),
    PriceRecords(PriceRecordsFormula),
    PriceFilter(PriceFilterFormula),
    EntityFilter(EntityFilterFormula),
    Selection(SelectionFormula),
    Flattened(Arc<FlattenedFormula>),
}

// Hash tags; stable across releases.
mod tag {
    pub(super) const EMPTY: u8 = 1;
    pub(super) const CONSTANT: u8 = 2;
    pub(super) const AND: u8 = 3;
    pub(super) const OR: u8 = 4;
    pub(super) const NOT: u8 = 5;
    pub(super) const USER_FILTER: u8 = 6;
    pub(super) const MULTIPLE_ENTITY: u8 = 7;
    pub(super) const PRICE_RECORDS: u8 = 8;
    pub(super) const PRICE_FILTER: u8 = 9;
    pub(super) const ENTITY_FILTER: u8 = 10;
    pub(super) const SELECTION: u8 = 11;
}

///
/// Formula
///

#[derive(Clone, Debug)]
pub struct Formula {
    kind: FormulaKind,
    memo: Memo,
}

impl Formula {
    fn from_kind(kind: FormulaKind) -> Self {
        Self {
            kind,
            memo: Memo::default(),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::from_kind(FormulaKind::Empty)
    }

    #[must_use]
    pub fn constant(bitmap: impl Bitmap + 'static) -> Self {
        Self::constant_shared(Arc::new(bitmap))
    }

    #[must_use]
    pub fn constant_shared(bitmap: SharedBitmap) -> Self {
        Self::from_kind(FormulaKind::Constant(ConstantFormula {
            bitmap,
            source: None,
        }))
    }

    /// Constant read from structure `structure_id` in the state named by
    /// `transactional_id`.
    #[must_use]
    pub fn constant_with_source(
        bitmap: SharedBitmap,
        structure_id: u64,
        transactional_id: u64,
    ) -> Self {
        Self::from_kind(FormulaKind::Constant(ConstantFormula {
            bitmap,
            source: Some(TransactionalSource {
                structure_id,
                transactional_id,
            }),
        }))
    }

    #[must_use]
    pub fn and(inner: Vec<Self>) -> Self {
        Self::from_kind(FormulaKind::And(inner))
    }

    #[must_use]
    pub fn or(inner: Vec<Self>) -> Self {
        Self::from_kind(FormulaKind::Or(inner))
    }

    /// `superset \ subtracted`.
    #[must_use]
    pub fn not(subtracted: Self, superset: Self) -> Self {
        Self::from_kind(FormulaKind::Not {
            subtracted: Box::new(subtracted),
            superset: Box::new(superset),
        })
    }

    #[must_use]
    pub fn user_filter(inner: Vec<Self>) -> Self {
        Self::from_kind(FormulaKind::UserFilter(inner))
    }

    pub(crate) fn multiple_entity(
        references: Arc<[EntityReference]>,
        masked_ids: BaseBitmap,
    ) -> Self {
        Self::from_kind(FormulaKind::MultipleEntity(MultipleEntityFormula {
            references,
            masked_ids: Arc::new(masked_ids),
        }))
    }

    #[must_use]
    pub fn price_records(
        key: PriceIndexKey,
        records: FilteredPriceRecords,
        transactional_id: Option<u64>,
    ) -> Self {
        Self::from_kind(FormulaKind::PriceRecords(PriceRecordsFormula::new(
            key,
            records,
            transactional_id,
        )))
    }

    #[must_use]
    pub fn price_filter(
        delegate: Self,
        predicate: PriceAmountPredicate,
        context: PriceEvaluationContext,
    ) -> Self {
        Self::from_kind(FormulaKind::PriceFilter(PriceFilterFormula::new(
            delegate, predicate, context,
        )))
    }

    #[must_use]
    pub fn entity_filter(filter: Arc<dyn EntityToBitmapFilter>) -> Self {
        Self::from_kind(FormulaKind::EntityFilter(EntityFilterFormula::new(filter)))
    }

    #[must_use]
    pub fn selection(delegate: Self, alternative: Arc<dyn EntityToBitmapFilter>) -> Self {
        Self::from_kind(FormulaKind::Selection(SelectionFormula::new(
            delegate,
            alternative,
        )))
    }

    #[must_use]
    pub fn flattened(flattened: Arc<FlattenedFormula>) -> Self {
        Self::from_kind(FormulaKind::Flattened(flattened))
    }

    #[must_use]
    pub const fn kind(&self) -> &FormulaKind {
        &self.kind
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match &self.kind {
            FormulaKind::Empty => "EmptyFormula",
            FormulaKind::Constant(_) => "ConstantFormula",
            FormulaKind::And(_) => "AndFormula",
            FormulaKind::Or(_) => "OrFormula",
            FormulaKind::Not { .. } => "NotFormula",
            FormulaKind::UserFilter(_) => "UserFilterFormula",
            FormulaKind::MultipleEntity(_) => "MultipleEntityFormula",
            FormulaKind::PriceRecords(_) => "PriceRecordsFormula",
            FormulaKind::PriceFilter(_) => "PriceFilterFormula",
            FormulaKind::EntityFilter(_) => "EntityFilterFormula",
            FormulaKind::Selection(_) => "SelectionFormula",
            FormulaKind::Flattened(_) => "FlattenedFormula",
        }
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Content identity, stable for structurally identical trees. Operand
    /// order of commutative containers does not participate.
    #[must_use]
    pub fn hash(&self) -> u64 {
        *self.memo.hash.get_or_init(|| self.structural_hash())
    }

    fn structural_hash(&self) -> u64 {
        match &self.kind {
            FormulaKind::Empty => NodeHasher::new(tag::EMPTY).finish(),
            FormulaKind::Constant(constant) => constant.identity(NodeHasher::new(tag::CONSTANT)),
            FormulaKind::And(inner) => NodeHasher::new(tag::AND)
                .children_unordered(inner.iter().map(Self::hash))
                .finish(),
            FormulaKind::Or(inner) => NodeHasher::new(tag::OR)
                .children_unordered(inner.iter().map(Self::hash))
                .finish(),
            FormulaKind::UserFilter(inner) => NodeHasher::new(tag::USER_FILTER)
                .children_unordered(inner.iter().map(Self::hash))
                .finish(),
            FormulaKind::Not {
                subtracted,
                superset,
            } => NodeHasher::new(tag::NOT)
                .children_ordered([subtracted.hash(), superset.hash()])
                .finish(),
            FormulaKind::MultipleEntity(multiple) => {
                multiple.identity(NodeHasher::new(tag::MULTIPLE_ENTITY))
            }
            FormulaKind::PriceRecords(records) => {
                records.identity(NodeHasher::new(tag::PRICE_RECORDS))
            }
            FormulaKind::PriceFilter(filter) => NodeHasher::new(tag::PRICE_FILTER)
                .value(filter.predicate().identity_hash())
                .value(filter.context().identity_hash())
                .children_ordered([filter.delegate().hash()])
                .finish(),
            FormulaKind::EntityFilter(filter) => NodeHasher::new(tag::ENTITY_FILTER)
                .value(filter.filter().identity_hash())
                .finish(),
            // Both paths yield the same ids, so the alternative does not participate.
            FormulaKind::Selection(selection) => NodeHasher::new(tag::SELECTION)
                .value(0)
                .children_ordered([selection.delegate().hash()])
                .finish(),
            FormulaKind::Flattened(flattened) => flattened.header().record_hash,
        }
    }

    /// Distinct, ascending transactional-source ids feeding this subtree.
    #[must_use]
    pub fn gather_transactional_ids(&self) -> Arc<[u64]> {
        let ids = self.memo.transactional_ids.get_or_init(|| {
            let mut ids: Vec<u64> = match &self.kind {
                FormulaKind::Constant(constant) => {
                    constant.transactional_id().into_iter().collect()
                }
                FormulaKind::PriceRecords(records) => {
                    records.transactional_id.into_iter().collect()
                }
                FormulaKind::Flattened(flattened) => {
                    flattened.header().transactional_data_ids.to_vec()
                }
                _ => Vec::new(),
            };
            for inner in self.inner_formulas() {
                ids.extend(inner.gather_transactional_ids().iter().copied());
            }
            ids.sort_unstable();
            ids.dedup();

            ids.into()
        });

        Arc::clone(ids)
    }

    /// Order-independent hash of [`Self::gather_transactional_ids`].
    #[must_use]
    pub fn transactional_id_hash(&self) -> u64 {
        *self
            .memo
            .transactional_id_hash
            .get_or_init(|| transactional_id_hash(&self.gather_transactional_ids()))
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    #[must_use]
    pub fn inner_formulas(&self) -> Vec<&Self> {
        match &self.kind {
            FormulaKind::And(inner) | FormulaKind::Or(inner) | FormulaKind::UserFilter(inner) => {
                inner.iter().collect()
            }
            FormulaKind::Not {
                subtracted,
                superset,
            } => vec![subtracted.as_ref(), superset.as_ref()],
            FormulaKind::PriceFilter(filter) => vec![filter.delegate()],
            FormulaKind::Selection(selection) => vec![selection.delegate()],
            FormulaKind::Empty
            | FormulaKind::Constant(_)
            | FormulaKind::MultipleEntity(_)
            | FormulaKind::PriceRecords(_)
            | FormulaKind::EntityFilter(_)
            | FormulaKind::Flattened(_) => Vec::new(),
        }
    }

    pub(crate) fn inner_formulas_mut(&mut self) -> Vec<&mut Self> {
        match &mut self.kind {
            FormulaKind::And(inner) | FormulaKind::Or(inner) | FormulaKind::UserFilter(inner) => {
                inner.iter_mut().collect()
            }
            FormulaKind::Not {
                subtracted,
                superset,
            } => vec![subtracted.as_mut(), superset.as_mut()],
            FormulaKind::PriceFilter(filter) => vec![filter.delegate_mut()],
            FormulaKind::Selection(selection) => vec![selection.delegate_mut()],
            FormulaKind::Empty
            | FormulaKind::Constant(_)
            | FormulaKind::MultipleEntity(_)
            | FormulaKind::PriceRecords(_)
            | FormulaKind::EntityFilter(_)
            | FormulaKind::Flattened(_) => Vec::new(),
        }
    }

    /// Same node over different inner formulas. Fixed-arity nodes reject a
    /// mismatched count; flattened and translated nodes are immutable.
    pub fn clone_with_inner_formulas(&self, inner: Vec<Self>) -> Result<Self, FormulaError> {
        let formula = self.name();
        let arity = |expected: usize, found: usize| FormulaError::InnerFormulaArity {
            formula,
            expected,
            found,
        };

        match &self.kind {
            FormulaKind::Flattened(_) | FormulaKind::MultipleEntity(_) => {
                Err(FormulaError::Immutable { formula })
            }
            FormulaKind::Empty
            | FormulaKind::Constant(_)
            | FormulaKind::PriceRecords(_)
            | FormulaKind::EntityFilter(_) => {
                if inner.is_empty() {
                    Ok(Self::from_kind(self.kind.clone()))
                } else {
                    Err(arity(0, inner.len()))
                }
            }
            FormulaKind::And(_) => Ok(Self::and(inner)),
            FormulaKind::Or(_) => Ok(Self::or(inner)),
            FormulaKind::UserFilter(_) => Ok(Self::user_filter(inner)),
            FormulaKind::Not { .. } => {
                let [subtracted, superset] =
                    <[Self; 2]>::try_from(inner).map_err(|inner| arity(2, inner.len()))?;

                Ok(Self::not(subtracted, superset))
            }
            FormulaKind::PriceFilter(filter) => {
                let [delegate] =
                    <[Self; 1]>::try_from(inner).map_err(|inner| arity(1, inner.len()))?;

                Ok(Self::price_filter(
                    delegate,
                    *filter.predicate(),
                    filter.context().clone(),
                ))
            }
            FormulaKind::Selection(selection) => {
                let [delegate] =
                    <[Self; 1]>::try_from(inner).map_err(|inner| arity(1, inner.len()))?;

                Ok(Self::from_kind(FormulaKind::Selection(
                    selection.with_delegate(delegate),
                )))
            }
        }
    }

    pub fn accept<'a, V>(&'a self, visitor: &mut V)
    where
        V: FormulaVisitor<'a> + ?Sized,
    {
        visitor.visit(self);
    }

    // ------------------------------------------------------------------
    // Requirements
    // ------------------------------------------------------------------

    /// Entity content the node needs when evaluated over prefetched entities.
    #[must_use]
    pub fn requirements(&self) -> Option<EntityFetchRequirements> {
        match &self.kind {
            FormulaKind::EntityFilter(filter) => Some(filter.filter().requirements()),
            FormulaKind::Selection(selection) => Some(selection.alternative().requirements()),
            _ => None,
        }
    }

    /// True when the subtree may be replaced by a flattened payload: the node
    /// is an operator whose result depends only on bitmaps and prices, and so
    /// does every node below it.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        match &self.kind {
            FormulaKind::And(_)
            | FormulaKind::Or(_)
            | FormulaKind::Not { .. }
            | FormulaKind::UserFilter(_)
            | FormulaKind::PriceFilter(_) => self.inner_formulas().into_iter().all(|inner| {
                inner.is_cacheable()
                    || matches!(
                        inner.kind,
                        FormulaKind::Empty
                            | FormulaKind::Constant(_)
                            | FormulaKind::PriceRecords(_)
                            | FormulaKind::Flattened(_)
                    )
            }),
            _ => false,
        }
    }

    /// Key of the price index a price-records leaf reads.
    #[must_use]
    pub fn price_index_key(&self) -> Option<&PriceIndexKey> {
        match &self.kind {
            FormulaKind::PriceRecords(records) => Some(&records.key),
            _ => None,
        }
    }
}
