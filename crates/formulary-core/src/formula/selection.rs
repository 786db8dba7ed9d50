use crate::{
    bitmap::SharedBitmap,
    entity::{EntityToBitmapFilter, PrefetchedEntities},
    formula::{
        Formula, FormulaError, FormulaFinder, FormulaKind, LookUp,
        entity_filter::filter_path_cost,
    },
    obs::sink::{self, MetricsEvent, SelectionPath},
    price::{FilteredPriceRecords, PriceAmountPredicate},
    query::QueryExecutionContext,
};
use std::sync::Arc;
use tracing::trace;

///
/// SelectionBinding
///

#[derive(Clone, Debug, Default)]
pub enum SelectionBinding {
    #[default]
    Uninitialized,
    Index,
    Prefetch {
        entities: Arc<PrefetchedEntities>,
        per_requirement_cost: u64,
    },
}

///
/// SelectionFormula
///
/// Computes either through its delegate (index path) or through the
/// alternative filter over prefetched entities (prefetch path). The path is
/// chosen once per execution context by `initialize`; every estimate and
/// price accessor follows the bound path.
///

#[derive(Clone, Debug)]
pub struct SelectionFormula {
    delegate: Box<Formula>,
    alternative: Arc<dyn EntityToBitmapFilter>,
    binding: SelectionBinding,
}

impl SelectionFormula {
    pub(super) fn new(delegate: Formula, alternative: Arc<dyn EntityToBitmapFilter>) -> Self {
        Self {
            delegate: Box::new(delegate),
            alternative,
            binding: SelectionBinding::Uninitialized,
        }
    }

    pub(super) fn with_delegate(&self, delegate: Formula) -> Self {
        Self {
            delegate: Box::new(delegate),
            alternative: Arc::clone(&self.alternative),
            binding: self.binding.clone(),
        }
    }

    #[must_use]
    pub fn delegate(&self) -> &Formula {
        &self.delegate
    }

    pub(super) fn delegate_mut(&mut self) -> &mut Formula {
        &mut self.delegate
    }

    #[must_use]
    pub fn alternative(&self) -> &dyn EntityToBitmapFilter {
        self.alternative.as_ref()
    }

    #[must_use]
    pub const fn binding(&self) -> &SelectionBinding {
        &self.binding
    }

    pub(super) fn bind(&mut self, context: &QueryExecutionContext) {
        let (binding, path) = match context.prefetched() {
            Some(entities) if entities.usable_for_filtering() => (
                SelectionBinding::Prefetch {
                    entities: Arc::clone(entities),
                    per_requirement_cost: context.cost().per_requirement_cost,
                },
                SelectionPath::Prefetch,
            ),
            _ => (SelectionBinding::Index, SelectionPath::Index),
        };

        trace!(path = ?path, "selection bound");
        sink::record(MetricsEvent::SelectionBound { path });
        self.binding = binding;
    }

    /// Cost of the prefetch path, when bound to it.
    pub(super) fn prefetch_path_cost(&self) -> Option<u64> {
        match &self.binding {
            SelectionBinding::Prefetch {
                per_requirement_cost,
                ..
            } => Some(filter_path_cost(
                self.alternative.as_ref(),
                *per_requirement_cost,
            )),
            _ => None,
        }
    }

    pub(super) fn prefetched(&self) -> Option<&PrefetchedEntities> {
        match &self.binding {
            SelectionBinding::Prefetch { entities, .. } => Some(entities.as_ref()),
            _ => None,
        }
    }

    pub(super) fn compute(&self) -> Result<SharedBitmap, FormulaError> {
        match &self.binding {
            SelectionBinding::Uninitialized => Err(Self::not_initialized()),
            SelectionBinding::Index => self.delegate.compute(),
            SelectionBinding::Prefetch { entities, .. } => {
                Ok(Arc::new(self.alternative.filter(entities)?))
            }
        }
    }

    pub(super) fn is_price_accessor(&self) -> bool {
        self.alternative.requested_predicate().is_some()
    }

    pub(super) fn filtered_price_records(&self) -> Result<FilteredPriceRecords, FormulaError> {
        match &self.binding {
            SelectionBinding::Uninitialized => Err(Self::not_initialized()),
            SelectionBinding::Prefetch { entities, .. } => Ok(self
                .alternative
                .filtered_price_records(entities)
                .unwrap_or_default()),
            SelectionBinding::Index => {
                let result = self.delegate.compute()?;
                FilteredPriceRecords::create_from_formulas(&self.delegate, result.as_ref())
            }
        }
    }

    pub(super) fn requested_predicate(&self) -> Option<PriceAmountPredicate> {
        if self.prefetched().is_some() {
            return self.alternative.requested_predicate();
        }

        FormulaFinder::find(
            &self.delegate,
            |f| f.requested_predicate().is_some(),
            LookUp::Shallow,
        )
        .first()
        .and_then(|f| f.requested_predicate())
    }

    pub(super) fn with_filtered_out_results(&self) -> Result<Option<Formula>, FormulaError> {
        match &self.binding {
            SelectionBinding::Uninitialized => Err(Self::not_initialized()),
            SelectionBinding::Prefetch { entities, .. } => Ok(Some(Formula::constant(
                self.alternative.filter_with_filtered_out_results(entities)?,
            ))),
            SelectionBinding::Index => Ok(self.delegate.with_filtered_out_results()?.map(
                |delegate| Formula::from_kind(FormulaKind::Selection(self.with_delegate(delegate))),
            )),
        }
    }

    const fn not_initialized() -> FormulaError {
        FormulaError::NotInitialized {
            formula: "SelectionFormula",
        }
    }
}
