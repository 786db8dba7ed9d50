use crate::{
    bitmap::BaseBitmap,
    formula::{Formula, FormulaError, FormulaKind},
    price::{
        FilteredPriceRecords, PriceAmountPredicate, PriceEvaluationContext, PriceSelection,
        resolve_inner_record_handling, select_selling_price,
    },
};
use std::{cell::OnceCell, sync::Arc};

///
/// PriceFilterFormula
///
/// Terminates price evaluation: picks the selling price of every delegate
/// entity among the price accessors below it and keeps entities whose price
/// passes the predicate. Entities with a failing price are remembered as
/// filtered out; entities without any price drop out silently.
///

#[derive(Clone, Debug)]
pub struct PriceFilterFormula {
    delegate: Box<Formula>,
    predicate: PriceAmountPredicate,
    context: PriceEvaluationContext,
    outcome: OnceCell<PriceFilterOutcome>,
}

#[derive(Clone, Debug)]
pub(crate) struct PriceFilterOutcome {
    pub(crate) passing: Arc<BaseBitmap>,
    pub(crate) filtered_out: Arc<BaseBitmap>,
    pub(crate) selected: FilteredPriceRecords,
}

impl PriceFilterFormula {
    pub(super) fn new(
        delegate: Formula,
        predicate: PriceAmountPredicate,
        context: PriceEvaluationContext,
    ) -> Self {
        Self {
            delegate: Box::new(delegate),
            predicate,
            context,
            outcome: OnceCell::new(),
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
    pub const fn predicate(&self) -> &PriceAmountPredicate {
        &self.predicate
    }

    #[must_use]
    pub const fn context(&self) -> &PriceEvaluationContext {
        &self.context
    }

    /// Entities whose selling price failed the predicate.
    pub fn filtered_out(&self) -> Result<Arc<BaseBitmap>, FormulaError> {
        Ok(Arc::clone(&self.outcome()?.filtered_out))
    }

    pub(super) fn reset(&mut self) {
        self.outcome.take();
    }

    pub(crate) fn outcome(&self) -> Result<&PriceFilterOutcome, FormulaError> {
        if let Some(outcome) = self.outcome.get() {
            return Ok(outcome);
        }

        let entities = self.delegate.compute()?;
        let records = FilteredPriceRecords::create_for_context(
            &self.delegate,
            entities.as_ref(),
            &self.context,
        )?;
        let predicate = self.predicate.to_record_predicate();
        let handling = resolve_inner_record_handling(&self.delegate, &self.context);

        let mut passing = BaseBitmap::new();
        let mut filtered_out = BaseBitmap::new();
        let mut selected = Vec::new();
        for pk in entities.iter() {
            match select_selling_price(records.records_for(pk), handling, &predicate) {
                PriceSelection::Passing(record) => {
                    passing.insert(pk);
                    selected.push(record);
                }
                PriceSelection::FilteredOut => {
                    filtered_out.insert(pk);
                }
                PriceSelection::NoPrice => {}
            }
        }

        Ok(self.outcome.get_or_init(|| PriceFilterOutcome {
            passing: Arc::new(passing),
            filtered_out: Arc::new(filtered_out),
            selected: FilteredPriceRecords::from_records(selected),
        }))
    }

    fn with_all_prices(&self) -> Formula {
        Formula::price_filter(
            (*self.delegate).clone(),
            PriceAmountPredicate::all(self.predicate.mode, self.predicate.indexed_price_places),
            self.context.clone(),
        )
    }
}

impl Formula {
    /// True for nodes exposing resolved price records.
    #[must_use]
    pub fn is_price_accessor(&self) -> bool {
        match &self.kind {
            FormulaKind::PriceRecords(_) | FormulaKind::PriceFilter(_) => true,
            FormulaKind::Selection(selection) => selection.is_price_accessor(),
            FormulaKind::Flattened(flattened) => flattened.prices().is_some(),
            _ => false,
        }
    }

    /// Price records this node exposes; `None` for nodes that are not price accessors.
    pub fn filtered_price_records(&self) -> Result<Option<FilteredPriceRecords>, FormulaError> {
        match &self.kind {
            FormulaKind::PriceRecords(records) => Ok(Some(records.records.clone())),
            FormulaKind::PriceFilter(filter) => Ok(Some(filter.outcome()?.selected.clone())),
            FormulaKind::Selection(selection) if selection.is_price_accessor() => {
                selection.filtered_price_records().map(Some)
            }
            FormulaKind::Flattened(flattened) => Ok(flattened.prices().cloned()),
            _ => Ok(None),
        }
    }

    /// Price predicate the user asked for, resolved along the bound path.
    #[must_use]
    pub fn requested_predicate(&self) -> Option<PriceAmountPredicate> {
        match &self.kind {
            FormulaKind::PriceFilter(filter) => Some(filter.predicate),
            FormulaKind::Selection(selection) => selection.requested_predicate(),
            FormulaKind::Flattened(flattened) => flattened.requested_predicate(),
            _ => None,
        }
    }

    /// Clone of this node whose result also holds the entities its price
    /// predicate filtered out. `None` for nodes without a price predicate.
    pub fn with_filtered_out_results(&self) -> Result<Option<Self>, FormulaError> {
        match &self.kind {
            FormulaKind::PriceFilter(filter) => Ok(Some(filter.with_all_prices())),
            FormulaKind::Selection(selection) => selection.with_filtered_out_results(),
            FormulaKind::Flattened(flattened) => {
                Ok(flattened.filtered_out_clone().map(Self::flattened))
            }
            _ => Ok(None),
        }
    }
}
