use crate::{
    bitmap::{Bitmap, EmptyBitmap, SharedBitmap, and_all, and_not, or_all},
    formula::{Formula, FormulaError, FormulaKind},
    obs::sink::{self, MetricsEvent},
    query::QueryExecutionContext,
};
use std::sync::Arc;

impl Formula {
    /// Compute the result, memoized until the next `initialize`.
    pub fn compute(&self) -> Result<SharedBitmap, FormulaError> {
        if let Some(result) = self.memo.result.get() {
            return Ok(Arc::clone(result));
        }

        let result = self.compute_internal()?;
        if !matches!(
            self.kind,
            FormulaKind::Empty | FormulaKind::Constant(_) | FormulaKind::Flattened(_)
        ) {
            sink::record(MetricsEvent::FormulaComputed {
                formula: self.name(),
                rows: u64::try_from(result.len()).unwrap_or(u64::MAX),
            });
        }

        Ok(Arc::clone(self.memo.result.get_or_init(|| result)))
    }

    /// Result memoized by an earlier `compute`, if any.
    #[must_use]
    pub fn computed(&self) -> Option<&SharedBitmap> {
        self.memo.result.get()
    }

    fn compute_internal(&self) -> Result<SharedBitmap, FormulaError> {
        let result: SharedBitmap = match &self.kind {
            FormulaKind::Empty => EmptyBitmap::shared(),
            FormulaKind::Constant(constant) => Arc::clone(&constant.bitmap),
            FormulaKind::And(inner) | FormulaKind::UserFilter(inner) => {
                let results = compute_all(inner)?;
                Arc::new(and_all(&borrow_all(&results)))
            }
            FormulaKind::Or(inner) => {
                let results = compute_all(inner)?;
                Arc::new(or_all(&borrow_all(&results)))
            }
            FormulaKind::Not {
                subtracted,
                superset,
            } => {
                let superset = superset.compute()?;
                if superset.is_empty() {
                    return Ok(superset);
                }
                let subtracted = subtracted.compute()?;
                Arc::new(and_not(superset.as_ref(), subtracted.as_ref()))
            }
            FormulaKind::MultipleEntity(multiple) => multiple.masked_ids.clone(),
            FormulaKind::PriceRecords(records) => records.entity_ids.clone(),
            FormulaKind::PriceFilter(filter) => filter.outcome()?.passing.clone(),
            FormulaKind::EntityFilter(filter) => filter.compute()?,
            FormulaKind::Selection(selection) => selection.compute()?,
            FormulaKind::Flattened(flattened) => flattened.result().clone(),
        };

        Ok(result)
    }

    /// Bind the tree to an execution context: selections choose their path,
    /// entity filters see the prefetched entities, and every context-dependent
    /// memo is dropped.
    pub fn initialize(&mut self, context: &QueryExecutionContext) {
        for inner in self.inner_formulas_mut() {
            inner.initialize(context);
        }

        match &mut self.kind {
            FormulaKind::PriceFilter(filter) => filter.reset(),
            FormulaKind::EntityFilter(filter) => filter.bind(context),
            FormulaKind::Selection(selection) => selection.bind(context),
            _ => {}
        }
        self.memo.reset_execution();
    }
}

fn compute_all(inner: &[Formula]) -> Result<Vec<SharedBitmap>, FormulaError> {
    inner.iter().map(Formula::compute).collect()
}

fn borrow_all(results: &[SharedBitmap]) -> Vec<&dyn Bitmap> {
    results.iter().map(AsRef::as_ref).collect()
}
