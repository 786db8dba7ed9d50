//! Cardinality and cost estimation.
//!
//! Estimators never fail: a value that cannot be determined saturates to the
//! maximum so the planner deprioritizes the node instead of aborting.

use crate::{
    bitmap::Bitmap,
    entity::PrefetchedEntities,
    formula::{Formula, FormulaKind, SelectionBinding},
};

pub(crate) mod operation {
    pub(crate) const EMPTY: u64 = 0;
    pub(crate) const CONSTANT: u64 = 1;
    pub(crate) const AND: u64 = 11;
    pub(crate) const OR: u64 = 13;
    pub(crate) const NOT: u64 = 16;
    pub(crate) const USER_FILTER: u64 = 11;
    pub(crate) const MULTIPLE_ENTITY: u64 = 1;
    pub(crate) const PRICE_RECORDS: u64 = 1;
    pub(crate) const PRICE_FILTER: u64 = 18_203;
    pub(crate) const SELECTION: u64 = 1;
}

fn widen(x: usize) -> u64 {
    u64::try_from(x).unwrap_or(u64::MAX)
}

impl Formula {
    #[must_use]
    pub fn estimated_cardinality(&self) -> usize {
        match &self.kind {
            FormulaKind::Empty => 0,
            FormulaKind::Constant(constant) => constant.bitmap.len(),
            FormulaKind::And(inner) | FormulaKind::UserFilter(inner) => inner
                .iter()
                .map(Self::estimated_cardinality)
                .min()
                .unwrap_or(0),
            FormulaKind::Or(inner) => inner
                .iter()
                .map(Self::estimated_cardinality)
                .fold(0, usize::saturating_add),
            FormulaKind::Not { superset, .. } => superset.estimated_cardinality(),
            FormulaKind::MultipleEntity(multiple) => multiple.masked_ids.len(),
            FormulaKind::PriceRecords(records) => records.entity_ids.len(),
            FormulaKind::PriceFilter(filter) => filter.delegate().estimated_cardinality(),
            FormulaKind::EntityFilter(filter) => filter
                .usable_entities()
                .map_or(usize::MAX, PrefetchedEntities::len),
            FormulaKind::Selection(selection) => selection.prefetched().map_or_else(
                || selection.delegate().estimated_cardinality(),
                PrefetchedEntities::len,
            ),
            FormulaKind::Flattened(flattened) => flattened.result().len(),
        }
    }

    /// Cost of producing one result row at this node, excluding inner formulas.
    #[must_use]
    pub fn operation_cost(&self) -> u64 {
        match &self.kind {
            FormulaKind::Empty | FormulaKind::Flattened(_) => operation::EMPTY,
            FormulaKind::Constant(_) => operation::CONSTANT,
            FormulaKind::And(_) => operation::AND,
            FormulaKind::Or(_) => operation::OR,
            FormulaKind::Not { .. } => operation::NOT,
            FormulaKind::UserFilter(_) => operation::USER_FILTER,
            FormulaKind::MultipleEntity(_) => operation::MULTIPLE_ENTITY,
            FormulaKind::PriceRecords(_) => operation::PRICE_RECORDS,
            FormulaKind::PriceFilter(_) => operation::PRICE_FILTER,
            FormulaKind::EntityFilter(filter) => filter.path_cost().unwrap_or(u64::MAX),
            FormulaKind::Selection(_) => operation::SELECTION,
        }
    }

    /// Cost estimated without computing: inner estimates plus estimated
    /// cardinality times operation cost.
    #[must_use]
    pub fn estimated_cost(&self) -> u64 {
        if let Some(cost) = self.memo.estimated_cost.get() {
            return *cost;
        }

        let cost = match &self.kind {
            FormulaKind::Flattened(_) => 0,
            FormulaKind::EntityFilter(filter) => filter.path_cost().unwrap_or(u64::MAX),
            FormulaKind::Selection(selection) => selection
                .prefetch_path_cost()
                .unwrap_or_else(|| selection.delegate().estimated_cost()),
            _ => self
                .inner_formulas()
                .into_iter()
                .map(Self::estimated_cost)
                .fold(0, u64::saturating_add)
                .saturating_add(
                    widen(self.estimated_cardinality()).saturating_mul(self.operation_cost()),
                ),
        };

        *self.memo.estimated_cost.get_or_init(|| cost)
    }

    /// Cost of the actual computation: inner costs plus result size times
    /// operation cost. Computes the node.
    #[must_use]
    pub fn cost(&self) -> u64 {
        if let Some(cost) = self.memo.cost.get() {
            return *cost;
        }

        let cost = match &self.kind {
            FormulaKind::Flattened(_) => 0,
            FormulaKind::EntityFilter(filter) => filter.path_cost().unwrap_or(u64::MAX),
            FormulaKind::Selection(selection) => match selection.binding() {
                SelectionBinding::Prefetch { .. } => selection.prefetch_path_cost().unwrap_or(0),
                _ => selection.delegate().cost(),
            },
            _ => match self.compute() {
                Ok(result) => self
                    .inner_formulas()
                    .into_iter()
                    .map(Self::cost)
                    .fold(0, u64::saturating_add)
                    .saturating_add(widen(result.len()).saturating_mul(self.operation_cost())),
                Err(_) => u64::MAX,
            },
        };

        *self.memo.cost.get_or_init(|| cost)
    }

    /// Cost paid per result row; higher values make better cache candidates.
    /// Flattened nodes report the best possible ratio.
    #[must_use]
    pub fn cost_to_performance_ratio(&self) -> u64 {
        match &self.kind {
            FormulaKind::Flattened(_) => u64::MAX,
            FormulaKind::Selection(selection)
                if !matches!(selection.binding(), SelectionBinding::Prefetch { .. }) =>
            {
                selection.delegate().cost_to_performance_ratio()
            }
            _ => match self.compute() {
                Ok(result) => self.cost() / widen(result.len()).max(1),
                Err(_) => 0,
            },
        }
    }
}
