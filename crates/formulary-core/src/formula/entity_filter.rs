use crate::{
    bitmap::SharedBitmap,
    entity::{EntityToBitmapFilter, PrefetchedEntities},
    formula::FormulaError,
    query::QueryExecutionContext,
};
use std::sync::Arc;

/// Cost of evaluating `filter` over one prefetched entity set.
pub(super) fn filter_path_cost(
    filter: &dyn EntityToBitmapFilter,
    per_requirement_cost: u64,
) -> u64 {
    let requirements = filter.requirements().len();
    if requirements == 0 {
        return 0;
    }

    u64::try_from(requirements)
        .unwrap_or(u64::MAX)
        .saturating_add(1)
        .saturating_mul(per_requirement_cost)
}

///
/// EntityFilterFormula
///
/// Filter with no index representation; computable only over prefetched
/// entities that bound the query result.
///

#[derive(Clone, Debug)]
pub struct EntityFilterFormula {
    filter: Arc<dyn EntityToBitmapFilter>,
    binding: Option<FilterBinding>,
}

#[derive(Clone, Debug)]
struct FilterBinding {
    entities: Arc<PrefetchedEntities>,
    per_requirement_cost: u64,
}

impl EntityFilterFormula {
    pub(super) fn new(filter: Arc<dyn EntityToBitmapFilter>) -> Self {
        Self {
            filter,
            binding: None,
        }
    }

    #[must_use]
    pub fn filter(&self) -> &dyn EntityToBitmapFilter {
        self.filter.as_ref()
    }

    pub(super) fn bind(&mut self, context: &QueryExecutionContext) {
        self.binding = context.prefetched().map(|entities| FilterBinding {
            entities: Arc::clone(entities),
            per_requirement_cost: context.cost().per_requirement_cost,
        });
    }

    /// Prefetched entities the filter may evaluate over.
    pub(super) fn usable_entities(&self) -> Option<&PrefetchedEntities> {
        self.binding
            .as_ref()
            .map(|binding| binding.entities.as_ref())
            .filter(|entities| entities.usable_for_filtering())
    }

    pub(super) fn path_cost(&self) -> Option<u64> {
        self.binding
            .as_ref()
            .filter(|binding| binding.entities.usable_for_filtering())
            .map(|binding| filter_path_cost(self.filter.as_ref(), binding.per_requirement_cost))
    }

    pub(super) fn compute(&self) -> Result<SharedBitmap, FormulaError> {
        let reason = match &self.binding {
            None => "entities were not prefetched",
            Some(binding) if !binding.entities.usable_for_filtering() => {
                "prefetched entities do not bound the result"
            }
            Some(binding) => return Ok(Arc::new(self.filter.filter(&binding.entities)?)),
        };

        Err(FormulaError::MissingContext {
            formula: "EntityFilterFormula",
            reason: reason.to_string(),
        })
    }
}
