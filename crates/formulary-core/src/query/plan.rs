use crate::{
    bitmap::{Bitmap, SharedBitmap},
    cache::FormulaCache,
    config::CostConfig,
    entity::EntityFetcher,
    error::InternalError,
    formula::{Formula, FormulaError},
    prefetch::{PrefetchFormulaVisitor, PrefetchOrder, PrefetcherFactory, TargetIndexScope},
    query::{EntityReferenceRegistry, QueryExecutionContext},
};
use std::sync::Arc;
use tracing::debug;

///
/// QueryOutcome
///

#[derive(Clone, Debug)]
pub struct QueryOutcome {
    pub result: SharedBitmap,
    /// Entities hydrated for the successful evaluation.
    pub prefetched: Option<usize>,
    /// Evaluation failed for want of entities and was retried with a forced prefetch.
    pub retried: bool,
    /// Cache payloads captured from the evaluated tree.
    pub captured: usize,
}

///
/// QueryPlan
///
/// One filter evaluation: cache substitution, prefetch decision,
/// initialization, computation and payload capture.
///

#[derive(Debug)]
pub struct QueryPlan {
    entity_type: String,
    formula: Formula,
    cost: CostConfig,
    scope: TargetIndexScope,
    registry: EntityReferenceRegistry,
    cache: Option<Arc<FormulaCache>>,
}

impl QueryPlan {
    #[must_use]
    pub fn new(entity_type: impl Into<String>, formula: Formula) -> Self {
        Self {
            entity_type: entity_type.into(),
            formula,
            cost: CostConfig::default(),
            scope: TargetIndexScope::Global,
            registry: EntityReferenceRegistry::new(),
            cache: None,
        }
    }

    #[must_use]
    pub const fn with_cost(mut self, cost: CostConfig) -> Self {
        self.cost = cost;
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: TargetIndexScope) -> Self {
        self.scope = scope;
        self
    }

    /// Registry that masked the cross-collection references in the formula.
    #[must_use]
    pub fn with_registry(mut self, registry: EntityReferenceRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<FormulaCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub const fn formula(&self) -> &Formula {
        &self.formula
    }

    pub fn execute(self, fetcher: &dyn EntityFetcher) -> Result<QueryOutcome, InternalError> {
        let Self {
            entity_type,
            formula,
            cost,
            scope,
            registry,
            cache,
        } = self;

        let mut formula = match &cache {
            Some(cache) => cache.register(formula),
            None => formula,
        };

        let visitor = PrefetchFormulaVisitor::analyze(&formula);
        let factory = PrefetcherFactory::new(cost, scope);
        let order = factory.create_prefetcher_if_needed_or_worthwhile(&visitor);

        let mut context = QueryExecutionContext::new(cost);
        let mut prefetched = None;
        if let Some(order) = &order {
            prefetched = Some(context.prefetch(order, &entity_type, fetcher, &registry)?);
        }

        let mut retried = false;
        let result = match evaluate(&mut formula, &context) {
            Err(err) if err.is_recoverable() && !usable(order.as_ref()) => {
                let Some(order) = factory.create_forced_prefetcher(&visitor) else {
                    return Err(err.into());
                };
                debug!(
                    entity_type = %entity_type,
                    error = %err,
                    entities = order.entities_to_prefetch.len(),
                    "retrying evaluation with forced prefetch"
                );

                let mut context = QueryExecutionContext::new(cost);
                prefetched = Some(context.prefetch(&order, &entity_type, fetcher, &registry)?);
                retried = true;
                evaluate(&mut formula, &context)?
            }
            other => other?,
        };

        let captured = cache.as_ref().map_or(0, |cache| cache.capture(&formula));

        Ok(QueryOutcome {
            result,
            prefetched,
            retried,
            captured,
        })
    }
}

fn usable(order: Option<&PrefetchOrder>) -> bool {
    order.is_some_and(|order| order.usable_for_filtering)
}

fn evaluate(
    formula: &mut Formula,
    context: &QueryExecutionContext,
) -> Result<SharedBitmap, FormulaError> {
    formula.initialize(context);
    formula.compute()
}
