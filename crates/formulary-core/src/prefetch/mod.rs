//! Entity prefetch optimizer.
//!
//! One pass over a formula tree gathers the ids that bound the result, the
//! ids that can only be resolved by hydrating entities, and the content the
//! entity filters need; the factory then decides whether hydrating those
//! entities beats evaluating the indexes.

#[cfg(test)]
mod tests;

use crate::{
    bitmap::{BaseBitmap, Bitmap, SharedBitmap, and_all},
    config::CostConfig,
    entity::EntityFetchRequirements,
    formula::{Formula, FormulaKind, FormulaVisitor},
    obs::sink::{self, MetricsEvent, PrefetchOutcome},
};
use std::sync::Arc;
use tracing::debug;

///
/// TargetIndexScope
///
/// Index the query is evaluated against. A narrowed index only holds part of
/// the collection, so prefetch candidates must be members of it.
///

#[derive(Clone, Debug, Default)]
pub enum TargetIndexScope {
    #[default]
    Global,
    Catalog,
    Narrowed(Arc<BaseBitmap>),
}

///
/// PrefetchOrder
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrefetchOrder {
    /// Prefetched entities bound the query result and may replace index
    /// evaluation.
    pub usable_for_filtering: bool,
    pub entities_to_prefetch: BaseBitmap,
    pub requirements: EntityFetchRequirements,
}

///
/// PrefetchFormulaVisitor
///

#[derive(Debug)]
pub struct PrefetchFormulaVisitor {
    conjunctive_scope: bool,
    conjunctive_ids: Vec<SharedBitmap>,
    min_conjunctive_cardinality: Option<usize>,
    forced_ids: BaseBitmap,
    requirements: EntityFetchRequirements,
    expected_computational_cost: u64,
    prefetch_required: bool,
}

impl Default for PrefetchFormulaVisitor {
    fn default() -> Self {
        Self {
            conjunctive_scope: true,
            conjunctive_ids: Vec::new(),
            min_conjunctive_cardinality: None,
            forced_ids: BaseBitmap::new(),
            requirements: EntityFetchRequirements::new(),
            expected_computational_cost: 0,
            prefetch_required: false,
        }
    }
}

impl PrefetchFormulaVisitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Visit `formula` with a fresh visitor.
    #[must_use]
    pub fn analyze(formula: &Formula) -> Self {
        let mut visitor = Self::new();
        formula.accept(&mut visitor);

        visitor
    }

    /// Smallest bitmap seen in conjunctive scope.
    #[must_use]
    pub const fn min_conjunctive_cardinality(&self) -> Option<usize> {
        self.min_conjunctive_cardinality
    }

    #[must_use]
    pub const fn forced_ids(&self) -> &BaseBitmap {
        &self.forced_ids
    }

    #[must_use]
    pub const fn requirements(&self) -> &EntityFetchRequirements {
        &self.requirements
    }

    /// Estimated cost of evaluating every selection through its delegate.
    #[must_use]
    pub const fn expected_computational_cost(&self) -> u64 {
        self.expected_computational_cost
    }

    /// True when the tree holds an entity filter, which cannot be computed
    /// without prefetched entities.
    #[must_use]
    pub const fn prefetch_required(&self) -> bool {
        self.prefetch_required
    }

    /// Intersection of the conjunctive bitmaps, or `None` when none was seen.
    #[must_use]
    pub fn conjunctive_entities(&self) -> Option<BaseBitmap> {
        if self.conjunctive_ids.is_empty() {
            return None;
        }
        let operands: Vec<&dyn Bitmap> = self.conjunctive_ids.iter().map(AsRef::as_ref).collect();

        Some(and_all(&operands))
    }

    fn is_prefetch_possible(&self, threshold: usize) -> bool {
        !self.requirements.is_empty()
            && self
                .min_conjunctive_cardinality
                .is_some_and(|cardinality| cardinality <= threshold)
    }
}

impl FormulaVisitor<'_> for PrefetchFormulaVisitor {
    fn visit(&mut self, formula: &Formula) {
        match formula.kind() {
            FormulaKind::Selection(selection) => {
                self.expected_computational_cost = self
                    .expected_computational_cost
                    .saturating_add(selection.delegate().estimated_cost());
            }
            FormulaKind::EntityFilter(_) => self.prefetch_required = true,
            _ => {}
        }
        if let Some(requirements) = formula.requirements() {
            self.requirements.merge(&requirements);
        }

        match formula.kind() {
            FormulaKind::Constant(constant) if self.conjunctive_scope => {
                let cardinality = constant.bitmap().len();
                self.min_conjunctive_cardinality = Some(
                    self.min_conjunctive_cardinality
                        .map_or(cardinality, |min| min.min(cardinality)),
                );
                self.conjunctive_ids.push(Arc::clone(constant.bitmap()));
            }
            FormulaKind::MultipleEntity(multiple) => {
                self.forced_ids.union_with(multiple.masked_ids().as_roaring());
            }
            _ => {}
        }

        let former_scope = self.conjunctive_scope;
        if !matches!(formula.kind(), FormulaKind::And(_) | FormulaKind::UserFilter(_)) {
            self.conjunctive_scope = false;
        }
        for inner in formula.inner_formulas() {
            inner.accept(self);
        }
        self.conjunctive_scope = former_scope;
    }
}

///
/// PrefetcherFactory
///

#[derive(Clone, Debug, Default)]
pub struct PrefetcherFactory {
    cost: CostConfig,
    scope: TargetIndexScope,
}

impl PrefetcherFactory {
    #[must_use]
    pub const fn new(cost: CostConfig, scope: TargetIndexScope) -> Self {
        Self { cost, scope }
    }

    #[must_use]
    pub const fn scope(&self) -> &TargetIndexScope {
        &self.scope
    }

    /// Decide whether to prefetch. Forced ids are always prefetched; the
    /// conjunctive candidates join them when an entity filter requires it or
    /// when evaluating the selections through their delegates would cost more
    /// than hydrating the candidates.
    #[must_use]
    pub fn create_prefetcher_if_needed_or_worthwhile(
        &self,
        visitor: &PrefetchFormulaVisitor,
    ) -> Option<PrefetchOrder> {
        let mut entities = (!visitor.forced_ids.is_empty()).then(|| visitor.forced_ids.clone());
        let mut usable_for_filtering = false;
        let mut outcome = PrefetchOutcome::NotPossible;

        if visitor.is_prefetch_possible(self.cost.prefetch_cardinality_threshold)
            && let Some(conjunctive) = visitor.conjunctive_entities()
        {
            let prefetch_cost = self
                .cost
                .prefetch_cost(conjunctive.len(), visitor.requirements.len());

            if visitor.prefetch_required
                || visitor.expected_computational_cost > prefetch_cost
            {
                match &mut entities {
                    Some(forced) => forced.union_with(conjunctive.as_roaring()),
                    None => entities = Some(conjunctive),
                }
                usable_for_filtering = true;
            } else {
                outcome = PrefetchOutcome::NotWorthwhile;
            }
            debug!(
                expected_cost = visitor.expected_computational_cost,
                prefetch_cost,
                required = visitor.prefetch_required,
                "prefetch evaluated"
            );
        }

        let Some(mut entities) = entities else {
            sink::record(MetricsEvent::PrefetchDecision {
                outcome,
                entities: 0,
            });
            return None;
        };
        if let TargetIndexScope::Narrowed(pks) = &self.scope {
            entities = BaseBitmap::from_roaring(entities.as_roaring() & pks.as_roaring());
        }

        sink::record(MetricsEvent::PrefetchDecision {
            outcome: PrefetchOutcome::Planned,
            entities: u64::try_from(entities.len()).unwrap_or(u64::MAX),
        });

        Some(PrefetchOrder {
            usable_for_filtering,
            entities_to_prefetch: entities,
            requirements: visitor.requirements.clone(),
        })
    }

    /// Order hydrating every conjunctive candidate regardless of cost and
    /// threshold. Used to retry a query that failed for want of entities.
    #[must_use]
    pub fn create_forced_prefetcher(
        &self,
        visitor: &PrefetchFormulaVisitor,
    ) -> Option<PrefetchOrder> {
        let mut entities = visitor.conjunctive_entities()?;
        entities.union_with(visitor.forced_ids.as_roaring());
        if let TargetIndexScope::Narrowed(pks) = &self.scope {
            entities = BaseBitmap::from_roaring(entities.as_roaring() & pks.as_roaring());
        }

        sink::record(MetricsEvent::PrefetchDecision {
            outcome: PrefetchOutcome::Planned,
            entities: u64::try_from(entities.len()).unwrap_or(u64::MAX),
        });

        Some(PrefetchOrder {
            usable_for_filtering: true,
            entities_to_prefetch: entities,
            requirements: visitor.requirements.clone(),
        })
    }
}
