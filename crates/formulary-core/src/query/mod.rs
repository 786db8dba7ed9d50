//! Query execution: context handed to formulas, cross-collection id masking,
//! and the plan pipeline tying cache, prefetch and evaluation together.

mod plan;

#[cfg(test)]
mod tests;

pub use plan::{QueryOutcome, QueryPlan};

use crate::{
    bitmap::{BaseBitmap, Bitmap},
    config::CostConfig,
    entity::{EntityFetcher, EntityReference, PrefetchedEntities},
    error::InternalError,
    formula::Formula,
    prefetch::PrefetchOrder,
};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

///
/// EntityReferenceRegistry
///
/// Assigns synthetic ids to typed references so that entities of several
/// collections can share one formula tree. Synthetic ids are handed out
/// downwards from `u32::MAX`, away from real primary keys.
///

#[derive(Clone, Debug, Default)]
pub struct EntityReferenceRegistry {
    by_reference: HashMap<EntityReference, u32>,
    by_id: HashMap<u32, EntityReference>,
}

impl EntityReferenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthetic id of `reference`, assigned on first use.
    pub fn mask(&mut self, reference: EntityReference) -> u32 {
        if let Some(id) = self.by_reference.get(&reference) {
            return *id;
        }

        let assigned = u32::try_from(self.by_id.len()).unwrap_or(u32::MAX);
        let id = u32::MAX - assigned;
        self.by_id.insert(id, reference.clone());
        self.by_reference.insert(reference, id);

        id
    }

    #[must_use]
    pub fn masked_id(&self, reference: &EntityReference) -> Option<u32> {
        self.by_reference.get(reference).copied()
    }

    #[must_use]
    pub fn translate(&self, id: u32) -> Option<&EntityReference> {
        self.by_id.get(&id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Leaf holding `references` under their synthetic ids.
    pub fn formula(&mut self, references: impl IntoIterator<Item = EntityReference>) -> Formula {
        let references: Vec<EntityReference> = references.into_iter().collect();
        let ids: BaseBitmap = references.iter().map(|r| self.mask(r.clone())).collect();

        Formula::multiple_entity(references.into(), ids)
    }
}

///
/// QueryExecutionContext
///
/// Per-execution state formulas bind to during `initialize`.
///

#[derive(Clone, Debug, Default)]
pub struct QueryExecutionContext {
    cost: CostConfig,
    prefetched: Option<Arc<PrefetchedEntities>>,
}

impl QueryExecutionContext {
    #[must_use]
    pub const fn new(cost: CostConfig) -> Self {
        Self {
            cost,
            prefetched: None,
        }
    }

    #[must_use]
    pub fn with_prefetched(mut self, entities: PrefetchedEntities) -> Self {
        self.prefetched = Some(Arc::new(entities));
        self
    }

    #[must_use]
    pub const fn cost(&self) -> &CostConfig {
        &self.cost
    }

    #[must_use]
    pub const fn prefetched(&self) -> Option<&Arc<PrefetchedEntities>> {
        self.prefetched.as_ref()
    }

    /// Hydrate the entities named by `order`. Ids masked by `registry`
    /// resolve to their references; any other id is a primary key of
    /// `entity_type`. Returns the number of entities hydrated.
    pub fn prefetch(
        &mut self,
        order: &PrefetchOrder,
        entity_type: &str,
        fetcher: &dyn EntityFetcher,
        registry: &EntityReferenceRegistry,
    ) -> Result<usize, InternalError> {
        let references: Vec<EntityReference> = order
            .entities_to_prefetch
            .iter()
            .map(|id| {
                registry
                    .translate(id)
                    .cloned()
                    .unwrap_or_else(|| EntityReference::new(entity_type, id))
            })
            .collect();

        let fetched = if references.is_empty() {
            Vec::new()
        } else {
            fetcher.fetch(&references, &order.requirements)?
        };

        let mut entities = Vec::with_capacity(fetched.len());
        for entity in fetched {
            let reference = entity.reference();
            let id = match registry.masked_id(&reference) {
                Some(id) => id,
                None if reference.entity_type == entity_type => reference.pk,
                None => {
                    return Err(InternalError::query_internal(format!(
                        "fetcher returned unrequested entity {}:{}",
                        reference.entity_type, reference.pk
                    )));
                }
            };
            entities.push((id, entity));
        }

        let count = entities.len();
        debug!(
            requested = references.len(),
            fetched = count,
            usable_for_filtering = order.usable_for_filtering,
            "entities prefetched"
        );
        self.prefetched = Some(Arc::new(PrefetchedEntities::new(
            entities,
            order.requirements.clone(),
            order.usable_for_filtering,
        )));

        Ok(count)
    }
}
